//! Bounded rings of sent directives and received feedback.
//!
//! Older entries are discarded silently; consumers who need durable
//! history must subscribe to events live.

use std::collections::VecDeque;

use kanpe_protocol::Envelope;

pub(crate) struct History {
    directives: VecDeque<Envelope>,
    feedback: VecDeque<Envelope>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            directives: VecDeque::new(),
            feedback: VecDeque::new(),
            capacity,
        }
    }

    pub fn record_directive(&mut self, envelope: &Envelope) {
        if self.directives.len() >= self.capacity {
            self.directives.pop_front();
        }
        self.directives.push_back(envelope.clone());
    }

    pub fn record_feedback(&mut self, envelope: &Envelope) {
        if self.feedback.len() >= self.capacity {
            self.feedback.pop_front();
        }
        self.feedback.push_back(envelope.clone());
    }

    pub fn directives(&self) -> Vec<Envelope> {
        self.directives.iter().cloned().collect()
    }

    pub fn feedback(&self) -> Vec<Envelope> {
        self.feedback.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanpe_protocol::{FeedbackType, Priority};

    #[test]
    fn ring_discards_oldest_directive() {
        let mut history = History::new(3);
        for i in 0..5 {
            let env = Envelope::kanpe(format!("cue {i}"), vec!["ALL".into()], Priority::Normal);
            history.record_directive(&env);
        }
        let contents: Vec<_> = history
            .directives()
            .into_iter()
            .map(|e| match e {
                Envelope::KanpeMessage { payload, .. } => payload.content,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(contents, ["cue 2", "cue 3", "cue 4"]);
    }

    #[test]
    fn kinds_are_bounded_independently() {
        let mut history = History::new(2);
        for i in 0..4 {
            history.record_directive(&Envelope::kanpe(
                format!("d{i}"),
                vec!["ALL".into()],
                Priority::Normal,
            ));
        }
        history.record_feedback(&Envelope::feedback(
            "ok".into(),
            "caster".into(),
            String::new(),
            FeedbackType::Ack,
        ));
        assert_eq!(history.directives().len(), 2);
        assert_eq!(history.feedback().len(), 1);
    }
}
