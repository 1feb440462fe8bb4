//! Request/response shapes for the control API.

use serde::{Deserialize, Serialize};

use kanpe_protocol::{FeedbackType, LatestMessageInfo, VirtualMonitor};

/// Requests from a bridge (Stream Deck plugin, web caster) to the caster
/// process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeRequest {
    /// Send standalone feedback using the caster's bound client name.
    SendFeedback {
        content: String,
        feedback_type: FeedbackType,
    },
    /// Reply to the most recent kanpe that passed the display filter.
    ReactToLatest { feedback_type: FeedbackType },
    /// Ask for the current session state.
    GetState,
}

/// Responses from the caster process back to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeResponse {
    Result {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StateUpdate {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latest_message: Option<LatestMessageInfo>,
        monitors: Vec<VirtualMonitor>,
    },
}

impl BridgeResponse {
    pub fn ok() -> Self {
        Self::Result {
            success: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Result {
            success: false,
            error: Some(message.into()),
        }
    }
}
