//! Unified config (figment-deserialized from defaults / bikanpe.toml / env vars)
//!
//! Three equivalent ways to configure:
//!
//!   bikanpe.toml:    [hub]
//!                    port = 9876
//!
//!   env var:         KANPE_HUB__PORT=9876   (double underscore = nesting)
//!
//!   CLI flags:       --port 9876            (take precedence over both)

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub hub: HubFileConfig,
    #[serde(default)]
    pub caster: CasterFileConfig,
    #[serde(default)]
    pub bridge: BridgeFileConfig,
}

/// Director tunables (lives under `[hub]` in bikanpe.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    #[serde(default = "default_hub_port")]
    pub port: u16,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Seed the stock Monitor A–D set on startup.
    #[serde(default = "default_seed_monitors")]
    pub seed_default_monitors: bool,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            port: default_hub_port(),
            server_name: default_server_name(),
            seed_default_monitors: default_seed_monitors(),
        }
    }
}

/// Caster tunables (lives under `[caster]` in bikanpe.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CasterFileConfig {
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub display_monitor_ids: Vec<String>,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

impl Default for CasterFileConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            client_name: None,
            display_monitor_ids: Vec::new(),
            auto_reconnect: default_auto_reconnect(),
        }
    }
}

/// Control API tunables (lives under `[bridge]` in bikanpe.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeFileConfig {
    #[serde(default = "default_bridge_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

impl Default for BridgeFileConfig {
    fn default() -> Self {
        Self {
            enabled: default_bridge_enabled(),
            port: default_bridge_port(),
        }
    }
}

fn default_hub_port() -> u16 {
    9876
}

fn default_server_name() -> String {
    "Bi-Kanpe Director".to_string()
}

fn default_seed_monitors() -> bool {
    true
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_bridge_enabled() -> bool {
    true
}

fn default_bridge_port() -> u16 {
    9877
}

/// Build a figment that layers: defaults → bikanpe.toml → KANPE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `KANPE_HUB__PORT=9900`          →  `hub.port = 9900`
///   `KANPE_BRIDGE__ENABLED=false`   →  `bridge.enabled = false`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let toml_path = config_path.unwrap_or_else(|| Path::new("bikanpe.toml"));
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(toml_path))
        .merge(Env::prefixed("KANPE_").split("__"))
}
