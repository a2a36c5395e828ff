//! Tuning knobs shared by the mailbox, pane, delivery, keepalive and foreman
//! modules. All structs carry defaults so a settings file only needs to
//! override the fields an operator actually cares about.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::Peer;

/// Per-peer pane driving profile: idle-detection regexes and paste/type
/// behaviour. Loaded from `settings/cli_profiles.yaml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaneProfile {
    #[serde(default)]
    pub prompt_regex: Option<String>,
    #[serde(default)]
    pub busy_regexes: Vec<String>,
    #[serde(default = "PaneProfile::default_idle_quiet_seconds")]
    pub idle_quiet_seconds: f64,
    #[serde(default = "PaneProfile::default_input_mode")]
    pub input_mode: String,
    #[serde(default = "PaneProfile::default_post_paste_keys")]
    pub post_paste_keys: Vec<String>,
    #[serde(default = "PaneProfile::default_compose_newline_key")]
    pub compose_newline_key: String,
    #[serde(default = "PaneProfile::default_send_sequence")]
    pub send_sequence: String,
    #[serde(default)]
    pub line_send_key: Option<String>,
    #[serde(default = "PaneProfile::default_type_send_at_end")]
    pub type_send_at_end: bool,
    #[serde(default)]
    pub chunk_lines: usize,
    #[serde(default)]
    pub chunk_delay_ms: u64,
}

impl PaneProfile {
    const fn default_idle_quiet_seconds() -> f64 {
        1.5
    }
    fn default_input_mode() -> String {
        "paste".into()
    }
    fn default_post_paste_keys() -> Vec<String> {
        vec!["Enter".into(), "Enter".into(), "C-m".into()]
    }
    fn default_compose_newline_key() -> String {
        "Enter".into()
    }
    fn default_send_sequence() -> String {
        "C-m".into()
    }
    const fn default_type_send_at_end() -> bool {
        true
    }
}

impl Default for PaneProfile {
    fn default() -> Self {
        Self {
            prompt_regex: None,
            busy_regexes: Vec::new(),
            idle_quiet_seconds: Self::default_idle_quiet_seconds(),
            input_mode: Self::default_input_mode(),
            post_paste_keys: Self::default_post_paste_keys(),
            compose_newline_key: Self::default_compose_newline_key(),
            send_sequence: Self::default_send_sequence(),
            line_send_key: None,
            type_send_at_end: Self::default_type_send_at_end(),
            chunk_lines: 0,
            chunk_delay_ms: 0,
        }
    }
}

/// Delivery engine tuning, shared across both peers unless overridden.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub paste_max_wait_seconds: f64,
    pub recheck_interval_seconds: f64,
    pub require_ack: bool,
    pub max_flush_batch: usize,
    pub ack_observe_seconds: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            paste_max_wait_seconds: 6.0,
            recheck_interval_seconds: 0.6,
            require_ack: false,
            max_flush_batch: 3,
            ack_observe_seconds: 1.2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub delay_seconds: f64,
    pub single_peer_mode: bool,
    pub single_peer_delay_seconds: f64,
    pub single_peer_max_nudges: u32,
    /// Log `keepalive-skipped`/`keepalive-exhausted` ledger entries. Off by
    /// default since a busy pane skips a nudge on nearly every tick.
    #[serde(default)]
    pub debug: bool,
    /// Aux actor mode threaded into the nudge suffix (`off`/`manual`/`auto`).
    #[serde(default = "KeepaliveConfig::default_aux_mode")]
    pub aux_mode: String,
    #[serde(default)]
    pub aux_actor: Option<String>,
}

impl KeepaliveConfig {
    fn default_aux_mode() -> String {
        "off".into()
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_seconds: 45.0,
            single_peer_mode: false,
            single_peer_delay_seconds: 20.0,
            single_peer_max_nudges: 3,
            debug: false,
            aux_mode: Self::default_aux_mode(),
            aux_actor: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForemanConfig {
    pub enabled: bool,
    /// Was enabled at startup; `on`/`off` commands cannot exceed this.
    pub allowed: bool,
    pub interval_seconds: f64,
    pub max_run_seconds: f64,
    pub agent: String,
    pub cc_user: bool,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed: false,
            interval_seconds: 3600.0,
            max_run_seconds: 600.0,
            agent: "foreman".into(),
            cc_user: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_autostart")]
    pub autostart: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub webhook: Option<String>,
}

impl BridgeConfig {
    fn default_autostart() -> bool {
        true
    }
}

/// Per-peer pane profile overrides keyed by folder name (`peerA`/`peerB`).
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CliProfiles {
    #[serde(default)]
    pub profiles: HashMap<String, PaneProfile>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl CliProfiles {
    pub fn profile_for(&self, peer: Peer) -> PaneProfile {
        self.profiles
            .get(peer.folder_name())
            .cloned()
            .unwrap_or_default()
    }
}
