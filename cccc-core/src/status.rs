//! C10 — Status Writer: snapshots orchestrator state to `state/status.json`,
//! `state/queue.json` and `state/locks.json` for external dashboards and
//! bridges to poll.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use crate::error::{CcccError, Result};
use crate::foreman::ForemanStatus;
use crate::types::Peer;

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ResetSnapshot {
    pub policy: &'static str,
    pub default_mode: &'static str,
    pub interval_handoffs: u32,
    pub interval_effective: u32,
    pub self_check_every: u32,
    pub handoffs_total: u64,
    pub handoffs_peer_a: u64,
    pub handoffs_peer_b: u64,
    pub next_self_peer_a: u64,
    pub next_self_peer_b: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SetupSnapshot {
    pub roles: Value,
    pub cli: Value,
    pub telegram: Value,
    pub actors_available: Vec<String>,
}

/// Everything the status writer needs to know about the live session; owned
/// and updated by the orchestrator loop each tick.
#[derive(Clone, Debug)]
pub struct StatusInputs {
    pub session: String,
    pub paused: bool,
    pub phase: String,
    pub require_ack: bool,
    pub mailbox_counts: HashMap<String, u64>,
    pub mailbox_last: HashMap<String, f64>,
    pub handoff_filter_enabled: bool,
    pub por: Value,
    pub aux: Value,
    pub reset: ResetSnapshot,
    pub foreman: Option<ForemanStatus>,
    pub setup: SetupSnapshot,
}

#[derive(Serialize)]
struct ForemanField {
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_due: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_rc: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cc_user: Option<bool>,
}

pub struct StatusWriter {
    state_dir: PathBuf,
}

impl StatusWriter {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self { state_dir: state_dir.as_ref().to_path_buf() }
    }

    pub fn write_status(&self, inputs: &StatusInputs) -> Result<()> {
        let foreman = match &inputs.foreman {
            Some(status) => ForemanField {
                enabled: status.enabled,
                running: Some(status.running),
                next_due: status.next_due,
                last: status.last,
                last_rc: status.last_rc,
                cc_user: None,
            },
            None => ForemanField {
                enabled: false,
                running: None,
                next_due: None,
                last: None,
                last_rc: None,
                cc_user: None,
            },
        };

        let payload = serde_json::json!({
            "session": inputs.session,
            "paused": inputs.paused,
            "phase": inputs.phase,
            "require_ack": inputs.require_ack,
            "mailbox_counts": inputs.mailbox_counts,
            "mailbox_last": inputs.mailbox_last,
            "handoff_filter_enabled": inputs.handoff_filter_enabled,
            "por": inputs.por,
            "aux": inputs.aux,
            "reset": inputs.reset,
            "ts": unix_now(),
            "foreman": foreman,
            "setup": inputs.setup,
        });

        self.write_json("status.json", &payload)
    }

    pub fn write_queue_and_locks(
        &self,
        queue_counts: &HashMap<Peer, u64>,
        inflight: &HashMap<Peer, bool>,
        inbox_seq_locks: &[String],
    ) -> Result<()> {
        let queue = serde_json::json!({
            "peerA": queue_counts.get(&Peer::PeerA).copied().unwrap_or(0),
            "peerB": queue_counts.get(&Peer::PeerB).copied().unwrap_or(0),
            "inflight": {
                "peerA": inflight.get(&Peer::PeerA).copied().unwrap_or(false),
                "peerB": inflight.get(&Peer::PeerB).copied().unwrap_or(false),
            },
        });
        self.write_json("queue.json", &queue)?;

        let locks = serde_json::json!({
            "inbox_seq_locks": inbox_seq_locks,
            "inflight": {
                "peerA": inflight.get(&Peer::PeerA).copied().unwrap_or(false),
                "peerB": inflight.get(&Peer::PeerB).copied().unwrap_or(false),
            },
        });
        self.write_json("locks.json", &locks)
    }

    fn write_json(&self, name: &str, value: &Value) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).map_err(|e| CcccError::io(&self.state_dir, e))?;
        let path = self.state_dir.join(name);
        let data = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, data).map_err(|e| CcccError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StatusInputs {
        StatusInputs {
            session: "demo".into(),
            paused: false,
            phase: "running".into(),
            require_ack: false,
            mailbox_counts: HashMap::new(),
            mailbox_last: HashMap::new(),
            handoff_filter_enabled: true,
            por: Value::Null,
            aux: Value::Null,
            reset: ResetSnapshot::default(),
            foreman: None,
            setup: SetupSnapshot::default(),
        }
    }

    #[test]
    fn writes_status_json_with_expected_top_level_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = StatusWriter::new(tmp.path());
        writer.write_status(&inputs()).unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("status.json")).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        for key in ["session", "paused", "phase", "mailbox_counts", "foreman", "setup", "reset"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn writes_queue_and_locks() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = StatusWriter::new(tmp.path());
        let mut counts = HashMap::new();
        counts.insert(Peer::PeerA, 2u64);
        let mut inflight = HashMap::new();
        inflight.insert(Peer::PeerA, true);

        writer.write_queue_and_locks(&counts, &inflight, &["inbox-seq-peerA.lckdir".into()]).unwrap();
        assert!(tmp.path().join("queue.json").is_file());
        assert!(tmp.path().join("locks.json").is_file());
    }
}
