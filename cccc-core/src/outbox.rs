//! C8 — Outbox Stream: the externally consumed `state/outbox.jsonl` event
//! log. Bridges and other downstream consumers tail this file; CCCC itself
//! never reads it back.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use crate::error::{CcccError, Result};
use crate::types::Peer;

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Serialize)]
struct OutboxRecord<'a> {
    id: u64,
    ts: f64,
    #[serde(rename = "type")]
    kind: &'a str,
    peer: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    eid: Option<&'a str>,
    #[serde(flatten)]
    extra: Value,
}

/// Append-only writer for `state/outbox.jsonl`. Each call assigns a
/// monotonically increasing `id` so consumers can resume after a crash by
/// remembering the highest `id` they processed.
pub struct OutboxWriter {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    next_id: AtomicU64,
}

impl OutboxWriter {
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&state_dir).map_err(|e| CcccError::io(&state_dir, e))?;
        let path = state_dir.join("outbox.jsonl");
        let existing_max = std::fs::read_to_string(&path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|v| v.get("id").and_then(Value::as_u64))
            .max()
            .unwrap_or(0);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CcccError::io(&path, e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            next_id: AtomicU64::new(existing_max + 1),
        })
    }

    fn append(&self, kind: &str, peer: Peer, text: &str, eid: Option<&str>, extra: Value) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = OutboxRecord {
            id,
            ts: unix_now(),
            kind,
            peer: peer.folder_name(),
            text,
            eid,
            extra,
        };
        let line = serde_json::to_string(&record)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| CcccError::Internal("outbox mutex poisoned".into()))?;
        writeln!(file, "{line}").map_err(|e| CcccError::io(&self.path, e))?;
        Ok(id)
    }

    /// Record a message delivered to the human user.
    pub fn to_user(&self, peer: Peer, text: &str, eid: &str) -> Result<u64> {
        self.append("to_user", peer, text, Some(eid), Value::Null)
    }

    /// Record a summary of a message forwarded peer-to-peer (the full
    /// payload stays in the mailbox; the stream only carries a preview).
    pub fn to_peer_summary(&self, peer: Peer, preview: &str, eid: &str, to: Peer) -> Result<u64> {
        self.append(
            "to_peer_summary",
            peer,
            preview,
            Some(eid),
            serde_json::json!({ "to": to.folder_name() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_and_persist_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = OutboxWriter::open(tmp.path()).unwrap();
        let id1 = writer.to_user(Peer::PeerA, "hi", "eid1").unwrap();
        let id2 = writer.to_user(Peer::PeerA, "there", "eid2").unwrap();
        assert!(id2 > id1);
        drop(writer);

        let reopened = OutboxWriter::open(tmp.path()).unwrap();
        let id3 = reopened.to_user(Peer::PeerA, "again", "eid3").unwrap();
        assert!(id3 > id2);
    }
}
