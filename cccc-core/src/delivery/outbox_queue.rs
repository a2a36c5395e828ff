//! Per-receiver on-disk retry queue, `state/outbox-<peer>.jsonl`.
//!
//! Not to be confused with [`crate::outbox`], the externally consumed
//! `outbox.jsonl` event log (C8). This queue only holds messages awaiting
//! ACK so they can be replayed on a later idle tick.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CcccError, Result};
use crate::types::Peer;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub mid: String,
    pub payload: String,
}

pub struct DeliveryQueue {
    path: PathBuf,
}

impl DeliveryQueue {
    pub fn open(state_dir: impl AsRef<Path>, peer: Peer) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&state_dir).map_err(|e| CcccError::io(&state_dir, e))?;
        let path = state_dir.join(format!("outbox-{}.jsonl", peer.folder_name()));
        if !path.exists() {
            std::fs::write(&path, "").map_err(|e| CcccError::io(&path, e))?;
        }
        Ok(Self { path })
    }

    pub fn enqueue(&self, mid: &str, payload: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CcccError::io(&self.path, e))?;
        let line = serde_json::to_string(&QueuedMessage {
            mid: mid.to_string(),
            payload: payload.to_string(),
        })?;
        writeln!(file, "{line}").map_err(|e| CcccError::io(&self.path, e))
    }

    pub fn load_all(&self) -> Result<Vec<QueuedMessage>> {
        let file = std::fs::File::open(&self.path).map_err(|e| CcccError::io(&self.path, e))?;
        let reader = std::io::BufReader::new(file);
        let mut items = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| CcccError::io(&self.path, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(item) = serde_json::from_str::<QueuedMessage>(trimmed) {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn replace_all(&self, items: &[QueuedMessage]) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = std::fs::File::create(&tmp).map_err(|e| CcccError::io(&tmp, e))?;
            for item in items {
                let line = serde_json::to_string(item)?;
                writeln!(file, "{line}").map_err(|e| CcccError::io(&tmp, e))?;
            }
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| CcccError::io(&self.path, e))
    }

    pub fn remove(&self, mid: &str) -> Result<()> {
        let remaining: Vec<QueuedMessage> = self
            .load_all()?
            .into_iter()
            .filter(|item| item.mid != mid)
            .collect();
        self.replace_all(&remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_load_remove_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let q = DeliveryQueue::open(tmp.path(), Peer::PeerA).unwrap();
        q.enqueue("cccc-1-aaaaaa", "hello").unwrap();
        q.enqueue("cccc-2-bbbbbb", "world").unwrap();
        assert_eq!(q.load_all().unwrap().len(), 2);

        q.remove("cccc-1-aaaaaa").unwrap();
        let remaining = q.load_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].mid, "cccc-2-bbbbbb");
    }
}
