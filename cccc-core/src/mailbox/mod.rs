//! C1 — Mailbox Store: per-peer message files, the sequenced inbox/processed
//! directories, sentinel discipline and the SHA-256 change-detection index.

pub mod decode;
pub mod sentinel;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{CcccError, Result};
use crate::ledger::{entry, LedgerSink};
use crate::types::Peer;

use decode::smart_decode;
use sentinel::is_sentinel_text;

pub fn sha256_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Two channel files scanned every tick, per peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    ToUser,
    ToPeer,
}

impl Channel {
    fn file_name(self) -> &'static str {
        match self {
            Channel::ToUser => "to_user.md",
            Channel::ToPeer => "to_peer.md",
        }
    }
}

/// A changed, non-empty, non-sentinel payload observed for one peer/channel.
#[derive(Clone, Debug)]
pub struct MailboxEvent {
    pub text: String,
}

/// Per-peer scan result: which of `to_user` / `to_peer` changed this tick.
#[derive(Default, Clone, Debug)]
pub struct PeerEvents {
    pub to_user: Option<MailboxEvent>,
    pub to_peer: Option<MailboxEvent>,
}

/// Persisted SHA-256 "last seen payload" index, `state/mailbox_seen.json`.
#[derive(Default, Serialize, Deserialize)]
struct SeenEntry {
    sha: String,
    ts: f64,
}

pub struct MailboxIndex {
    state_dir: PathBuf,
    idx_path: PathBuf,
    idx: HashMap<String, SeenEntry>,
}

impl MailboxIndex {
    pub fn load(state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref().to_path_buf();
        let idx_path = state_dir.join("mailbox_seen.json");
        let idx = std::fs::read_to_string(&idx_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            state_dir,
            idx_path,
            idx,
        }
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).map_err(|e| CcccError::io(&self.state_dir, e))?;
        let data = serde_json::to_string_pretty(&self.idx)?;
        std::fs::write(&self.idx_path, data).map_err(|e| CcccError::io(&self.idx_path, e))
    }

    fn key_for(peer: Peer, fname: &str) -> String {
        format!("{}:{}", peer.folder_name(), fname)
    }

    fn seen_hash(&self, peer: Peer, fname: &str) -> String {
        self.idx
            .get(&Self::key_for(peer, fname))
            .map(|e| e.sha.clone())
            .unwrap_or_default()
    }

    fn update_hash(&mut self, peer: Peer, fname: &str, sha: String) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.idx.insert(Self::key_for(peer, fname), SeenEntry { sha, ts });
    }

    pub fn delete(state_dir: &Path) -> Result<()> {
        let path = state_dir.join("mailbox_seen.json");
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CcccError::io(path, e)),
        }
    }
}

/// Root-relative paths for the mailbox tree under `<home>/mailbox`.
pub struct MailboxStore {
    home: PathBuf,
}

impl MailboxStore {
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self { home: home.as_ref().to_path_buf() }
    }

    pub fn peer_dir(&self, peer: Peer) -> PathBuf {
        self.home.join("mailbox").join(peer.folder_name())
    }

    pub fn inbox_dir(&self, peer: Peer) -> PathBuf {
        self.peer_dir(peer).join("inbox")
    }

    pub fn processed_dir(&self, peer: Peer) -> PathBuf {
        self.peer_dir(peer).join("processed")
    }

    pub fn channel_path(&self, peer: Peer, channel: Channel) -> PathBuf {
        self.peer_dir(peer).join(channel.file_name())
    }

    /// Idempotently create the mailbox tree: per-peer directories, the three
    /// runtime message files, `inbox/`/`processed/`, a `.gitignore`, and the
    /// foreman sink.
    pub fn ensure_mailbox(&self) -> Result<()> {
        let base = self.home.join("mailbox");
        for peer in Peer::ALL {
            let dir = base.join(peer.folder_name());
            std::fs::create_dir_all(&dir).map_err(|e| CcccError::io(&dir, e))?;
            for fname in ["to_user.md", "to_peer.md", "inbox.md"] {
                let f = dir.join(fname);
                if !f.exists() {
                    std::fs::write(&f, "").map_err(|e| CcccError::io(&f, e))?;
                }
            }
            std::fs::create_dir_all(dir.join("inbox")).map_err(|e| CcccError::io(&dir, e))?;
            std::fs::create_dir_all(dir.join("processed")).map_err(|e| CcccError::io(&dir, e))?;
        }
        let gitignore = base.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n!/.gitignore\n").map_err(|e| CcccError::io(&gitignore, e))?;
        }
        let foreman_dir = base.join("foreman");
        std::fs::create_dir_all(&foreman_dir).map_err(|e| CcccError::io(&foreman_dir, e))?;
        let foreman_to_peer = foreman_dir.join("to_peer.md");
        if !foreman_to_peer.exists() {
            std::fs::write(&foreman_to_peer, "").map_err(|e| CcccError::io(&foreman_to_peer, e))?;
        }
        Ok(())
    }

    /// Clear message files, empty `inbox/` (keeping `processed/`), and drop
    /// the seen-index. Idempotent.
    pub fn reset_mailbox(&self, state_dir: &Path) -> Result<()> {
        self.ensure_mailbox()?;
        for peer in Peer::ALL {
            let dir = self.peer_dir(peer);
            for fname in ["to_user.md", "to_peer.md", "inbox.md"] {
                let f = dir.join(fname);
                let _ = std::fs::write(&f, "");
            }
            if let Ok(read_dir) = std::fs::read_dir(dir.join("inbox")) {
                for entry in read_dir.flatten() {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        MailboxIndex::delete(state_dir)
    }

    /// Read one channel file, decode it robustly, and report whether its
    /// trimmed content differs from `last_sha`. Empty and sentinel-only
    /// content is always reported as unchanged.
    async fn read_if_changed(
        &self,
        path: &Path,
        last_sha: &str,
        ledger: &dyn LedgerSink,
    ) -> Option<(String, String)> {
        let raw = std::fs::read(path).ok()?;
        let decode::Decoded { text, encoding, lossy } = smart_decode(&raw);
        let text = text.trim().to_string();
        if text.is_empty() {
            return None;
        }
        if is_sentinel_text(&text) {
            return None;
        }
        let sha = sha256_text(&text);
        if lossy && sha != last_sha {
            let prefix_hex: String = raw.iter().take(24).map(|b| format!("{b:02x}")).collect();
            let nul_ratio = raw.iter().filter(|&&b| b == 0).count() as f64 / raw.len().max(1) as f64;
            let fields = entry(
                "mailbox-diag",
                [
                    ("file", serde_json::Value::String(path.display().to_string())),
                    ("encoding", serde_json::Value::String(encoding.to_string())),
                    ("bytes", serde_json::Value::from(raw.len())),
                    ("prefix_hex", serde_json::Value::String(prefix_hex)),
                    ("nul_ratio", serde_json::Value::from((nul_ratio * 10_000.0).round() / 10_000.0)),
                ],
            );
            if let Err(e) = ledger.log(fields).await {
                warn!(error = %e, "failed to write mailbox-diag ledger entry");
            }
        }
        if sha != last_sha {
            Some((text, sha))
        } else {
            None
        }
    }

    /// Scan both peers' `to_user.md`/`to_peer.md`, updating `idx` in place
    /// for every channel that changed.
    pub async fn scan_mailboxes(
        &self,
        idx: &mut MailboxIndex,
        ledger: &dyn LedgerSink,
    ) -> Result<HashMap<Peer, PeerEvents>> {
        self.ensure_mailbox()?;
        let mut events = HashMap::new();
        for peer in Peer::ALL {
            let dir = self.peer_dir(peer);
            let mut peer_events = PeerEvents::default();

            let last = idx.seen_hash(peer, "to_user.md");
            if let Some((text, sha)) = self
                .read_if_changed(&dir.join("to_user.md"), &last, ledger)
                .await
            {
                idx.update_hash(peer, "to_user.md", sha);
                peer_events.to_user = Some(MailboxEvent { text });
            }

            let last = idx.seen_hash(peer, "to_peer.md");
            if let Some((text, sha)) = self
                .read_if_changed(&dir.join("to_peer.md"), &last, ledger)
                .await
            {
                idx.update_hash(peer, "to_peer.md", sha);
                peer_events.to_peer = Some(MailboxEvent { text });
            }

            events.insert(peer, peer_events);
        }
        Ok(events)
    }

    /// Overwrite a channel file with a sentinel comment, marking it consumed.
    pub fn write_sentinel(&self, peer: Peer, channel: Channel, ts: &str, eid: &str, sha8: &str, route: &str) -> Result<()> {
        let path = self.channel_path(peer, channel);
        let line = sentinel::compose_sentinel(ts, eid, sha8, route);
        std::fs::write(&path, line).map_err(|e| CcccError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::JsonlLedger;

    fn store(dir: &Path) -> (MailboxStore, PathBuf) {
        let home = dir.to_path_buf();
        (MailboxStore::new(&home), home.join("state"))
    }

    #[tokio::test]
    async fn ensure_mailbox_creates_full_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, _state) = store(tmp.path());
        store.ensure_mailbox().unwrap();
        for peer in Peer::ALL {
            assert!(store.inbox_dir(peer).is_dir());
            assert!(store.processed_dir(peer).is_dir());
            assert!(store.channel_path(peer, Channel::ToUser).is_file());
        }
        assert!(tmp.path().join("mailbox/foreman/to_peer.md").is_file());
    }

    #[tokio::test]
    async fn scan_reports_new_nonempty_content_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, state) = store(tmp.path());
        store.ensure_mailbox().unwrap();
        std::fs::write(store.channel_path(Peer::PeerA, Channel::ToUser), "hello").unwrap();

        let mut idx = MailboxIndex::load(&state);
        let ledger = JsonlLedger::open(state.join("ledger.jsonl")).unwrap();

        let events = store.scan_mailboxes(&mut idx, &ledger).await.unwrap();
        assert_eq!(events[&Peer::PeerA].to_user.as_ref().unwrap().text, "hello");

        // Unchanged on the next tick.
        let events = store.scan_mailboxes(&mut idx, &ledger).await.unwrap();
        assert!(events[&Peer::PeerA].to_user.is_none());
    }

    #[tokio::test]
    async fn sentinel_content_never_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, state) = store(tmp.path());
        store.ensure_mailbox().unwrap();
        store
            .write_sentinel(Peer::PeerA, Channel::ToUser, "2025-01-01T00:00:00Z", "abc123", "deadbeef", "PeerA→User")
            .unwrap();

        let mut idx = MailboxIndex::load(&state);
        let ledger = JsonlLedger::open(state.join("ledger.jsonl")).unwrap();
        let events = store.scan_mailboxes(&mut idx, &ledger).await.unwrap();
        assert!(events[&Peer::PeerA].to_user.is_none());
    }

    #[tokio::test]
    async fn reset_clears_inbox_but_keeps_processed() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, state) = store(tmp.path());
        store.ensure_mailbox().unwrap();
        std::fs::write(store.inbox_dir(Peer::PeerA).join("000001.cccc-1.txt"), "x").unwrap();
        std::fs::write(store.processed_dir(Peer::PeerA).join("000001.cccc-1.txt"), "x").unwrap();
        std::fs::write(store.channel_path(Peer::PeerA, Channel::ToUser), "hi").unwrap();

        store.reset_mailbox(&state).unwrap();

        assert_eq!(std::fs::read_to_string(store.channel_path(Peer::PeerA, Channel::ToUser)).unwrap(), "");
        assert!(std::fs::read_dir(store.inbox_dir(Peer::PeerA)).unwrap().next().is_none());
        assert!(store.processed_dir(Peer::PeerA).join("000001.cccc-1.txt").exists());
        assert!(!state.join("mailbox_seen.json").exists());
    }
}
