//! Sequenced-inbox writer. Guarantees invariant 1: per-peer inbox file names
//! are strictly increasing and never reused, even across restarts.
//!
//! Locking uses a plain mkdir-retry lock directory rather than a platform
//! advisory file lock, so the same code path works identically on every
//! target this crate builds for.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::sleep;

use crate::error::{CcccError, Result};
use crate::types::Peer;

use super::mid::inject_ts_after_mid;

fn lock_dir(state_dir: &Path, peer: Peer) -> PathBuf {
    state_dir.join(format!("inbox-seq-{}.lckdir", peer.folder_name()))
}

fn counter_path(state_dir: &Path, peer: Peer) -> PathBuf {
    state_dir.join(format!("inbox-seq-{}.txt", peer.folder_name()))
}

async fn acquire_lock(path: &Path) -> bool {
    for _ in 0..50 {
        if std::fs::create_dir(path).is_ok() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

fn release_lock(path: &Path) {
    let _ = std::fs::remove_dir(path);
}

fn max_seq_in(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.get(0..6).filter(|s| s.chars().all(|c| c.is_ascii_digit()))
                .and_then(|s| s.parse::<u64>().ok())
        })
        .max()
        .unwrap_or(0)
}

fn compute_next_seq(counter_path: &Path, inbox_dir: &Path, processed_dir: &Path) -> u64 {
    if let Ok(contents) = std::fs::read_to_string(counter_path) {
        if let Ok(val) = contents.trim().parse::<u64>() {
            return val + 1;
        }
    }
    max_seq_in(inbox_dir).max(max_seq_in(processed_dir)) + 1
}

/// Write `payload` (with `[TS: ...]` injected after its `[MID: ...]` line) as
/// the next sequenced file in `peer`'s inbox. Returns the zero-padded
/// sequence string and the path written.
pub async fn write_inbox_message(
    state_dir: &Path,
    inbox_dir: &Path,
    processed_dir: &Path,
    peer: Peer,
    payload: &str,
    mid: &str,
) -> Result<(String, PathBuf)> {
    std::fs::create_dir_all(state_dir).map_err(|e| CcccError::io(state_dir, e))?;
    std::fs::create_dir_all(inbox_dir).map_err(|e| CcccError::io(inbox_dir, e))?;
    std::fs::create_dir_all(processed_dir).map_err(|e| CcccError::io(processed_dir, e))?;

    let lock_path = lock_dir(state_dir, peer);
    let counter = counter_path(state_dir, peer);
    let acquired = acquire_lock(&lock_path).await;

    let result = (|| -> Result<(String, PathBuf)> {
        let next = compute_next_seq(&counter, inbox_dir, processed_dir);
        let seq = format!("{next:06}");
        let fpath = inbox_dir.join(format!("{seq}.{mid}.txt"));
        std::fs::write(&fpath, inject_ts_after_mid(payload)).map_err(|e| CcccError::io(&fpath, e))?;
        let _ = std::fs::write(&counter, next.to_string());
        Ok((seq, fpath))
    })();

    if acquired {
        release_lock(&lock_path);
    } else {
        return Err(CcccError::LockContention(lock_path));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_is_monotonic_across_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let state = tmp.path().join("state");
        let inbox = tmp.path().join("inbox");
        let processed = tmp.path().join("processed");

        let (seq1, _) = write_inbox_message(&state, &inbox, &processed, Peer::PeerA, "[MID: m1]\nfirst", "m1")
            .await
            .unwrap();
        let (seq2, _) = write_inbox_message(&state, &inbox, &processed, Peer::PeerA, "[MID: m2]\nsecond", "m2")
            .await
            .unwrap();
        assert_eq!(seq1, "000001");
        assert_eq!(seq2, "000002");
    }

    #[tokio::test]
    async fn restart_resumes_past_max_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let state = tmp.path().join("state");
        let inbox = tmp.path().join("inbox");
        let processed = tmp.path().join("processed");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("000007.cccc-x.txt"), "x").unwrap();

        let (seq, _) = write_inbox_message(&state, &inbox, &processed, Peer::PeerA, "[MID: m]\nbody", "m")
            .await
            .unwrap();
        assert_eq!(seq, "000008");
    }
}
