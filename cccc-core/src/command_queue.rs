//! C9 — Command Queue: tails one or more append-only `commands.jsonl` files
//! for new operator-issued commands and appends their results back as JSONL.
//!
//! Offsets are restored from a `scan.json` snapshot on startup; when no
//! snapshot exists, a fresh file starts at its current end-of-file rather
//! than replaying everything ever appended to it.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CcccError, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct CommandRecord {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Default, Serialize, Deserialize)]
struct OffsetSnapshot {
    #[serde(flatten)]
    offsets: HashMap<String, u64>,
}

pub struct CommandQueue {
    scan_path: PathBuf,
    offsets: HashMap<PathBuf, u64>,
}

impl CommandQueue {
    /// Restore offsets from `scan_path`'s snapshot (if present); any path in
    /// `commands_paths` missing from the snapshot is seeded at its current
    /// EOF so pre-existing lines are never replayed as "new".
    pub fn init(commands_paths: &[PathBuf], scan_path: impl AsRef<Path>) -> Self {
        let scan_path = scan_path.as_ref().to_path_buf();
        let snapshot: OffsetSnapshot = std::fs::read_to_string(&scan_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let mut offsets = HashMap::new();
        for path in commands_paths {
            let key = path.to_string_lossy().into_owned();
            let offset = snapshot
                .offsets
                .get(&key)
                .copied()
                .unwrap_or_else(|| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0));
            offsets.insert(path.clone(), offset);
        }
        Self { scan_path, offsets }
    }

    pub fn save_snapshot(&self) -> Result<()> {
        let offsets: HashMap<String, u64> = self
            .offsets
            .iter()
            .map(|(p, o)| (p.to_string_lossy().into_owned(), *o))
            .collect();
        let data = serde_json::to_string_pretty(&OffsetSnapshot { offsets })?;
        if let Some(parent) = self.scan_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CcccError::io(parent, e))?;
        }
        std::fs::write(&self.scan_path, data).map_err(|e| CcccError::io(&self.scan_path, e))
    }

    /// Read and parse any lines appended to `commands_path` since the last
    /// poll. Malformed lines are skipped, not fatal.
    pub fn poll(&mut self, commands_path: &Path) -> Result<Vec<CommandRecord>> {
        let offset = *self.offsets.get(commands_path).unwrap_or(&0);
        let mut file = match std::fs::File::open(commands_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CcccError::io(commands_path, e)),
        };
        let len = file.metadata().map_err(|e| CcccError::io(commands_path, e))?.len();
        if len < offset {
            // File was truncated/rotated; restart from the top.
            self.offsets.insert(commands_path.to_path_buf(), 0);
            return self.poll(commands_path);
        }
        if len == offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(offset)).map_err(|e| CcccError::io(commands_path, e))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).map_err(|e| CcccError::io(commands_path, e))?;

        let records = buf
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<CommandRecord>(l).ok())
            .collect();

        self.offsets.insert(commands_path.to_path_buf(), len);
        Ok(records)
    }

    /// Append `{"id": cmd_id, "result": {"ok": ok, "message": message, ...}}`
    /// to `commands_path`.
    pub fn append_result(commands_path: &Path, cmd_id: &str, ok: bool, message: &str, extra: Value) -> Result<()> {
        let mut result = serde_json::json!({ "ok": ok, "message": message });
        if let (Value::Object(result_obj), Value::Object(extra_obj)) = (&mut result, extra) {
            for (k, v) in extra_obj {
                result_obj.insert(k, v);
            }
        }
        let line = serde_json::to_string(&serde_json::json!({ "id": cmd_id, "result": result }))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(commands_path)
            .map_err(|e| CcccError::io(commands_path, e))?;
        use std::io::Write;
        writeln!(file, "{line}").map_err(|e| CcccError::io(commands_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn fresh_file_starts_at_eof_not_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let cmds = tmp.path().join("commands.jsonl");
        std::fs::write(&cmds, "{\"id\":\"1\",\"action\":\"pause\"}\n").unwrap();

        let mut q = CommandQueue::init(&[cmds.clone()], tmp.path().join("scan.json"));
        assert!(q.poll(&cmds).unwrap().is_empty());

        std::fs::OpenOptions::new()
            .append(true)
            .open(&cmds)
            .unwrap()
            .write_all(b"{\"id\":\"2\",\"action\":\"resume\"}\n")
            .unwrap();
        let records = q.poll(&cmds).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "2");
    }

    #[test]
    fn snapshot_restores_prior_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let cmds = tmp.path().join("commands.jsonl");
        std::fs::write(&cmds, "{\"id\":\"1\",\"action\":\"pause\"}\n").unwrap();
        let scan = tmp.path().join("scan.json");

        let mut q = CommandQueue::init(&[cmds.clone()], &scan);
        q.poll(&cmds).unwrap();
        q.save_snapshot().unwrap();

        let mut q2 = CommandQueue::init(&[cmds.clone()], &scan);
        assert!(q2.poll(&cmds).unwrap().is_empty());
    }

    #[test]
    fn append_result_writes_expected_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let cmds = tmp.path().join("commands.jsonl");
        std::fs::write(&cmds, "").unwrap();
        CommandQueue::append_result(&cmds, "abc", true, "done", serde_json::json!({})).unwrap();
        let content = std::fs::read_to_string(&cmds).unwrap();
        assert!(content.contains("\"id\":\"abc\""));
        assert!(content.contains("\"ok\":true"));
    }
}
