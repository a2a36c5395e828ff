use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Local;
use serde_json::{Map, Value};

use crate::error::{CcccError, Result};

/// Sink for free-form internal-audit entries (`state/ledger.jsonl`).
///
/// Entries carry a `kind` string plus whatever other fields the caller
/// supplies; CCCC does not interpret ledger content, it only appends it.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn log(&self, fields: Map<String, Value>) -> Result<()>;
}

/// Append-only JSONL ledger writer, one process-wide writer per file.
pub struct JsonlLedger {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl fmt::Debug for JsonlLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonlLedger").field("path", &self.path).finish()
    }
}

impl JsonlLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CcccError::io(parent, e))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CcccError::io(&path, e))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerSink for JsonlLedger {
    async fn log(&self, mut fields: Map<String, Value>) -> Result<()> {
        fields.insert(
            "ts".to_string(),
            Value::String(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        let line = serde_json::to_string(&Value::Object(fields))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| CcccError::Internal("ledger mutex poisoned".into()))?;
        writeln!(file, "{line}").map_err(|e| CcccError::io(&self.path, e))?;
        Ok(())
    }
}

/// Convenience macro-free helper to build a ledger entry from `(key, value)` pairs.
pub fn entry<const N: usize>(kind: &str, fields: [(&str, Value); N]) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("kind".to_string(), Value::String(kind.to_string()));
    for (k, v) in fields {
        map.insert(k.to_string(), v);
    }
    map
}
