//! C11 — Bridge Supervisor: spawns and respawns an outbound adapter process
//! (e.g. a Telegram/Slack bridge) per [`BridgeConfig`], tracks its PID on
//! disk, and rate-limits warning logs so a crash-looping bridge doesn't
//! flood the ledger.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::{CcccError, Result};

const WARNING_COOLDOWN: Duration = Duration::from_secs(300);

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Default, Serialize, Deserialize)]
struct WarningLedger {
    #[serde(flatten)]
    last_warned: HashMap<String, f64>,
}

struct RunningBridge {
    child: Child,
    pid_path: PathBuf,
}

/// One supervised bridge process, identified by a short name (e.g. `"telegram"`).
pub struct BridgeSupervisor {
    name: String,
    config: BridgeConfig,
    command: String,
    args: Vec<String>,
    state_dir: PathBuf,
    running: Option<RunningBridge>,
    last_warning_check: Instant,
}

impl BridgeSupervisor {
    pub fn new(name: impl Into<String>, config: BridgeConfig, command: impl Into<String>, args: Vec<String>, state_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            config,
            command: command.into(),
            args,
            state_dir: state_dir.as_ref().to_path_buf(),
            running: None,
            last_warning_check: Instant::now() - WARNING_COOLDOWN,
        }
    }

    fn pid_path(&self) -> PathBuf {
        self.state_dir.join(format!("bridge-{}.pid", self.name))
    }

    fn warnings_path(&self) -> PathBuf {
        self.state_dir.join("bridge-warnings.json")
    }

    pub fn is_running(&mut self) -> bool {
        match &mut self.running {
            Some(rb) => matches!(rb.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Start the bridge process if `autostart` is enabled and it isn't
    /// already running.
    pub async fn ensure_started(&mut self) -> Result<()> {
        if !self.config.autostart || self.is_running() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.state_dir).map_err(|e| CcccError::io(&self.state_dir, e))?;

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args);
        if let Some(token) = &self.config.token {
            cmd.env("CCCC_BRIDGE_TOKEN", token);
        } else if let Some(env_var) = &self.config.token_env {
            if let Ok(val) = std::env::var(env_var) {
                cmd.env("CCCC_BRIDGE_TOKEN", val);
            }
        }

        let child = cmd
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CcccError::Internal(format!("failed to spawn bridge {}: {e}", self.name)))?;

        let pid_path = self.pid_path();
        if let Some(pid) = child.id() {
            let _ = std::fs::write(&pid_path, pid.to_string());
        }
        info!(bridge = %self.name, "bridge started");
        self.running = Some(RunningBridge { child, pid_path });
        Ok(())
    }

    /// Reap a dead child and clean up its PID file, recording a rate-limited
    /// warning if it exited non-zero.
    pub async fn reap_if_exited(&mut self) -> Result<()> {
        let Some(rb) = &mut self.running else { return Ok(()) };
        match rb.child.try_wait() {
            Ok(Some(status)) => {
                let _ = std::fs::remove_file(&rb.pid_path);
                if !status.success() {
                    self.warn_rate_limited(&format!("bridge {} exited with {status}", self.name))?;
                }
                self.running = None;
            }
            Ok(None) => {}
            Err(e) => warn!(bridge = %self.name, error = %e, "failed to poll bridge child"),
        }
        Ok(())
    }

    fn warn_rate_limited(&mut self, message: &str) -> Result<()> {
        if self.last_warning_check.elapsed() < WARNING_COOLDOWN {
            return Ok(());
        }
        self.last_warning_check = Instant::now();

        let path = self.warnings_path();
        let mut ledger: WarningLedger = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let now = unix_now();
        let recently_warned = ledger
            .last_warned
            .get(&self.name)
            .is_some_and(|t| now - t < WARNING_COOLDOWN.as_secs_f64());
        if !recently_warned {
            warn!(bridge = %self.name, "{message}");
            ledger.last_warned.insert(self.name.clone(), now);
            if let Ok(data) = serde_json::to_string_pretty(&ledger) {
                let _ = std::fs::write(&path, data);
            }
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut rb) = self.running.take() {
            let _ = rb.child.kill().await;
            let _ = std::fs::remove_file(&rb.pid_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_and_warnings_paths_are_namespaced_per_bridge() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = BridgeSupervisor::new("telegram", BridgeConfig::default(), "true", vec![], tmp.path());
        assert_eq!(sup.pid_path(), tmp.path().join("bridge-telegram.pid"));
    }
}
