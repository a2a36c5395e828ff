//! C7 — Foreman Scheduler: periodically runs a supervisory agent pass
//! against the peers, guarded by a lockfile so overlapping runs (including
//! across a process restart) can't happen. A run is considered stale, and
//! its lock reclaimed, once it has been held for `max_run_seconds + 20`.
//!
//! The run itself is a `tokio::spawn`ed background task, not an inline
//! `.await`, so a slow foreman pass never blocks the orchestrator's own
//! tick loop. `tick` starts a due run (if none is in flight) and reaps a
//! finished one; both happen on the regular ~5Hz tick, same as
//! [`crate::bridge::BridgeSupervisor`]'s child-process reaping.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::ForemanConfig;
use crate::error::{CcccError, Result};
use crate::ledger::{entry, LedgerSink};

const STALE_GRACE_SECONDS: f64 = 20.0;

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Executes one foreman pass. Implemented by the orchestrator binary, which
/// knows how to drive the actual agent process.
#[async_trait]
pub trait ForemanRunner: Send + Sync {
    async fn run(&self) -> Result<i32>;
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct ForemanStatus {
    pub enabled: bool,
    pub running: bool,
    pub next_due: Option<f64>,
    pub last: Option<f64>,
    pub last_rc: Option<i32>,
}

pub struct ForemanScheduler {
    config: ForemanConfig,
    lock_path: PathBuf,
    enabled: bool,
    next_due: Option<f64>,
    last_run: Option<f64>,
    last_rc: Option<i32>,
    queued_after_current: bool,
    running: Option<JoinHandle<Result<i32>>>,
}

impl ForemanScheduler {
    pub fn new(config: ForemanConfig, state_dir: impl AsRef<Path>) -> Self {
        let enabled = config.enabled;
        let next_due = if enabled { Some(unix_now() + config.interval_seconds) } else { None };
        Self {
            lock_path: state_dir.as_ref().join("foreman.lock"),
            enabled,
            next_due,
            last_run: None,
            last_rc: None,
            queued_after_current: false,
            running: None,
            config,
        }
    }

    /// `on`/`off`/`now`/`status`, matching the command-queue action surface.
    pub fn command(&mut self, action: &str) -> Result<String> {
        match action {
            "on" => {
                if !self.config.allowed {
                    return Err(CcccError::Internal("foreman not allowed for this session".into()));
                }
                self.enabled = true;
                self.next_due = Some(unix_now() + self.config.interval_seconds);
                Ok("foreman enabled".into())
            }
            "off" => {
                self.enabled = false;
                self.next_due = None;
                self.queued_after_current = false;
                Ok("foreman disabled".into())
            }
            "now" => {
                if !self.config.allowed {
                    return Err(CcccError::Internal("foreman not allowed for this session".into()));
                }
                if self.lock_path.exists() {
                    self.queued_after_current = true;
                    return Ok("Foreman already running; queued one run after current finishes.".into());
                }
                self.next_due = Some(unix_now());
                Ok("foreman run scheduled immediately".into())
            }
            "status" => Ok(serde_json::to_string(&self.status()).unwrap_or_default()),
            other => Err(CcccError::Internal(format!("unknown foreman action: {other}"))),
        }
    }

    pub fn status(&self) -> ForemanStatus {
        ForemanStatus {
            enabled: self.enabled,
            running: self.running.is_some() || self.lock_path.exists(),
            next_due: self.next_due,
            last: self.last_run,
            last_rc: self.last_rc,
        }
    }

    fn lock_age(&self) -> Option<f64> {
        let contents = std::fs::read_to_string(&self.lock_path).ok()?;
        let started: f64 = contents.trim().parse().ok()?;
        Some(unix_now() - started)
    }

    /// Remove a lockfile held past `max_run_seconds + 20s`. Returns `true`
    /// if a stale lock was actually reclaimed.
    fn reclaim_if_stale(&self) -> bool {
        if let Some(age) = self.lock_age() {
            if age > self.config.max_run_seconds + STALE_GRACE_SECONDS {
                let _ = std::fs::remove_file(&self.lock_path);
                return true;
            }
        }
        false
    }

    /// Start a due run (if none is in flight) and reap a finished one.
    /// Never blocks on the run itself.
    pub async fn tick(&mut self, runner: Arc<dyn ForemanRunner>, ledger: &dyn LedgerSink) -> Result<()> {
        self.reap(ledger).await?;

        if !self.enabled {
            return Ok(());
        }
        let Some(due) = self.next_due else { return Ok(()) };
        if unix_now() < due && !self.queued_after_current {
            return Ok(());
        }

        if self.running.is_some() {
            // Previous run still in flight; reap() will pick it up once done.
            return Ok(());
        }

        if self.reclaim_if_stale() {
            ledger.log(entry("foreman-stale-clean", [])).await?;
        }
        if self.lock_path.exists() {
            // Another process genuinely holds the lock; retry next tick if
            // queued, otherwise wait for the normal interval.
            if !self.queued_after_current {
                self.next_due = Some(unix_now() + self.config.interval_seconds);
            }
            return Ok(());
        }
        self.queued_after_current = false;

        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CcccError::io(parent, e))?;
        }
        std::fs::write(&self.lock_path, (unix_now() as i64).to_string())
            .map_err(|e| CcccError::io(&self.lock_path, e))?;

        self.running = Some(tokio::spawn(async move { runner.run().await }));
        Ok(())
    }

    /// Reap a finished background foreman run: clear the lockfile and record
    /// the outcome. No-op if nothing is running or it hasn't finished yet.
    async fn reap(&mut self, ledger: &dyn LedgerSink) -> Result<()> {
        let finished = matches!(&self.running, Some(h) if h.is_finished());
        if !finished {
            return Ok(());
        }
        let handle = self.running.take().expect("checked above");
        let outcome = match handle.await {
            Ok(inner) => inner,
            Err(e) => Err(CcccError::Internal(format!("foreman task panicked: {e}"))),
        };
        let _ = std::fs::remove_file(&self.lock_path);

        self.last_run = Some(unix_now());
        match outcome {
            Ok(rc) => {
                self.last_rc = Some(rc);
                ledger
                    .log(entry("foreman-run", [("rc", serde_json::Value::from(rc))]))
                    .await?;
            }
            Err(e) => {
                warn!(error = %e, "foreman run failed");
                self.last_rc = Some(-1);
                ledger
                    .log(entry(
                        "foreman-run-error",
                        [("error", serde_json::Value::String(e.to_string()))],
                    ))
                    .await?;
            }
        }
        self.next_due = Some(unix_now() + self.config.interval_seconds);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::JsonlLedger;

    struct AlwaysOk;
    #[async_trait]
    impl ForemanRunner for AlwaysOk {
        async fn run(&self) -> Result<i32> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn runs_immediately_when_due_now() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ForemanConfig::default();
        config.enabled = true;
        config.allowed = true;
        config.interval_seconds = 3600.0;
        let mut sched = ForemanScheduler::new(config, tmp.path());
        sched.next_due = Some(0.0);

        let ledger = JsonlLedger::open(tmp.path().join("ledger.jsonl")).unwrap();
        sched.tick(Arc::new(AlwaysOk), &ledger).await.unwrap();
        assert!(sched.running.is_some());
        assert!(sched.lock_path.exists());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        sched.tick(Arc::new(AlwaysOk), &ledger).await.unwrap();

        assert_eq!(sched.status().last_rc, Some(0));
        assert!(!sched.lock_path.exists());
    }

    #[test]
    fn on_requires_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = ForemanScheduler::new(ForemanConfig::default(), tmp.path());
        assert!(sched.command("on").is_err());
    }

    #[tokio::test]
    async fn now_while_locked_queues_instead_of_running_twice() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ForemanConfig::default();
        config.enabled = true;
        config.allowed = true;
        let mut sched = ForemanScheduler::new(config, tmp.path());

        std::fs::write(&sched.lock_path, "0").unwrap();
        let msg = sched.command("now").unwrap();
        assert!(msg.contains("queued one run after current finishes"));
        assert!(sched.queued_after_current);

        std::fs::remove_file(&sched.lock_path).unwrap();
        let ledger = JsonlLedger::open(tmp.path().join("ledger.jsonl")).unwrap();
        sched.next_due = Some(unix_now() + 3600.0);
        sched.tick(Arc::new(AlwaysOk), &ledger).await.unwrap();
        assert!(sched.running.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        sched.tick(Arc::new(AlwaysOk), &ledger).await.unwrap();

        assert!(!sched.queued_after_current);
        assert_eq!(sched.status().last_rc, Some(0));
    }
}
