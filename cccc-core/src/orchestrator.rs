//! C12 — Orchestrator Loop: the ~5Hz tick that drives every other component
//! in a fixed order: drain commands, scan mailboxes, route handoffs,
//! deliver queued inbox messages, nudge on stalled progress, run the
//! foreman, supervise bridges, then snapshot status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bridge::BridgeSupervisor;
use crate::command_queue::{CommandQueue, CommandRecord};
use crate::config::{CliProfiles, DeliveryConfig, ForemanConfig, KeepaliveConfig};
use crate::delivery::{new_mid, wrap_with_mid, write_inbox_message, DeliveryEngine};
use crate::error::Result;
use crate::foreman::{ForemanRunner, ForemanScheduler};
use crate::handoff::{FilterConfig, HandoffRouter, NoopTeachIntercept};
use crate::keepalive::KeepaliveScheduler;
use crate::ledger::{entry, JsonlLedger, LedgerSink};
use crate::mailbox::{MailboxIndex, MailboxStore};
use crate::outbox::OutboxWriter;
use crate::status::{ResetSnapshot, SetupSnapshot, StatusInputs, StatusWriter};
use crate::types::Peer;

/// Everything the orchestrator needs to find on disk and in tmux.
pub struct OrchestratorConfig {
    pub home: PathBuf,
    pub state_dir: PathBuf,
    pub commands_path: PathBuf,
    pub session_name: String,
    pub panes: HashMap<Peer, String>,
    pub profiles: CliProfiles,
    pub delivery: DeliveryConfig,
    pub keepalive: KeepaliveConfig,
    pub foreman: ForemanConfig,
    pub handoff_filter: FilterConfig,
    pub tick_interval: Duration,
}

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    store: MailboxStore,
    index: MailboxIndex,
    ledger: JsonlLedger,
    outbox: OutboxWriter,
    engine: DeliveryEngine,
    router: HandoffRouter,
    keepalive: KeepaliveScheduler,
    foreman: ForemanScheduler,
    commands: CommandQueue,
    status: StatusWriter,
    bridges: Vec<BridgeSupervisor>,
    paused: bool,
    require_ack_override: Option<bool>,
}

impl Orchestrator {
    pub fn new(cfg: OrchestratorConfig) -> Result<Self> {
        let store = MailboxStore::new(&cfg.home);
        store.ensure_mailbox()?;
        let index = MailboxIndex::load(&cfg.state_dir);
        let ledger = JsonlLedger::open(cfg.state_dir.join("ledger.jsonl"))?;
        let outbox = OutboxWriter::open(&cfg.state_dir)?;

        let mut profile_map = HashMap::new();
        for peer in Peer::ALL {
            profile_map.insert(peer, cfg.profiles.profile_for(peer));
        }
        let engine = DeliveryEngine::new(&cfg.state_dir, &cfg.panes, &profile_map)?;
        let router = HandoffRouter::new(cfg.handoff_filter, Box::new(NoopTeachIntercept));
        let keepalive = KeepaliveScheduler::new(cfg.keepalive);
        let foreman = ForemanScheduler::new(cfg.foreman.clone(), &cfg.state_dir);
        let commands = CommandQueue::init(&[cfg.commands_path.clone()], cfg.state_dir.join("scan.json"));
        let status = StatusWriter::new(&cfg.state_dir);

        Ok(Self {
            store,
            index,
            ledger,
            outbox,
            engine,
            router,
            keepalive,
            foreman,
            commands,
            status,
            bridges: Vec::new(),
            paused: false,
            require_ack_override: None,
            cfg,
        })
    }

    pub fn add_bridge(&mut self, bridge: BridgeSupervisor) {
        self.bridges.push(bridge);
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("orchestrator shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.cfg.tick_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "tick failed");
                    }
                }
            }
        }
        for bridge in &mut self.bridges {
            bridge.shutdown().await;
        }
        Ok(())
    }

    async fn dispatch_commands(&mut self) -> Result<()> {
        let records: Vec<CommandRecord> = self.commands.poll(&self.cfg.commands_path)?;
        for cmd in records {
            let (ok, message) = match cmd.action.as_str() {
                "pause" => {
                    self.paused = true;
                    (true, "paused".to_string())
                }
                "resume" => {
                    self.paused = false;
                    (true, "resumed".to_string())
                }
                "foreman-on" => self.foreman.command("on").map(|m| (true, m)).unwrap_or_else(|e| (false, e.to_string())),
                "foreman-off" => self.foreman.command("off").map(|m| (true, m)).unwrap_or_else(|e| (false, e.to_string())),
                "foreman-now" => self.foreman.command("now").map(|m| (true, m)).unwrap_or_else(|e| (false, e.to_string())),
                "foreman-status" => self.foreman.command("status").map(|m| (true, m)).unwrap_or_else(|e| (false, e.to_string())),
                "reset-mailbox" => match self.store.reset_mailbox(&self.cfg.state_dir) {
                    Ok(()) => (true, "mailbox reset".to_string()),
                    Err(e) => (false, e.to_string()),
                },
                other => (false, format!("unknown command: {other}")),
            };
            CommandQueue::append_result(&self.cfg.commands_path, &cmd.id, ok, &message, serde_json::json!({}))?;
        }
        self.commands.save_snapshot()?;
        Ok(())
    }

    async fn run_foreman_if_due(&mut self) -> Result<()> {
        struct Noop;
        #[async_trait::async_trait]
        impl ForemanRunner for Noop {
            async fn run(&self) -> Result<i32> {
                Ok(0)
            }
        }
        self.foreman.tick(Arc::new(Noop), &self.ledger).await
    }

    async fn write_status_snapshot(&self) -> Result<()> {
        let inputs = StatusInputs {
            session: self.cfg.session_name.clone(),
            paused: self.paused,
            phase: if self.paused { "paused".into() } else { "running".into() },
            require_ack: self.require_ack_override.unwrap_or(self.cfg.delivery.require_ack),
            mailbox_counts: HashMap::new(),
            mailbox_last: HashMap::new(),
            handoff_filter_enabled: true,
            por: serde_json::Value::Null,
            aux: serde_json::Value::Null,
            reset: ResetSnapshot::default(),
            foreman: Some(self.foreman.status()),
            setup: SetupSnapshot::default(),
        };
        self.status.write_status(&inputs)?;
        self.status
            .write_queue_and_locks(&HashMap::new(), &HashMap::new(), &[])?;
        Ok(())
    }

    /// One full pass: commands, mailbox scan, handoff routing, inbox
    /// delivery, keepalive nudges, foreman, bridges, status.
    pub async fn tick(&mut self) -> Result<()> {
        self.dispatch_commands().await?;

        if self.paused {
            self.write_status_snapshot().await?;
            return Ok(());
        }

        let events = self.store.scan_mailboxes(&mut self.index, &self.ledger).await?;
        self.index.save()?;

        for peer in Peer::ALL {
            let Some(ev) = events.get(&peer) else { continue };
            if let Some(to_user) = &ev.to_user {
                if let Some(hint) = self.keepalive.observe_payload(peer, &to_user.text) {
                    self.ledger
                        .log(entry(
                            "keepalive-armed",
                            [("peer", serde_json::Value::String(peer.folder_name().to_string())),
                             ("hint", serde_json::Value::String(hint))],
                        ))
                        .await?;
                }
            }
            if let Some(to_peer) = &ev.to_peer {
                if let Some(hint) = self.keepalive.observe_payload(peer, &to_peer.text) {
                    self.ledger
                        .log(entry(
                            "keepalive-armed",
                            [("peer", serde_json::Value::String(peer.folder_name().to_string())),
                             ("hint", serde_json::Value::String(hint))],
                        ))
                        .await?;
                }
            }
        }

        self.router
            .process_tick(&self.cfg.state_dir, &self.store, &self.outbox, &self.ledger, &events, false)
            .await?;

        for peer in Peer::ALL {
            self.deliver_next_inbox_message(peer).await?;

            let profile = self.cfg.profiles.profile_for(peer);
            if let Err(e) = self.engine.flush_outbox_if_idle(peer, &profile, &self.cfg.delivery).await {
                warn!(peer = %peer, error = %e, "failed flushing queued deliveries");
            }

            let inbox_empty = std::fs::read_dir(self.store.inbox_dir(peer))
                .map(|mut rd| rd.next().is_none())
                .unwrap_or(true);
            let inflight = self.engine.is_inflight(peer);
            let queued = self.engine.queued_count(peer).unwrap_or(0) > 0;

            if let Some(nudge) = self.keepalive.tick(peer, inbox_empty, inflight, queued, &self.ledger).await {
                let mid = new_mid();
                let wrapped = wrap_with_mid(&nudge, &mid);
                if let Err(e) = write_inbox_message(
                    &self.cfg.state_dir,
                    &self.store.inbox_dir(peer),
                    &self.store.processed_dir(peer),
                    peer,
                    &wrapped,
                    &mid,
                )
                .await
                {
                    warn!(peer = %peer, error = %e, "failed queuing keepalive nudge");
                }
            }
        }

        self.run_foreman_if_due().await?;

        for bridge in &mut self.bridges {
            bridge.reap_if_exited().await?;
            bridge.ensure_started().await?;
        }

        self.write_status_snapshot().await?;
        Ok(())
    }

    /// Pop the oldest unprocessed inbox file for `peer` (if any), attempt
    /// delivery into its pane, and move it to `processed/` once sent.
    ///
    /// Sequenced inbox files are named `<seq>.<mid>.txt` and already carry
    /// a `[MID: ...]` line stamped by whoever wrote them (`write_inbox_message`
    /// callers); the MID is read back from the filename rather than assigned
    /// again here, so it is never wrapped twice.
    async fn deliver_next_inbox_message(&mut self, peer: Peer) -> Result<()> {
        let inbox_dir = self.store.inbox_dir(peer);
        let mut entries: Vec<_> = match std::fs::read_dir(&inbox_dir) {
            Ok(rd) => rd.flatten().collect(),
            Err(_) => return Ok(()),
        };
        entries.sort_by_key(|e| e.file_name());
        let Some(oldest) = entries.into_iter().next() else { return Ok(()) };

        let path = oldest.path();
        let Ok(payload) = std::fs::read_to_string(&path) else { return Ok(()) };
        let Some(mid) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(mid_from_inbox_filename)
        else {
            warn!(peer = %peer, path = %path.display(), "inbox file name missing mid, skipping");
            return Ok(());
        };
        let profile = self.cfg.profiles.profile_for(peer);

        self.engine
            .deliver_or_queue(peer, mid, &payload, &profile, &self.cfg.delivery)
            .await?;

        let processed_dir = self.store.processed_dir(peer);
        std::fs::create_dir_all(&processed_dir).ok();
        if let Some(fname) = path.file_name() {
            let _ = std::fs::rename(&path, processed_dir.join(fname));
        }
        Ok(())
    }
}

/// `<seq>.<mid>.txt` -> `<mid>`, matching the shape `write_inbox_message` writes.
fn mid_from_inbox_filename(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(".txt")?;
    let (_, mid) = stem.split_once('.')?;
    Some(mid)
}
