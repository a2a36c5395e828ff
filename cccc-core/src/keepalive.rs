//! C6 — Keepalive Scheduler: watches outbound payloads for a `Progress:`
//! line and, if the peer goes quiet afterwards for too long, injects a
//! `<FROM_SYSTEM>` continuation nudge.
//!
//! This only covers the Progress/Next-triggered continuation nudge. The
//! separate inbox-arrival notice composed when a new message lands in a
//! peer's inbox is a property of the handoff/inbox-write path, not this
//! scheduler.
//!
//! A nudge is only sent when the peer's inbox is empty, nothing is
//! inflight, and nothing is queued for it — otherwise the scheduler logs
//! why it skipped (when `debug` is on) and clears the pending nudge rather
//! than retrying next tick.

use std::collections::HashMap;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::config::KeepaliveConfig;
use crate::ledger::{entry, LedgerSink};
use crate::types::Peer;

static PROGRESS_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^\s*(?:[-*]\s*)?Progress\s*(?:\(|:)\s*")
        .multi_line(true)
        .case_insensitive(true)
        .build()
        .expect("static regex")
});
static NEXT_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^\s*(?:[-*]\s*)?Next\s*(?:\(|:)\s*(.+)$")
        .multi_line(true)
        .case_insensitive(true)
        .build()
        .expect("static regex")
});

fn has_progress_event(text: &str) -> bool {
    PROGRESS_LINE_RE.is_match(text)
}

fn extract_next_hint(text: &str) -> Option<String> {
    NEXT_LINE_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Trailer appended after the synthesized keepalive body when an aux actor
/// is configured. Returns `None` for `aux_mode == "off"` or no actor name.
/// `peer` does not affect the text; it is threaded through so callers never
/// need to special-case which peer's nudge they're composing a suffix for.
pub fn nudge_suffix(_peer: Peer, aux_mode: &str, aux_actor: Option<&str>) -> Option<String> {
    if aux_mode == "off" {
        return None;
    }
    let actor = aux_actor?;
    if actor.is_empty() {
        return None;
    }
    Some(format!("(aux: {actor}, mode={aux_mode})"))
}

const SINGLE_PEER_TEMPLATE: &str = "Continue with your current task.\n\n\
If task is complete, summarize results in to_user.md.\n\
If blocked or need input, ask in to_user.md.\n\
Otherwise, continue working and log progress in to_peer.md.";

#[derive(Default)]
struct PeerTimer {
    due: Option<Instant>,
    hint: Option<String>,
    nudge_count: u32,
}

/// Tracks progress markers and decides when a continuation nudge is due.
pub struct KeepaliveScheduler {
    config: KeepaliveConfig,
    timers: HashMap<Peer, PeerTimer>,
}

impl KeepaliveScheduler {
    pub fn new(config: KeepaliveConfig) -> Self {
        let mut timers = HashMap::new();
        for peer in Peer::ALL {
            timers.insert(peer, PeerTimer::default());
        }
        Self { config, timers }
    }

    /// Feed an outbound `to_user`/`to_peer` payload from `peer` through the
    /// progress detector. A progress event (re)arms the keepalive timer,
    /// stores any `<NEXT>` hint for the eventual nudge, and resets the
    /// per-peer nudge budget.
    pub fn observe_payload(&mut self, peer: Peer, text: &str) -> Option<String> {
        if !has_progress_event(text) {
            return None;
        }
        let delay = if self.config.single_peer_mode {
            self.config.single_peer_delay_seconds
        } else {
            self.config.delay_seconds
        };
        let hint = extract_next_hint(text);
        let timer = self.timers.entry(peer).or_default();
        timer.due = Some(Instant::now() + std::time::Duration::from_secs_f64(delay.max(0.0)));
        timer.hint = hint.clone();
        timer.nudge_count = 0;
        hint
    }

    /// Called once per tick with the guard conditions for `peer`: whether
    /// its inbox is empty, whether a message is inflight, and whether
    /// anything sits in its retry queue. Returns the continuation nudge to
    /// deliver, if one is due and unblocked.
    pub async fn tick(
        &mut self,
        peer: Peer,
        inbox_empty: bool,
        inflight: bool,
        queued: bool,
        ledger: &dyn LedgerSink,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let timer = self.timers.entry(peer).or_default();
        let due = timer.due?;
        if Instant::now() < due {
            return None;
        }

        if self.config.single_peer_mode && timer.nudge_count >= self.config.single_peer_max_nudges {
            timer.due = None;
            if self.config.debug {
                let _ = ledger
                    .log(entry(
                        "keepalive-exhausted",
                        [("peer", Value::String(peer.folder_name().to_string()))],
                    ))
                    .await;
            }
            return None;
        }

        let skip_reason = if !inbox_empty {
            Some("inbox-not-empty")
        } else if inflight {
            Some("inflight")
        } else if queued {
            Some("queued")
        } else {
            None
        };
        if let Some(reason) = skip_reason {
            timer.due = None;
            if self.config.debug {
                let _ = ledger
                    .log(entry(
                        "keepalive-skipped",
                        [
                            ("peer", Value::String(peer.folder_name().to_string())),
                            ("reason", Value::String(reason.to_string())),
                        ],
                    ))
                    .await;
            }
            return None;
        }

        let hint = timer.hint.clone();
        timer.nudge_count += 1;

        let body = if self.config.single_peer_mode {
            SINGLE_PEER_TEMPLATE.to_string()
        } else {
            match hint.as_deref() {
                Some(h) => format!("OK. Continue: {h}."),
                None => "OK. Continue.".to_string(),
            }
        };

        if self.config.single_peer_mode && timer.nudge_count < self.config.single_peer_max_nudges {
            timer.due = Some(Instant::now() + std::time::Duration::from_secs_f64(self.config.single_peer_delay_seconds.max(0.0)));
        } else {
            timer.due = None;
        }

        let suffix = nudge_suffix(peer, &self.config.aux_mode, self.config.aux_actor.as_deref());
        let mut message = format!("<FROM_SYSTEM>\n{body}\n");
        if let Some(suffix) = &suffix {
            message.push_str(suffix);
            message.push('\n');
        }
        message.push_str("</FROM_SYSTEM>\n");

        let _ = ledger
            .log(entry(
                "keepalive-sent",
                [("peer", Value::String(peer.folder_name().to_string()))],
            ))
            .await;

        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    struct NoopLedger;
    #[async_trait::async_trait]
    impl LedgerSink for NoopLedger {
        async fn log(&self, _fields: Map<String, Value>) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn detects_progress_event_and_extracts_hint() {
        let mut sched = KeepaliveScheduler::new(KeepaliveConfig::default());
        let hint = sched.observe_payload(Peer::PeerA, "Progress: wrote the parser\nNext: write tests");
        assert_eq!(hint.as_deref(), Some("write tests"));
    }

    #[test]
    fn detects_bullet_prefixed_progress_line() {
        let mut sched = KeepaliveScheduler::new(KeepaliveConfig::default());
        assert!(sched.observe_payload(Peer::PeerA, "- Progress: refactored the parser").is_some());
    }

    #[test]
    fn ignores_payload_without_progress_marker() {
        let mut sched = KeepaliveScheduler::new(KeepaliveConfig::default());
        assert!(sched.observe_payload(Peer::PeerA, "just chatting").is_none());
    }

    #[tokio::test]
    async fn does_not_nudge_before_delay_elapses() {
        let mut sched = KeepaliveScheduler::new(KeepaliveConfig {
            delay_seconds: 9999.0,
            ..KeepaliveConfig::default()
        });
        sched.observe_payload(Peer::PeerA, "Progress: working");
        assert!(sched.tick(Peer::PeerA, true, false, false, &NoopLedger).await.is_none());
    }

    #[tokio::test]
    async fn nudges_once_delay_elapses() {
        let mut sched = KeepaliveScheduler::new(KeepaliveConfig {
            delay_seconds: 0.0,
            ..KeepaliveConfig::default()
        });
        sched.observe_payload(Peer::PeerA, "Progress: working\nNext: keep going");
        let nudge = sched.tick(Peer::PeerA, true, false, false, &NoopLedger).await;
        assert!(nudge.unwrap().contains("Continue: keep going"));
        assert!(sched.tick(Peer::PeerA, true, false, false, &NoopLedger).await.is_none());
    }

    #[tokio::test]
    async fn guard_conditions_skip_and_clear_pending_nudge() {
        let mut sched = KeepaliveScheduler::new(KeepaliveConfig {
            delay_seconds: 0.0,
            ..KeepaliveConfig::default()
        });
        sched.observe_payload(Peer::PeerA, "Progress: working");
        assert!(sched.tick(Peer::PeerA, false, false, false, &NoopLedger).await.is_none());
        // Pending nudge was cleared by the skip, not retried on an idle tick.
        assert!(sched.tick(Peer::PeerA, true, false, false, &NoopLedger).await.is_none());
    }

    #[tokio::test]
    async fn single_peer_mode_uses_richer_template_and_exhausts() {
        let mut sched = KeepaliveScheduler::new(KeepaliveConfig {
            single_peer_mode: true,
            single_peer_delay_seconds: 0.0,
            single_peer_max_nudges: 1,
            ..KeepaliveConfig::default()
        });
        sched.observe_payload(Peer::PeerA, "Progress: working");
        let nudge = sched.tick(Peer::PeerA, true, false, false, &NoopLedger).await;
        assert!(nudge.unwrap().contains("Continue with your current task"));
        assert!(sched.tick(Peer::PeerA, true, false, false, &NoopLedger).await.is_none());
    }

    #[test]
    fn nudge_suffix_is_none_when_aux_off() {
        assert!(nudge_suffix(Peer::PeerA, "off", Some("reviewer")).is_none());
        assert!(nudge_suffix(Peer::PeerA, "manual", None).is_none());
        assert_eq!(
            nudge_suffix(Peer::PeerA, "manual", Some("reviewer")).as_deref(),
            Some("(aux: reviewer, mode=manual)")
        );
    }
}
