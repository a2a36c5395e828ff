//! C5 — Handoff Router: per-tick sequencing of mailbox events into outbox
//! records, sentinel overwrites, and (for `to_peer`) the receiving peer's
//! sequenced inbox.

use std::path::Path;

use chrono::Utc;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::delivery::{new_mid, wrap_with_mid, write_inbox_message};
use crate::error::Result;
use crate::ledger::{entry, LedgerSink};
use crate::mailbox::{sha256_text, Channel, MailboxStore, PeerEvents};
use crate::outbox::OutboxWriter;
use crate::types::Peer;

use super::filter::{FilterConfig, HandoffFilter};

/// Hook letting a caller rewrite or block a peer-to-peer payload before it
/// is evaluated by the low-signal filter. The default never intercepts.
pub trait TeachIntercept: Send + Sync {
    fn intercept(&self, from: Peer, payload: &str) -> Option<String>;
}

#[derive(Default)]
pub struct NoopTeachIntercept;

impl TeachIntercept for NoopTeachIntercept {
    fn intercept(&self, _from: Peer, _payload: &str) -> Option<String> {
        None
    }
}

fn eid_of(kind: &str, peer: Peer, text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{kind}|{}|{text}", peer.folder_name()).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

fn headline(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if line.chars().count() > 32 {
        line.chars().take(32).collect()
    } else {
        line.to_string()
    }
}

pub struct HandoffRouter {
    filter: HandoffFilter,
    teach: Box<dyn TeachIntercept>,
}

impl HandoffRouter {
    pub fn new(filter_config: FilterConfig, teach: Box<dyn TeachIntercept>) -> Self {
        Self {
            filter: HandoffFilter::new(filter_config),
            teach,
        }
    }

    /// Process this tick's scan results: emit `to_user` events as-is, and
    /// gate/forward `to_peer` events through the teach intercept and
    /// low-signal filter. `override_enabled` bypasses the filter (used for
    /// an explicit user "force-forward" command).
    pub async fn process_tick(
        &mut self,
        state_dir: &Path,
        store: &MailboxStore,
        outbox: &OutboxWriter,
        ledger: &dyn LedgerSink,
        events: &std::collections::HashMap<Peer, PeerEvents>,
        override_enabled: bool,
    ) -> Result<()> {
        for peer in Peer::ALL {
            let Some(ev) = events.get(&peer) else { continue };

            if let Some(to_user) = &ev.to_user {
                let eid = eid_of("to_user", peer, &to_user.text);
                ledger
                    .log(entry(
                        "to_user",
                        [
                            ("peer", serde_json::Value::String(peer.folder_name().to_string())),
                            ("eid", serde_json::Value::String(eid.clone())),
                        ],
                    ))
                    .await?;
                outbox.to_user(peer, &to_user.text, &eid)?;
                let sha8 = sha256_text(&to_user.text)[..8].to_string();
                store.write_sentinel(
                    peer,
                    Channel::ToUser,
                    &Utc::now().to_rfc3339(),
                    &eid,
                    &sha8,
                    &format!("{}→User", peer.label()),
                )?;
            }

            if let Some(to_peer) = &ev.to_peer {
                ledger
                    .log(entry(
                        "to_peer-seen",
                        [("peer", serde_json::Value::String(peer.folder_name().to_string()))],
                    ))
                    .await?;

                let payload = self
                    .teach
                    .intercept(peer, &to_peer.text)
                    .unwrap_or_else(|| to_peer.text.clone());

                let sha8 = sha256_text(&to_peer.text)[..8].to_string();
                let ts = Utc::now().to_rfc3339();

                if payload.trim().is_empty() {
                    let eid = eid_of("to_peer", peer, &to_peer.text);
                    ledger
                        .log(entry(
                            "handoff-drop",
                            [
                                ("peer", serde_json::Value::String(peer.folder_name().to_string())),
                                ("reason", serde_json::Value::String("teach-intercept".into())),
                            ],
                        ))
                        .await?;
                    store.write_sentinel(peer, Channel::ToPeer, &ts, &eid, &sha8, "dropped")?;
                    continue;
                }

                if self.filter.should_forward(peer, &payload, override_enabled) {
                    let other = peer.other();
                    let tag = peer.label();
                    let wrapped_body = format!("<FROM_{tag}>\n{payload}\n</FROM_{tag}>\n");
                    let mid = new_mid();
                    let wrapped = wrap_with_mid(&wrapped_body, &mid);

                    write_inbox_message(
                        state_dir,
                        &store.inbox_dir(other),
                        &store.processed_dir(other),
                        other,
                        &wrapped,
                        &mid,
                    )
                    .await?;

                    let eid = eid_of("to_peer-forward", peer, &payload);
                    outbox.to_peer_summary(peer, &headline(&payload), &eid, other)?;
                    ledger
                        .log(entry(
                            "to_peer-forward",
                            [
                                ("peer", serde_json::Value::String(peer.folder_name().to_string())),
                                ("to", serde_json::Value::String(other.folder_name().to_string())),
                                ("eid", serde_json::Value::String(eid.clone())),
                            ],
                        ))
                        .await?;
                    store.write_sentinel(
                        peer,
                        Channel::ToPeer,
                        &ts,
                        &eid,
                        &sha8,
                        &format!("{}→{}", peer.label(), other.label()),
                    )?;
                } else {
                    let eid = eid_of("to_peer", peer, &to_peer.text);
                    debug!(peer = %peer, "handoff dropped as low-signal");
                    ledger
                        .log(entry(
                            "handoff-drop",
                            [
                                ("peer", serde_json::Value::String(peer.folder_name().to_string())),
                                ("reason", serde_json::Value::String("low-signal-or-cooldown".into())),
                            ],
                        ))
                        .await?;
                    store.write_sentinel(peer, Channel::ToPeer, &ts, &eid, &sha8, "dropped")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::JsonlLedger;
    use crate::mailbox::MailboxEvent;

    #[tokio::test]
    async fn forwards_substantive_to_peer_text_into_other_inbox() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().to_path_buf();
        let state = home.join("state");
        let store = MailboxStore::new(&home);
        store.ensure_mailbox().unwrap();
        let outbox = OutboxWriter::open(&state).unwrap();
        let ledger = JsonlLedger::open(state.join("ledger.jsonl")).unwrap();

        let mut router = HandoffRouter::new(FilterConfig::default(), Box::new(NoopTeachIntercept));

        let mut events = std::collections::HashMap::new();
        events.insert(
            Peer::PeerA,
            PeerEvents {
                to_user: None,
                to_peer: Some(MailboxEvent {
                    text: "please review the attached patch".to_string(),
                }),
            },
        );

        router
            .process_tick(&state, &store, &outbox, &ledger, &events, false)
            .await
            .unwrap();

        let inbox_files: Vec<_> = std::fs::read_dir(store.inbox_dir(Peer::PeerB))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(inbox_files.len(), 1);
    }

    #[tokio::test]
    async fn drops_low_signal_to_peer_text() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().to_path_buf();
        let state = home.join("state");
        let store = MailboxStore::new(&home);
        store.ensure_mailbox().unwrap();
        let outbox = OutboxWriter::open(&state).unwrap();
        let ledger = JsonlLedger::open(state.join("ledger.jsonl")).unwrap();

        let mut router = HandoffRouter::new(FilterConfig::default(), Box::new(NoopTeachIntercept));

        let mut events = std::collections::HashMap::new();
        events.insert(
            Peer::PeerA,
            PeerEvents {
                to_user: None,
                to_peer: Some(MailboxEvent { text: "ok".to_string() }),
            },
        );

        router
            .process_tick(&state, &store, &outbox, &ledger, &events, false)
            .await
            .unwrap();

        let inbox_files: Vec<_> = std::fs::read_dir(store.inbox_dir(Peer::PeerB))
            .unwrap()
            .flatten()
            .collect();
        assert!(inbox_files.is_empty());
    }
}
