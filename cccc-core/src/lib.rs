//! Core mailbox, delivery, handoff and scheduling fabric for the CCCC peer
//! orchestrator. This crate has no `main`; the `cccc` binary wires it to a
//! CLI, settings files and a tick loop.

pub mod bridge;
pub mod command_queue;
pub mod config;
pub mod delivery;
pub mod error;
pub mod foreman;
pub mod handoff;
pub mod keepalive;
pub mod ledger;
pub mod mailbox;
pub mod orchestrator;
pub mod outbox;
pub mod pane;
pub mod status;
pub mod types;

pub use error::{CcccError, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use types::Peer;
