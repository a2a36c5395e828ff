//! C5 — Handoff Router: forwards `to_peer` events between peers' mailboxes
//! and surfaces `to_user` events to the outbox, gated by a pluggable
//! low-signal filter and an optional teach-mode interceptor.

pub mod filter;
pub mod router;

pub use filter::{FilterConfig, HandoffFilter};
pub use router::{HandoffRouter, NoopTeachIntercept, TeachIntercept};
