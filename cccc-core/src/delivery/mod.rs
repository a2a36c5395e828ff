//! C4 — Delivery Engine: MID/ACK stamping, the per-receiver retry queue, the
//! sequenced-inbox writer, and the state machine tying them to the pane
//! driver and idle judge.

pub mod ack;
pub mod engine;
pub mod inbox_seq;
pub mod mid;
pub mod outbox_queue;

pub use engine::DeliveryEngine;
pub use inbox_seq::write_inbox_message;
pub use mid::{format_local_ts, inject_ts_after_mid, new_mid, wrap_with_mid};
pub use outbox_queue::{DeliveryQueue, QueuedMessage};
