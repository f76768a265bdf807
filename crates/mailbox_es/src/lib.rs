//! Event sourcing engine backing mailbox state.
//!
//! Mutable mailbox state (ACLs, DLP rules, quota thresholds) is derived by
//! folding an append-only, per-aggregate [`History`] of events. Writers append
//! through an [`EventStore`] which linearises appends per aggregate using
//! compare-and-swap semantics, and readers rebuild state with
//! [`Aggregate::load`], resuming from the latest snapshot event when one
//! exists.
//!
//! Commands are dispatched by an [`EventSourcingSystem`], which loads and
//! folds the target aggregate, lets the registered [`CommandHandler`] decide
//! which events to emit, appends them and finally notifies [`Subscriber`]s.

#![deny(missing_docs)]

mod aggregate;
mod command;
mod dto;
mod error;
mod event;
mod event_id;
mod event_store;
mod history;
mod non_empty;
mod subscriber;
mod system;

#[cfg(test)]
mod tests_cfg;

pub use aggregate::*;
pub use command::*;
pub use dto::*;
pub use error::*;
pub use event::*;
pub use event_id::*;
pub use event_store::*;
pub use history::*;
pub use non_empty::*;
pub use subscriber::*;
pub use system::*;
