//! An in memory implementation of [EventStore](mailbox_es::EventStore).
//!
//! This is useful for tests and single-process deployments, the data does
//! not survive a restart.
//!
//! Histories are kept in a concurrent map keyed by aggregate id. Appends
//! never take a store-wide lock: they read the current history, build the
//! extended one and swap it in only if the entry still holds the history
//! that was read.

#![deny(missing_docs)]

pub use event_store::InMemoryEventStore;

mod event_store;
