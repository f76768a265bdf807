//! A filestore implementation of [EventStore](mailbox_es::EventStore).
//!
//! Built on top of [mailbox_es_inmemory], events are persisted to a file as
//! one JSON document per line, using each event's
//! [DTO](mailbox_es::EventDto) representation.
//!
//! Stores in different processes may open the same file: writers coordinate
//! through an advisory lock on it (see [FlatFileEventStore]).

pub use error::Error;
pub use event_store::FlatFileEventStore;

mod error;
mod event_store;
