use std::error::Error as StdError;

use thiserror::Error;

use crate::EventId;

/// An event id was constructed from a negative integer.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("event id must not be negative, got {0}")]
pub struct InvalidEventId(pub i64);

/// An aggregate key could not be built or parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid aggregate key '{key}': {reason}")]
pub struct InvalidAggregateKey {
    /// The offending key, or key component.
    pub key: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl InvalidAggregateKey {
    /// Creates a new error for `key`.
    pub fn new(key: impl Into<String>, reason: &'static str) -> Self {
        InvalidAggregateKey {
            key: key.into(),
            reason,
        }
    }
}

/// A sequence of events does not form a valid history.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// Two events carry the same id.
    #[error("duplicate event id {0}")]
    DuplicateEventId(EventId),
    /// Ids are out of order or leave a gap.
    #[error("expected event id {expected} but found {found}")]
    UnexpectedEventId {
        /// The id that should come next.
        expected: EventId,
        /// The id that was found instead.
        found: EventId,
    },
    /// Events of more than one aggregate were mixed.
    #[error("events belong to different aggregates")]
    MixedAggregates,
    /// An event follows [`EventId::MAX`].
    #[error("no event can follow event id {0}")]
    Exhausted(EventId),
}

/// Represents all the ways an event store operation can fail.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer changed the aggregate's history between the caller's
    /// read and its append.
    ///
    /// Recoverable: reload the history, re-validate and append again.
    #[error("concurrent append conflict on {aggregate_key}: batch starts at event {expected}, stored history ends at {actual:?}")]
    ConcurrentAppendConflict {
        /// Key of the contended aggregate.
        aggregate_key: String,
        /// First event id of the rejected batch.
        expected: EventId,
        /// Last event id currently stored, if any.
        actual: Option<EventId>,
    },
    /// The events of a single append belong to different aggregates.
    #[error("cannot append events of {first} and {other} in a single batch")]
    MixedAggregates {
        /// Aggregate key of the first event.
        first: String,
        /// Aggregate key of the first event not matching it.
        other: String,
    },
    /// The batch is not a contiguous run of event ids.
    #[error(transparent)]
    InvalidHistory(#[from] HistoryError),
    /// The storage backend could not be reached.
    ///
    /// Distinct from a conflict: nothing is known about the aggregate's state.
    #[error("event store unavailable: {0}")]
    Unavailable(#[source] Box<dyn StdError + Send + Sync>),
}

impl EventStoreError {
    /// Wraps a backend error as [`EventStoreError::Unavailable`].
    pub fn unavailable(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        EventStoreError::Unavailable(err.into())
    }

    /// Returns whether this error is a lost append race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrentAppendConflict { .. })
    }

    /// Returns whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrentAppendConflict { .. } | EventStoreError::Unavailable(_)
        )
    }
}

/// A command dispatch failed.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// No handler is registered for the command's type.
    #[error("no handler registered for command '{command_type}'")]
    NoHandlerRegistered {
        /// Type name of the dispatched command.
        command_type: &'static str,
    },
    /// The command violates a business rule of the aggregate.
    #[error("command rejected: {0}")]
    Rejected(#[source] E),
    /// Loading or appending events failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl<E> DispatchError<E> {
    /// Returns whether the dispatch lost an append race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::Store(err) if err.is_conflict())
    }

    /// Returns the domain error, if the command was rejected.
    pub fn rejection(&self) -> Option<&E> {
        match self {
            DispatchError::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

/// An event could not be converted to or from its storage representation.
#[derive(Debug, Error)]
pub enum DtoError {
    /// A stored event id was negative.
    #[error(transparent)]
    InvalidEventId(#[from] InvalidEventId),
    /// A stored aggregate key could not be parsed.
    #[error(transparent)]
    InvalidAggregateKey(#[from] InvalidAggregateKey),
    /// A stored field holds a value the domain rejects.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the field in the DTO.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// Failed to serialize a DTO.
    #[error("failed to serialize event: {0}")]
    Serialize(serde_json::Error),
    /// Failed to deserialize a DTO.
    #[error("failed to deserialize event: {0}")]
    Deserialize(serde_json::Error),
}

impl DtoError {
    /// Creates a [`DtoError::InvalidField`].
    pub fn invalid_field(field: &'static str, reason: impl ToString) -> Self {
        DtoError::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}
