//! An aggregate-agnostic event type for exercising event stores.

use mailbox_es::{AggregateId, DtoError, Event, EventDto, EventId, InvalidAggregateKey};
use serde::{Deserialize, Serialize};

/// Id of a test aggregate, stored under the key `test-<n>`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct TestAggregateId(pub u64);

impl TestAggregateId {
    const PREFIX: &'static str = "test-";

    /// Parses a key produced by [`AggregateId::as_aggregate_key`].
    pub fn from_key(key: &str) -> Result<Self, InvalidAggregateKey> {
        key.strip_prefix(Self::PREFIX)
            .and_then(|n| n.parse().ok())
            .map(TestAggregateId)
            .ok_or_else(|| InvalidAggregateKey::new(key, "expected test-<n>"))
    }
}

impl AggregateId for TestAggregateId {
    fn as_aggregate_key(&self) -> String {
        format!("{}{}", Self::PREFIX, self.0)
    }
}

/// Events of a test aggregate: free-form notes, and snapshots of all notes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestEvent {
    /// A note was taken.
    Noted {
        /// Owning aggregate.
        aggregate_id: TestAggregateId,
        /// Position in the history.
        event_id: EventId,
        /// Note contents.
        text: String,
    },
    /// Every note taken so far.
    Snapshotted {
        /// Owning aggregate.
        aggregate_id: TestAggregateId,
        /// Position in the history.
        event_id: EventId,
        /// All notes.
        notes: Vec<String>,
    },
}

/// Shorthand for a [`TestEvent::Noted`].
pub fn note(aggregate: u64, event_id: u32, text: &str) -> TestEvent {
    TestEvent::Noted {
        aggregate_id: TestAggregateId(aggregate),
        event_id: EventId::from(event_id),
        text: text.to_string(),
    }
}

/// Shorthand for a [`TestEvent::Snapshotted`].
pub fn notes_snapshot(aggregate: u64, event_id: u32, notes: &[&str]) -> TestEvent {
    TestEvent::Snapshotted {
        aggregate_id: TestAggregateId(aggregate),
        event_id: EventId::from(event_id),
        notes: notes.iter().map(|note| note.to_string()).collect(),
    }
}

impl Event for TestEvent {
    type AggregateId = TestAggregateId;

    fn event_id(&self) -> EventId {
        match self {
            TestEvent::Noted { event_id, .. } | TestEvent::Snapshotted { event_id, .. } => {
                *event_id
            }
        }
    }

    fn aggregate_id(&self) -> &TestAggregateId {
        match self {
            TestEvent::Noted { aggregate_id, .. }
            | TestEvent::Snapshotted { aggregate_id, .. } => aggregate_id,
        }
    }

    fn is_snapshot(&self) -> bool {
        matches!(self, TestEvent::Snapshotted { .. })
    }
}

/// Storage representation of [`TestEvent`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
#[allow(missing_docs)]
pub enum TestEventDto {
    #[serde(rename = "test-noted")]
    Noted {
        aggregate_key: String,
        event_id: i64,
        text: String,
    },
    #[serde(rename = "test-snapshotted")]
    Snapshotted {
        aggregate_key: String,
        event_id: i64,
        notes: Vec<String>,
    },
}

impl EventDto for TestEvent {
    type Dto = TestEventDto;

    fn type_name(&self) -> &'static str {
        match self {
            TestEvent::Noted { .. } => "test-noted",
            TestEvent::Snapshotted { .. } => "test-snapshotted",
        }
    }

    fn to_dto(&self) -> TestEventDto {
        match self {
            TestEvent::Noted {
                aggregate_id,
                event_id,
                text,
            } => TestEventDto::Noted {
                aggregate_key: aggregate_id.as_aggregate_key(),
                event_id: event_id.as_i64(),
                text: text.clone(),
            },
            TestEvent::Snapshotted {
                aggregate_id,
                event_id,
                notes,
            } => TestEventDto::Snapshotted {
                aggregate_key: aggregate_id.as_aggregate_key(),
                event_id: event_id.as_i64(),
                notes: notes.clone(),
            },
        }
    }

    fn from_dto(dto: TestEventDto) -> Result<Self, DtoError> {
        Ok(match dto {
            TestEventDto::Noted {
                aggregate_key,
                event_id,
                text,
            } => TestEvent::Noted {
                aggregate_id: TestAggregateId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                text,
            },
            TestEventDto::Snapshotted {
                aggregate_key,
                event_id,
                notes,
            } => TestEvent::Snapshotted {
                aggregate_id: TestAggregateId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                notes,
            },
        })
    }
}
