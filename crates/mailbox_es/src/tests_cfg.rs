//! Fixtures shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    append_conflict, validate_batch, Event, EventStore, EventStoreError, History, NonEmpty,
};

pub mod counter {
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    use crate::{
        Aggregate, AggregateId, Command, CommandHandler, Context, DtoError, Event, EventDto,
        EventId,
    };

    #[derive(Clone, Debug, Hash, PartialEq, Eq)]
    pub struct CounterId(pub String);

    impl Default for CounterId {
        fn default() -> Self {
            CounterId("counter-1".to_string())
        }
    }

    impl AggregateId for CounterId {
        fn as_aggregate_key(&self) -> String {
            self.0.clone()
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum CounterEvent {
        Incremented {
            id: CounterId,
            event_id: EventId,
            by: i64,
        },
        Snapshotted {
            id: CounterId,
            event_id: EventId,
            value: i64,
        },
    }

    pub fn event(event_id: u32, by: i64) -> CounterEvent {
        CounterEvent::Incremented {
            id: CounterId::default(),
            event_id: EventId::from(event_id),
            by,
        }
    }

    pub fn snapshot(event_id: u32, value: i64) -> CounterEvent {
        CounterEvent::Snapshotted {
            id: CounterId::default(),
            event_id: EventId::from(event_id),
            value,
        }
    }

    impl Event for CounterEvent {
        type AggregateId = CounterId;

        fn event_id(&self) -> EventId {
            match self {
                CounterEvent::Incremented { event_id, .. }
                | CounterEvent::Snapshotted { event_id, .. } => *event_id,
            }
        }

        fn aggregate_id(&self) -> &CounterId {
            match self {
                CounterEvent::Incremented { id, .. } | CounterEvent::Snapshotted { id, .. } => id,
            }
        }

        fn is_snapshot(&self) -> bool {
            matches!(self, CounterEvent::Snapshotted { .. })
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all_fields = "camelCase")]
    pub enum CounterEventDto {
        #[serde(rename = "counter-incremented")]
        Incremented {
            aggregate_key: String,
            event_id: i64,
            by: i64,
        },
        #[serde(rename = "counter-snapshotted")]
        Snapshotted {
            aggregate_key: String,
            event_id: i64,
            value: i64,
        },
    }

    impl EventDto for CounterEvent {
        type Dto = CounterEventDto;

        fn type_name(&self) -> &'static str {
            match self {
                CounterEvent::Incremented { .. } => "counter-incremented",
                CounterEvent::Snapshotted { .. } => "counter-snapshotted",
            }
        }

        fn to_dto(&self) -> CounterEventDto {
            match self {
                CounterEvent::Incremented { id, event_id, by } => CounterEventDto::Incremented {
                    aggregate_key: id.0.clone(),
                    event_id: event_id.as_i64(),
                    by: *by,
                },
                CounterEvent::Snapshotted {
                    id,
                    event_id,
                    value,
                } => CounterEventDto::Snapshotted {
                    aggregate_key: id.0.clone(),
                    event_id: event_id.as_i64(),
                    value: *value,
                },
            }
        }

        fn from_dto(dto: CounterEventDto) -> Result<Self, DtoError> {
            Ok(match dto {
                CounterEventDto::Incremented {
                    aggregate_key,
                    event_id,
                    by,
                } => CounterEvent::Incremented {
                    id: CounterId(aggregate_key),
                    event_id: EventId::of(event_id)?,
                    by,
                },
                CounterEventDto::Snapshotted {
                    aggregate_key,
                    event_id,
                    value,
                } => CounterEvent::Snapshotted {
                    id: CounterId(aggregate_key),
                    event_id: EventId::of(event_id)?,
                    value,
                },
            })
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Counter {
        pub id: CounterId,
        pub value: i64,
    }

    impl Aggregate for Counter {
        type Id = CounterId;
        type Event = CounterEvent;
        type Error = CounterError;

        fn new(id: CounterId) -> Self {
            Counter { id, value: 0 }
        }

        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Incremented { by, .. } => self.value += by,
                CounterEvent::Snapshotted { value, .. } => self.value = *value,
            }
        }

        fn snapshot(&self, event_id: EventId) -> Option<CounterEvent> {
            Some(CounterEvent::Snapshotted {
                id: self.id.clone(),
                event_id,
                value: self.value,
            })
        }
    }

    #[derive(Clone, Debug, Error, PartialEq, Eq)]
    pub enum CounterError {
        #[error("cannot increment by zero")]
        ZeroIncrement,
    }

    pub enum CounterCommand {
        Increment { id: CounterId, by: i64 },
        Reset { id: CounterId },
    }

    impl Command for CounterCommand {
        type AggregateId = CounterId;

        fn command_type(&self) -> &'static str {
            match self {
                CounterCommand::Increment { .. } => "increment",
                CounterCommand::Reset { .. } => "reset",
            }
        }

        fn aggregate_id(&self) -> &CounterId {
            match self {
                CounterCommand::Increment { id, .. } | CounterCommand::Reset { id } => id,
            }
        }
    }

    pub struct IncrementHandler;

    impl CommandHandler<Counter, CounterCommand> for IncrementHandler {
        fn command_type(&self) -> &'static str {
            "increment"
        }

        fn handle(
            &self,
            ctx: &mut Context<'_, CounterId>,
            _counter: &Counter,
            command: CounterCommand,
        ) -> Result<Vec<CounterEvent>, CounterError> {
            let CounterCommand::Increment { id, by } = command else {
                return Ok(vec![]);
            };
            if by == 0 {
                return Err(CounterError::ZeroIncrement);
            }

            Ok(vec![CounterEvent::Incremented {
                id,
                event_id: ctx.next_event_id(),
                by,
            }])
        }
    }
}

/// Minimal store used to drive the dispatch tests.
#[derive(Default)]
pub struct TestStore {
    histories: Mutex<HashMap<counter::CounterId, History<counter::CounterEvent>>>,
    unavailable: AtomicBool,
    stale: AtomicBool,
    append_calls: AtomicUsize,
}

impl TestStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next append behave as if another writer won the race.
    pub fn stale_next_append(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), EventStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::unavailable("store is down"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore<counter::CounterEvent> for TestStore {
    async fn append_all(
        &self,
        events: NonEmpty<counter::CounterEvent>,
    ) -> Result<(), EventStoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        validate_batch(&events)?;

        let mut histories = self.histories.lock().unwrap();
        let current = histories
            .get(events.first().aggregate_id())
            .cloned()
            .unwrap_or_default();
        if self.stale.swap(false, Ordering::SeqCst)
            || current.next_event_id() != events.first().event_id()
        {
            return Err(append_conflict(&current, &events));
        }
        let updated = current.append(&events)?;
        histories.insert(events.first().aggregate_id().clone(), updated);

        Ok(())
    }

    async fn get_events_of_aggregate(
        &self,
        id: &counter::CounterId,
    ) -> Result<History<counter::CounterEvent>, EventStoreError> {
        self.check_available()?;
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, id: &counter::CounterId) -> Result<(), EventStoreError> {
        self.check_available()?;
        self.histories.lock().unwrap().remove(id);
        Ok(())
    }
}
