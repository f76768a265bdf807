use std::sync::Arc;

use async_trait::async_trait;

use crate::{AggregateId, Event, EventStoreError, History, HistoryError, NonEmpty};

/// Append-only persistence of aggregate histories.
///
/// Every backend must uphold the same compare-and-swap discipline: an
/// append only succeeds if the aggregate's stored history still ends right
/// before the batch's first event id. Otherwise the append fails with
/// [`EventStoreError::ConcurrentAppendConflict`] and nothing is written. This
/// linearises appends per aggregate while leaving distinct aggregates
/// independent.
#[async_trait]
pub trait EventStore<E>: Send + Sync
where
    E: Event,
{
    /// Appends a batch of events to a single aggregate.
    ///
    /// The batch is stored entirely or not at all.
    async fn append_all(&self, events: NonEmpty<E>) -> Result<(), EventStoreError>;

    /// Loads the full stored history of an aggregate.
    ///
    /// Returns [`History::empty`] for aggregates never appended to.
    async fn get_events_of_aggregate(
        &self,
        id: &E::AggregateId,
    ) -> Result<History<E>, EventStoreError>;

    /// Deletes the history of an aggregate.
    async fn remove(&self, id: &E::AggregateId) -> Result<(), EventStoreError>;

    /// Appends a single event.
    async fn append(&self, event: E) -> Result<(), EventStoreError> {
        self.append_all(NonEmpty::singleton(event)).await
    }
}

#[async_trait]
impl<E, S> EventStore<E> for Arc<S>
where
    E: Event,
    S: EventStore<E> + ?Sized,
{
    async fn append_all(&self, events: NonEmpty<E>) -> Result<(), EventStoreError> {
        (**self).append_all(events).await
    }

    async fn get_events_of_aggregate(
        &self,
        id: &E::AggregateId,
    ) -> Result<History<E>, EventStoreError> {
        (**self).get_events_of_aggregate(id).await
    }

    async fn remove(&self, id: &E::AggregateId) -> Result<(), EventStoreError> {
        (**self).remove(id).await
    }
}

/// Checks the preconditions every backend shares before touching storage:
/// all events belong to one aggregate and their ids form a contiguous
/// ascending run.
pub fn validate_batch<E>(events: &NonEmpty<E>) -> Result<(), EventStoreError>
where
    E: Event,
{
    let first = events.first();
    if let Some(other) = events
        .iter()
        .find(|event| !event.belongs_to_same_aggregate(first))
    {
        return Err(EventStoreError::MixedAggregates {
            first: first.aggregate_id().as_aggregate_key(),
            other: other.aggregate_id().as_aggregate_key(),
        });
    }

    for pair in events.windows(2) {
        let (previous, next) = (pair[0].event_id(), pair[1].event_id());
        if next == previous {
            return Err(HistoryError::DuplicateEventId(next).into());
        }
        let expected = previous
            .checked_next()
            .ok_or(HistoryError::Exhausted(previous))?;
        if next != expected {
            return Err(HistoryError::UnexpectedEventId {
                expected,
                found: next,
            }
            .into());
        }
    }

    Ok(())
}

/// Builds the conflict error reported when `events` do not continue
/// `current`.
pub fn append_conflict<E>(current: &History<E>, events: &NonEmpty<E>) -> EventStoreError
where
    E: Event,
{
    EventStoreError::ConcurrentAppendConflict {
        aggregate_key: events.first().aggregate_id().as_aggregate_key(),
        expected: events.first().event_id(),
        actual: current.last_event_id(),
    }
}
