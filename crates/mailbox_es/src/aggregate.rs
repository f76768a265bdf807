use std::error::Error as StdError;

use crate::{AggregateId, Event, EventId, History};

/// Consistency boundary whose state is derived by folding its history.
///
/// Folding is pure and infallible: well-formed stored events always apply.
/// Only command validation, performed by a
/// [`CommandHandler`](crate::CommandHandler), can reject a request.
pub trait Aggregate: Sized + Send + Sync {
    /// The id type of the aggregate.
    type Id: AggregateId;

    /// The events folded into the aggregate.
    type Event: Event<AggregateId = Self::Id>;

    /// Business rule violations reported by command handlers.
    type Error: StdError + Send + Sync + 'static;

    /// Creates the state of an aggregate with an empty history.
    fn new(id: Self::Id) -> Self;

    /// Applies an event to update internal state.
    ///
    /// A snapshot event must replace the whole state.
    fn apply(&mut self, event: &Self::Event);

    /// Encodes the current state as a snapshot event carrying `event_id`.
    ///
    /// Aggregates without snapshot support return `None`.
    fn snapshot(&self, event_id: EventId) -> Option<Self::Event> {
        let _ = event_id;
        None
    }

    /// Rebuilds the aggregate by replaying `history`.
    ///
    /// Replay resumes at the latest snapshot event, so the result only
    /// depends on [`History::since_last_snapshot`].
    fn load(id: Self::Id, history: &History<Self::Event>) -> Self {
        let mut aggregate = Self::new(id);
        for event in history.since_last_snapshot() {
            aggregate.apply(event);
        }
        aggregate
    }
}
