use std::fmt;
use std::hash::Hash;

use crate::EventId;

/// Identifies an aggregate.
///
/// An aggregate id is only ever used as a lookup key into the event store,
/// equality and hashing are by the underlying key.
pub trait AggregateId: Clone + fmt::Debug + Eq + Hash + Send + Sync + 'static {
    /// Renders the stable key under which the aggregate's events are stored.
    fn as_aggregate_key(&self) -> String;
}

/// An immutable fact appended to an aggregate's history.
///
/// Each bounded context usually models its events as a single enum, so that
/// every variant is resolved by pattern matching rather than runtime type
/// lookups.
pub trait Event: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// The aggregate this event belongs to.
    type AggregateId: AggregateId;

    /// Position of the event within its aggregate's history.
    fn event_id(&self) -> EventId;

    /// The aggregate this event belongs to.
    fn aggregate_id(&self) -> &Self::AggregateId;

    /// Returns whether this event fully encodes the aggregate's state.
    ///
    /// Replay starts at the latest snapshot event, ignoring everything before
    /// it.
    fn is_snapshot(&self) -> bool {
        false
    }

    /// Returns whether both events belong to the same aggregate.
    fn belongs_to_same_aggregate(&self, other: &Self) -> bool {
        self.aggregate_id() == other.aggregate_id()
    }
}
