use std::fmt;

use serde::{Deserialize, Serialize};

use crate::InvalidEventId;

/// Position of an event within one aggregate's history.
///
/// Event ids are zero-based and strictly increasing without gaps: the first
/// event of an aggregate is [`EventId::first`], and every following event
/// carries the [`next`](EventId::next) id of its predecessor. Ids never exceed
/// [`EventId::MAX`], so they always fit the signed integers of stored DTOs.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct EventId(u64);

impl EventId {
    /// The largest representable id.
    pub const MAX: EventId = EventId(i64::MAX as u64);

    /// The id of the first event of any aggregate.
    pub const fn first() -> Self {
        EventId(0)
    }

    /// Creates an event id from a raw integer.
    ///
    /// Returns an error if `value` is negative.
    pub fn of(value: i64) -> Result<Self, InvalidEventId> {
        u64::try_from(value)
            .map(EventId)
            .map_err(|_| InvalidEventId(value))
    }

    /// Returns the id following this one.
    ///
    /// # Panics
    ///
    /// Panics if `self` is [`EventId::MAX`]. Use
    /// [`checked_next`](Self::checked_next) where the id is not known to be
    /// in range.
    #[must_use]
    pub fn next(self) -> Self {
        match self.checked_next() {
            Some(next) => next,
            None => panic!("event id {self} has no successor"),
        }
    }

    /// Returns the id following this one, or `None` past [`EventId::MAX`].
    pub const fn checked_next(self) -> Option<Self> {
        if self.0 < EventId::MAX.0 {
            Some(EventId(self.0 + 1))
        } else {
            None
        }
    }

    /// Returns the id preceding this one, or `None` for the first id.
    pub fn previous(self) -> Option<Self> {
        self.0.checked_sub(1).map(EventId)
    }

    /// Returns whether this is the first id of a history.
    pub const fn is_first(self) -> bool {
        self.0 == 0
    }

    /// The raw integer value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The value as stored in DTOs.
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl From<u32> for EventId {
    fn from(value: u32) -> Self {
        EventId(u64::from(value))
    }
}

impl TryFrom<i64> for EventId {
    type Error = InvalidEventId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        EventId::of(value)
    }
}

impl From<EventId> for i64 {
    fn from(event_id: EventId) -> Self {
        event_id.as_i64()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
