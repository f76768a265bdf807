use std::slice;

use crate::{Event, EventId, HistoryError, NonEmpty};

/// The ordered sequence of events of one aggregate.
///
/// Events are sorted by ascending [`EventId`], starting wherever the sequence
/// was taken from, with no gaps and no duplicates. A history is never
/// mutated: appending returns a new history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct History<E> {
    events: Vec<E>,
}

impl<E> History<E> {
    /// The history of an aggregate which was never appended to.
    pub fn empty() -> Self {
        History { events: Vec::new() }
    }

    /// All events, including those preceding a snapshot.
    pub fn events(&self) -> &[E] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns whether no event was ever appended.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterates over all events.
    pub fn iter(&self) -> slice::Iter<'_, E> {
        self.events.iter()
    }

    /// Unwraps the events.
    pub fn into_events(self) -> Vec<E> {
        self.events
    }
}

impl<E> History<E>
where
    E: Event,
{
    /// Creates a history from events sorted by id.
    ///
    /// Returns an error if ids repeat, are out of order or leave a gap, or if
    /// the events belong to different aggregates.
    pub fn of(events: Vec<E>) -> Result<Self, HistoryError> {
        let mut iter = events.iter();
        if let Some(first) = iter.next() {
            check_run(first.event_id(), iter.as_slice(), first)?;
        }

        Ok(History { events })
    }

    /// Id of the most recent event.
    pub fn last_event_id(&self) -> Option<EventId> {
        self.events.last().map(Event::event_id)
    }

    /// Id the next appended event must carry.
    pub fn next_event_id(&self) -> EventId {
        self.last_event_id()
            .map(EventId::next)
            .unwrap_or_else(EventId::first)
    }

    /// Returns a new history extended by `events`.
    ///
    /// The batch must start at [`next_event_id`](Self::next_event_id) and be
    /// contiguous. `self` is left untouched.
    pub fn append(&self, events: &NonEmpty<E>) -> Result<Self, HistoryError> {
        let first = events.first();
        if let Some(last) = self.events.last() {
            if !last.belongs_to_same_aggregate(first) {
                return Err(HistoryError::MixedAggregates);
            }
        }
        let expected = match self.last_event_id() {
            Some(last) => last.checked_next().ok_or(HistoryError::Exhausted(last))?,
            None => EventId::first(),
        };
        if first.event_id() != expected {
            return Err(unexpected(expected, first.event_id()));
        }
        check_run(first.event_id(), &events[1..], first)?;

        let mut appended = Vec::with_capacity(self.events.len() + events.len());
        appended.extend_from_slice(&self.events);
        appended.extend_from_slice(events);

        Ok(History { events: appended })
    }

    /// The events replay must fold, starting at the latest snapshot event.
    ///
    /// Events preceding the latest snapshot are still stored but skipped.
    /// Without any snapshot, this is the whole history.
    pub fn since_last_snapshot(&self) -> &[E] {
        let start = self
            .events
            .iter()
            .rposition(Event::is_snapshot)
            .unwrap_or(0);
        &self.events[start..]
    }

    /// The latest snapshot event, if any.
    pub fn last_snapshot(&self) -> Option<&E> {
        self.events.iter().rev().find(|event| event.is_snapshot())
    }
}

impl<E> Default for History<E> {
    fn default() -> Self {
        History::empty()
    }
}

impl<'a, E> IntoIterator for &'a History<E> {
    type Item = &'a E;
    type IntoIter = slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Checks that `rest` continues `previous` one id at a time within the
/// aggregate of `head`.
fn check_run<E: Event>(mut previous: EventId, rest: &[E], head: &E) -> Result<(), HistoryError> {
    for event in rest {
        if !event.belongs_to_same_aggregate(head) {
            return Err(HistoryError::MixedAggregates);
        }
        let found = event.event_id();
        if found == previous {
            return Err(HistoryError::DuplicateEventId(found));
        }
        let expected = previous
            .checked_next()
            .ok_or(HistoryError::Exhausted(previous))?;
        if found != expected {
            return Err(unexpected(expected, found));
        }
        previous = found;
    }

    Ok(())
}

fn unexpected(expected: EventId, found: EventId) -> HistoryError {
    HistoryError::UnexpectedEventId { expected, found }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::tests_cfg::counter::{event, snapshot, Counter, CounterEvent, CounterId};
    use crate::Aggregate;

    fn history(events: Vec<CounterEvent>) -> History<CounterEvent> {
        History::of(events).unwrap()
    }

    #[test]
    fn empty_history() {
        let history = History::<CounterEvent>::empty();
        assert!(history.is_empty());
        assert_eq!(history.last_event_id(), None);
        assert_eq!(history.next_event_id(), EventId::first());
        assert!(history.since_last_snapshot().is_empty());
    }

    #[test]
    fn of_rejects_duplicates() {
        let result = History::of(vec![event(0, 1), event(0, 2)]);
        assert_eq!(
            result,
            Err(HistoryError::DuplicateEventId(EventId::first()))
        );
    }

    #[test]
    fn of_rejects_gaps() {
        let result = History::of(vec![event(0, 1), event(2, 2)]);
        assert_eq!(
            result,
            Err(HistoryError::UnexpectedEventId {
                expected: EventId::from(1),
                found: EventId::from(2),
            })
        );
    }

    #[test]
    fn of_rejects_mixed_aggregates() {
        let other = CounterEvent::Incremented {
            id: CounterId("other".to_string()),
            event_id: EventId::from(1),
            by: 1,
        };
        assert_eq!(
            History::of(vec![event(0, 1), other]),
            Err(HistoryError::MixedAggregates)
        );
    }

    #[test]
    fn append_returns_new_history() {
        let original = history(vec![event(0, 1)]);
        let appended = original
            .append(&NonEmpty::new(vec![event(1, 2), event(2, 3)]).unwrap())
            .unwrap();

        assert_eq!(original.len(), 1);
        assert_eq!(appended.len(), 3);
        assert_eq!(appended.last_event_id(), Some(EventId::from(2)));
    }

    #[test]
    fn nothing_follows_the_max_id() {
        let last = CounterEvent::Incremented {
            id: CounterId::default(),
            event_id: EventId::MAX,
            by: 1,
        };
        let result = history(vec![last]).append(&NonEmpty::singleton(event(0, 1)));
        assert_eq!(result, Err(HistoryError::Exhausted(EventId::MAX)));
    }

    #[test]
    fn append_must_continue_history() {
        let original = history(vec![event(0, 1)]);
        let result = original.append(&NonEmpty::singleton(event(0, 2)));
        assert_eq!(
            result,
            Err(HistoryError::UnexpectedEventId {
                expected: EventId::from(1),
                found: EventId::first(),
            })
        );
    }

    #[test]
    fn since_last_snapshot_without_snapshot_is_everything() {
        let history = history(vec![event(0, 1), event(1, 2)]);
        assert_eq!(history.since_last_snapshot(), history.events());
        assert_eq!(history.last_snapshot(), None);
    }

    #[test]
    fn since_last_snapshot_starts_at_latest_snapshot() {
        let history = history(vec![
            event(0, 1),
            snapshot(1, 10),
            event(2, 1),
            snapshot(3, 20),
            event(4, 5),
        ]);

        assert_eq!(history.since_last_snapshot(), &[snapshot(3, 20), event(4, 5)]);
        assert_eq!(history.last_snapshot(), Some(&snapshot(3, 20)));
    }

    #[test]
    fn snapshot_as_last_event() {
        let history = history(vec![event(0, 1), snapshot(1, 1)]);
        assert_eq!(history.since_last_snapshot(), &[snapshot(1, 1)]);
    }

    fn arb_events() -> impl Strategy<Value = Vec<CounterEvent>> {
        prop::collection::vec((any::<bool>(), -50i64..50), 1..40).prop_map(|items| {
            let mut total = 0;
            items
                .into_iter()
                .enumerate()
                .map(|(index, (is_snapshot, by))| {
                    total += by;
                    if is_snapshot {
                        snapshot(index as u32, total)
                    } else {
                        event(index as u32, by)
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn folding_is_invariant_under_snapshot_truncation(events in arb_events()) {
            let history = history(events.clone());
            let loaded = Counter::load(CounterId::default(), &history);

            let full_replay = events.iter().fold(Counter::new(CounterId::default()), |mut counter, event| {
                counter.apply(event);
                counter
            });
            prop_assert_eq!(&loaded, &full_replay);

            let suffix = History::of(history.since_last_snapshot().to_vec()).unwrap();
            prop_assert_eq!(Counter::load(CounterId::default(), &suffix), loaded);
        }
    }
}
