use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mailbox_es::{
    append_conflict, validate_batch, AggregateId, Event, EventStore, EventStoreError, History,
    NonEmpty,
};
use tracing::{debug, trace};

/// An in memory event store.
///
/// See [crate] documentation for more info.
pub struct InMemoryEventStore<E>
where
    E: Event,
{
    histories: DashMap<E::AggregateId, Arc<History<E>>>,
}

impl<E> InMemoryEventStore<E>
where
    E: Event,
{
    /// Creates an empty store.
    pub fn new() -> Self {
        InMemoryEventStore {
            histories: DashMap::new(),
        }
    }

    /// The current history of an aggregate, shared with the store.
    pub fn current(&self, id: &E::AggregateId) -> Option<Arc<History<E>>> {
        self.histories.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Stores `history` for `id` unless a history is already present.
    ///
    /// Returns whether the history was stored.
    pub fn put_if_absent(&self, id: E::AggregateId, history: Arc<History<E>>) -> bool {
        match self.histories.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(history);
                true
            }
        }
    }

    /// Replaces the history of `id` with `new` if it is still `expected`.
    ///
    /// `expected` is compared by identity: any append in between installs a
    /// different `Arc`, even if it happened to produce equal events. Passing
    /// `None` as `new` removes the entry. Returns whether the swap happened.
    pub fn replace_if_unchanged(
        &self,
        id: &E::AggregateId,
        expected: &Arc<History<E>>,
        new: Option<Arc<History<E>>>,
    ) -> bool {
        match self.histories.entry(id.clone()) {
            Entry::Occupied(mut entry) if Arc::ptr_eq(entry.get(), expected) => {
                match new {
                    Some(new) => {
                        entry.insert(new);
                    }
                    None => {
                        entry.remove();
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Appends `events`, returning the history they replaced and the one
    /// now stored.
    ///
    /// This is the synchronous building block of
    /// [`append_all`](EventStore::append_all), usable by backends layering
    /// persistence on top of this store.
    pub fn try_append_all(
        &self,
        events: &NonEmpty<E>,
    ) -> Result<(Option<Arc<History<E>>>, Arc<History<E>>), EventStoreError> {
        validate_batch(events)?;

        let id = events.first().aggregate_id();
        let previous = self.current(id);
        let current = previous.as_deref().cloned().unwrap_or_default();
        if current.next_event_id() != events.first().event_id() {
            return Err(append_conflict(&current, events));
        }
        let updated = Arc::new(current.append(events)?);

        let swapped = match &previous {
            None => self.put_if_absent(id.clone(), Arc::clone(&updated)),
            Some(previous) => self.replace_if_unchanged(id, previous, Some(Arc::clone(&updated))),
        };
        if !swapped {
            // Another writer won between our read and our swap.
            let winner = self.current(id).as_deref().cloned().unwrap_or_default();
            return Err(append_conflict(&winner, events));
        }

        trace!(
            aggregate = %id.as_aggregate_key(),
            history_len = updated.len(),
            "swapped history"
        );

        Ok((previous, updated))
    }

    /// Restores `previous` if `id` still holds `installed`.
    ///
    /// Used to undo an append whose persistence failed.
    pub fn revert(
        &self,
        id: &E::AggregateId,
        installed: &Arc<History<E>>,
        previous: Option<Arc<History<E>>>,
    ) -> bool {
        self.replace_if_unchanged(id, installed, previous)
    }

    /// Stores `history` for `id`, replacing whatever was there.
    ///
    /// Meant for replaying a log that has already been validated; appends go
    /// through [`try_append_all`](Self::try_append_all).
    pub fn insert(&self, id: E::AggregateId, history: Arc<History<E>>) {
        self.histories.insert(id, history);
    }

    /// Drops the history stored under the aggregate key `key`.
    ///
    /// Returns whether a history was dropped.
    pub fn remove_by_key(&self, key: &str) -> bool {
        let before = self.histories.len();
        self.histories.retain(|id, _| id.as_aggregate_key() != key);
        self.histories.len() != before
    }

    /// Number of aggregates with a history.
    pub fn aggregate_count(&self) -> usize {
        self.histories.len()
    }
}

impl<E> Default for InMemoryEventStore<E>
where
    E: Event,
{
    fn default() -> Self {
        InMemoryEventStore::new()
    }
}

impl<E> fmt::Debug for InMemoryEventStore<E>
where
    E: Event,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("aggregates", &self.histories.len())
            .finish()
    }
}

#[async_trait]
impl<E> EventStore<E> for InMemoryEventStore<E>
where
    E: Event,
{
    async fn append_all(&self, events: NonEmpty<E>) -> Result<(), EventStoreError> {
        let (_, updated) = self.try_append_all(&events)?;
        debug!(
            aggregate = %events.first().aggregate_id().as_aggregate_key(),
            count = events.len(),
            history_len = updated.len(),
            "appended events"
        );

        Ok(())
    }

    async fn get_events_of_aggregate(
        &self,
        id: &E::AggregateId,
    ) -> Result<History<E>, EventStoreError> {
        Ok(self.current(id).as_deref().cloned().unwrap_or_default())
    }

    async fn remove(&self, id: &E::AggregateId) -> Result<(), EventStoreError> {
        self.histories.remove(id);
        Ok(())
    }
}

#[cfg(feature = "debug")]
impl<E> InMemoryEventStore<E>
where
    E: Event,
{
    /// Print the event store as a table to stdout.
    pub fn print(&self) {
        let mut table = prettytable::Table::new();
        table.set_titles(["Aggregate Key", "Event ID", "Snapshot", "Event"].into());

        let mut rows: Vec<_> = self
            .histories
            .iter()
            .flat_map(|entry| {
                let key = entry.key().as_aggregate_key();
                entry
                    .value()
                    .iter()
                    .map(|event| {
                        (
                            key.clone(),
                            event.event_id(),
                            event.is_snapshot(),
                            format!("{event:?}"),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

        if rows.is_empty() {
            table.add_row(["", "", "", ""].into());
        } else {
            for (key, event_id, is_snapshot, event) in rows {
                table.add_row(
                    [
                        key,
                        event_id.to_string(),
                        is_snapshot.to_string(),
                        event,
                    ]
                    .into(),
                );
            }
        }

        table.printstd();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mailbox_es::{EventStore, History, NonEmpty};
    use mailbox_es_testing::contract;
    use mailbox_es_testing::fixtures::{note, TestAggregateId, TestEvent};

    use super::InMemoryEventStore;

    fn store() -> Arc<InMemoryEventStore<TestEvent>> {
        Arc::new(InMemoryEventStore::new())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn event_store_contract() {
        contract::run_all(store).await;
    }

    #[tokio::test]
    async fn put_if_absent_only_stores_once() {
        let store = InMemoryEventStore::<TestEvent>::new();
        let id = TestAggregateId(1);
        let first = Arc::new(History::of(vec![note(1, 0, "a")]).unwrap());
        let second = Arc::new(History::of(vec![note(1, 0, "b")]).unwrap());

        assert!(store.put_if_absent(id.clone(), first.clone()));
        assert!(!store.put_if_absent(id.clone(), second));
        assert!(Arc::ptr_eq(&store.current(&id).unwrap(), &first));
    }

    #[tokio::test]
    async fn replace_compares_identity_not_equality() {
        let store = InMemoryEventStore::<TestEvent>::new();
        let id = TestAggregateId(1);
        let stored = Arc::new(History::of(vec![note(1, 0, "a")]).unwrap());
        let equal_copy = Arc::new((*stored).clone());
        store.put_if_absent(id.clone(), stored.clone());

        assert!(!store.replace_if_unchanged(&id, &equal_copy, None));
        assert!(store.replace_if_unchanged(&id, &stored, None));
        assert!(store.current(&id).is_none());
    }

    #[tokio::test]
    async fn revert_restores_previous_history() {
        let store = InMemoryEventStore::<TestEvent>::new();
        let id = TestAggregateId(7);
        store
            .append(note(7, 0, "kept"))
            .await
            .unwrap();

        let (previous, installed) = store
            .try_append_all(&NonEmpty::singleton(note(7, 1, "undone")))
            .unwrap();
        assert!(store.revert(&id, &installed, previous));

        let history = store.get_events_of_aggregate(&id).await.unwrap();
        assert_eq!(history.events(), &[note(7, 0, "kept")]);
    }

    #[test]
    fn remove_by_key_only_drops_matching_aggregate() {
        let store = InMemoryEventStore::<TestEvent>::new();
        store.insert(
            TestAggregateId(1),
            Arc::new(History::of(vec![note(1, 0, "a")]).unwrap()),
        );
        store.insert(
            TestAggregateId(2),
            Arc::new(History::of(vec![note(2, 0, "b")]).unwrap()),
        );

        assert!(store.remove_by_key("test-1"));
        assert!(!store.remove_by_key("test-1"));
        assert!(store.current(&TestAggregateId(1)).is_none());
        assert_eq!(store.aggregate_count(), 1);
    }
}
