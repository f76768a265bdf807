use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;

use tracing::{debug, error, instrument, warn};

use crate::{
    Aggregate, AggregateId, Command, CommandHandler, Context, DispatchError, Event, EventStore,
    EventStoreError, History, NonEmpty, Subscriber,
};

/// When to append a snapshot event alongside a command's events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotPolicy {
    every: NonZeroUsize,
}

impl SnapshotPolicy {
    /// Snapshot once `every` events were appended since the latest snapshot.
    ///
    /// Returns `None` when `every` is zero.
    pub fn every(every: usize) -> Option<Self> {
        NonZeroUsize::new(every).map(|every| SnapshotPolicy { every })
    }

    /// Returns whether a snapshot is due, given the number of events that
    /// would follow the latest snapshot.
    pub fn is_due(&self, events_since_snapshot: usize) -> bool {
        events_since_snapshot >= self.every.get()
    }
}

/// Dispatches commands to handlers and appends the resulting events.
///
/// A dispatch loads the target aggregate's history, folds it, lets the
/// handler validate the command, appends the produced events and notifies
/// subscribers. A lost append race surfaces as a
/// [`ConcurrentAppendConflict`](EventStoreError::ConcurrentAppendConflict):
/// this type never retries, the caller owns the retry policy.
pub struct EventSourcingSystem<A, C, S>
where
    A: Aggregate,
{
    store: S,
    handlers: HashMap<&'static str, Box<dyn CommandHandler<A, C>>>,
    subscribers: Vec<Box<dyn Subscriber<A::Event>>>,
    snapshot_policy: Option<SnapshotPolicy>,
}

impl<A, C, S> EventSourcingSystem<A, C, S>
where
    A: Aggregate,
    C: Command<AggregateId = A::Id>,
    S: EventStore<A::Event>,
{
    /// Starts building a system on top of `store`.
    pub fn builder(store: S) -> EventSourcingSystemBuilder<A, C, S> {
        EventSourcingSystemBuilder {
            system: EventSourcingSystem {
                store,
                handlers: HashMap::new(),
                subscribers: Vec::new(),
                snapshot_policy: None,
            },
        }
    }

    /// The underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the current state of an aggregate.
    pub async fn load(&self, id: A::Id) -> Result<A, EventStoreError> {
        let history = self.store.get_events_of_aggregate(&id).await?;
        Ok(A::load(id, &history))
    }

    /// Handles a command, returning the appended events.
    ///
    /// No event is appended when the handler rejects the command or emits
    /// nothing.
    #[instrument(skip_all, fields(command = command.command_type()))]
    pub async fn dispatch(&self, command: C) -> Result<Vec<A::Event>, DispatchError<A::Error>> {
        let command_type = command.command_type();
        let handler = self
            .handlers
            .get(command_type)
            .ok_or(DispatchError::NoHandlerRegistered { command_type })?;

        let id = command.aggregate_id().clone();
        let history = self.store.get_events_of_aggregate(&id).await?;
        let mut aggregate = A::load(id.clone(), &history);

        let mut ctx = Context::new(&id, history.next_event_id());
        let events = handler
            .handle(&mut ctx, &aggregate, command)
            .map_err(DispatchError::Rejected)?;
        let Some(mut batch) = NonEmpty::new(events) else {
            debug!(aggregate = %id.as_aggregate_key(), "command produced no events");
            return Ok(Vec::new());
        };

        if let Some(snapshot) = self.snapshot(&history, &mut aggregate, &batch) {
            batch.push(snapshot);
        }

        if let Err(err) = self.store.append_all(batch.clone()).await {
            if err.is_conflict() {
                warn!("{err}");
            }
            return Err(err.into());
        }
        debug!(
            aggregate = %id.as_aggregate_key(),
            count = batch.len(),
            last_event_id = %batch.last().event_id(),
            "appended events"
        );

        let events = batch.into_vec();
        self.notify(&events).await;

        Ok(events)
    }

    fn snapshot(
        &self,
        history: &History<A::Event>,
        aggregate: &mut A,
        batch: &NonEmpty<A::Event>,
    ) -> Option<A::Event> {
        let policy = self.snapshot_policy?;
        let replayed = history.since_last_snapshot();
        let after_snapshot = match replayed.first() {
            Some(first) if first.is_snapshot() => replayed.len() - 1,
            _ => replayed.len(),
        };
        let since_snapshot = after_snapshot + batch.len();
        if !policy.is_due(since_snapshot) || batch.last().is_snapshot() {
            return None;
        }

        for event in batch {
            aggregate.apply(event);
        }
        aggregate.snapshot(batch.last().event_id().next())
    }

    async fn notify(&self, events: &[A::Event]) {
        for event in events {
            for subscriber in &self.subscribers {
                if let Err(err) = subscriber.handle(event).await {
                    error!(
                        subscriber = subscriber.name(),
                        aggregate = %event.aggregate_id().as_aggregate_key(),
                        event_id = %event.event_id(),
                        "subscriber failed: {err:#}"
                    );
                }
            }
        }
    }
}

impl<A, C, S> fmt::Debug for EventSourcingSystem<A, C, S>
where
    A: Aggregate,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        handlers.sort();
        let subscribers: Vec<_> = self.subscribers.iter().map(|s| s.name()).collect();
        f.debug_struct("EventSourcingSystem")
            .field("handlers", &handlers)
            .field("subscribers", &subscribers)
            .field("snapshot_policy", &self.snapshot_policy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`EventSourcingSystem`].
pub struct EventSourcingSystemBuilder<A, C, S>
where
    A: Aggregate,
{
    system: EventSourcingSystem<A, C, S>,
}

impl<A, C, S> EventSourcingSystemBuilder<A, C, S>
where
    A: Aggregate,
    C: Command<AggregateId = A::Id>,
    S: EventStore<A::Event>,
{
    /// Registers a handler for its command type.
    ///
    /// A later registration for the same command type replaces the earlier
    /// one.
    pub fn handler(mut self, handler: impl CommandHandler<A, C> + 'static) -> Self {
        let command_type = handler.command_type();
        if self
            .system
            .handlers
            .insert(command_type, Box::new(handler))
            .is_some()
        {
            warn!("replaced handler for command '{command_type}'");
        }
        self
    }

    /// Registers a subscriber, notified in registration order.
    pub fn subscriber(mut self, subscriber: impl Subscriber<A::Event> + 'static) -> Self {
        self.system.subscribers.push(Box::new(subscriber));
        self
    }

    /// Sets the snapshot policy. Without one, no snapshot is ever appended.
    pub fn snapshot_policy(mut self, policy: Option<SnapshotPolicy>) -> Self {
        self.system.snapshot_policy = policy;
        self
    }

    /// Finishes building.
    pub fn build(self) -> EventSourcingSystem<A, C, S> {
        self.system
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::tests_cfg::counter::{
        event, snapshot, Counter, CounterCommand, CounterError, CounterId, IncrementHandler,
    };
    use crate::tests_cfg::TestStore;
    use crate::EventId;

    type System = EventSourcingSystem<Counter, CounterCommand, Arc<TestStore>>;

    fn system(store: Arc<TestStore>) -> System {
        EventSourcingSystem::builder(store)
            .handler(IncrementHandler)
            .build()
    }

    fn increment(by: i64) -> CounterCommand {
        CounterCommand::Increment {
            id: CounterId::default(),
            by,
        }
    }

    #[derive(Default)]
    struct CountingSubscriber {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Subscriber<crate::tests_cfg::counter::CounterEvent> for Arc<CountingSubscriber> {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _event: &crate::tests_cfg::counter::CounterEvent) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSubscriber;

    #[async_trait]
    impl Subscriber<crate::tests_cfg::counter::CounterEvent> for FailingSubscriber {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _event: &crate::tests_cfg::counter::CounterEvent) -> anyhow::Result<()> {
            anyhow::bail!("mail relay unreachable")
        }
    }

    #[tokio::test]
    async fn dispatch_appends_events_with_continuing_ids() {
        let store = Arc::new(TestStore::default());
        let system = system(store.clone());

        assert_eq!(system.dispatch(increment(2)).await.unwrap(), vec![event(0, 2)]);
        assert_eq!(system.dispatch(increment(3)).await.unwrap(), vec![event(1, 3)]);

        let counter = system.load(CounterId::default()).await.unwrap();
        assert_eq!(counter.value, 5);
    }

    #[tokio::test]
    async fn unknown_command_has_no_handler() {
        let system = system(Arc::new(TestStore::default()));
        let err = system
            .dispatch(CounterCommand::Reset {
                id: CounterId::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::NoHandlerRegistered {
                command_type: "reset"
            }
        ));
    }

    #[tokio::test]
    async fn rejected_command_appends_nothing() {
        let store = Arc::new(TestStore::default());
        let system = system(store.clone());

        let err = system.dispatch(increment(0)).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&CounterError::ZeroIncrement));
        assert!(store
            .get_events_of_aggregate(&CounterId::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn conflict_is_not_retried() {
        let store = Arc::new(TestStore::default());
        store.stale_next_append();
        let system = system(store.clone());

        let err = system.dispatch(increment(1)).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.append_calls(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_is_not_a_conflict() {
        let store = Arc::new(TestStore::default());
        store.set_unavailable(true);
        let system = system(store);

        let err = system.dispatch(increment(1)).await.unwrap_err();
        assert!(!err.is_conflict());
        assert!(matches!(
            err,
            DispatchError::Store(EventStoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn subscribers_are_notified_and_failures_isolated() {
        let store = Arc::new(TestStore::default());
        let counting = Arc::new(CountingSubscriber::default());
        let system: System = EventSourcingSystem::builder(store)
            .handler(IncrementHandler)
            .subscriber(FailingSubscriber)
            .subscriber(counting.clone())
            .build();

        let events = system.dispatch(increment(4)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn snapshot_is_appended_in_the_same_batch() {
        let store = Arc::new(TestStore::default());
        let system: System = EventSourcingSystem::builder(store.clone())
            .handler(IncrementHandler)
            .snapshot_policy(SnapshotPolicy::every(2))
            .build();

        assert_eq!(system.dispatch(increment(1)).await.unwrap(), vec![event(0, 1)]);
        assert_eq!(
            system.dispatch(increment(2)).await.unwrap(),
            vec![event(1, 2), snapshot(2, 3)]
        );
        // the snapshot resets the count of events since the latest snapshot
        assert_eq!(system.dispatch(increment(4)).await.unwrap(), vec![event(3, 4)]);

        let history = store
            .get_events_of_aggregate(&CounterId::default())
            .await
            .unwrap();
        assert_eq!(history.next_event_id(), EventId::from(4));
        assert_eq!(history.since_last_snapshot(), &[snapshot(2, 3), event(3, 4)]);
        assert_eq!(system.load(CounterId::default()).await.unwrap().value, 7);
    }

    #[test]
    fn zero_snapshot_interval_disables_snapshots() {
        assert_eq!(SnapshotPolicy::every(0), None);
        assert!(SnapshotPolicy::every(3).unwrap().is_due(3));
        assert!(!SnapshotPolicy::every(3).unwrap().is_due(2));
    }
}
