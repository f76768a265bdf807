//! Behaviour every [`EventStore`] backend must exhibit.
//!
//! Backends run the whole suite from their own tests:
//!
//! ```ignore
//! #[tokio::test(flavor = "multi_thread")]
//! async fn event_store_contract() {
//!     mailbox_es_testing::contract::run_all(|| Arc::new(MyStore::new())).await;
//! }
//! ```
//!
//! The concurrent cases spawn tasks, so they need a multi-threaded tokio
//! runtime to exercise real races.

use std::sync::Arc;

use futures::future::join_all;
use mailbox_es::{Event, EventId, EventStore, EventStoreError, History, HistoryError, NonEmpty};
use tokio::sync::Barrier;

use crate::fixtures::{note, notes_snapshot, TestAggregateId, TestEvent};

/// Runs every contract case against fresh stores built by `new_store`.
pub async fn run_all<S, F>(new_store: F)
where
    S: EventStore<TestEvent> + Clone + 'static,
    F: Fn() -> S,
{
    unknown_aggregate_has_empty_history(&new_store()).await;
    append_then_read_returns_events_in_order(&new_store()).await;
    appends_extend_history(&new_store()).await;
    stale_append_conflicts(&new_store()).await;
    first_append_must_start_at_first_id(&new_store()).await;
    mixed_aggregates_are_rejected(&new_store()).await;
    non_contiguous_batch_is_rejected(&new_store()).await;
    aggregates_are_independent(&new_store()).await;
    snapshots_do_not_truncate_storage(&new_store()).await;
    remove_deletes_history(&new_store()).await;
    concurrent_first_appends_have_one_winner(new_store()).await;
    concurrent_appends_are_linearized(new_store()).await;
}

fn batch(events: Vec<TestEvent>) -> NonEmpty<TestEvent> {
    NonEmpty::new(events).expect("batch must not be empty")
}

async fn read<S: EventStore<TestEvent>>(store: &S, aggregate: u64) -> History<TestEvent> {
    store
        .get_events_of_aggregate(&TestAggregateId(aggregate))
        .await
        .expect("read must succeed")
}

async fn next_id<S: EventStore<TestEvent>>(store: &S, aggregate: u64) -> u32 {
    let next = read(store, aggregate).await.next_event_id().value();
    u32::try_from(next).expect("test histories stay small")
}

/// Reading an aggregate never appended to yields an empty history.
pub async fn unknown_aggregate_has_empty_history<S: EventStore<TestEvent>>(store: &S) {
    assert_eq!(read(store, 1).await, History::empty());
}

/// A batch appended to a fresh aggregate is read back exactly.
pub async fn append_then_read_returns_events_in_order<S: EventStore<TestEvent>>(store: &S) {
    let events = vec![note(1, 0, "a"), note(1, 1, "b"), note(1, 2, "c")];
    store.append_all(batch(events.clone())).await.unwrap();

    assert_eq!(read(store, 1).await.into_events(), events);
}

/// Successive appends continue the stored history.
pub async fn appends_extend_history<S: EventStore<TestEvent>>(store: &S) {
    store.append(note(1, 0, "a")).await.unwrap();
    store
        .append_all(batch(vec![note(1, 1, "b"), note(1, 2, "c")]))
        .await
        .unwrap();

    let history = read(store, 1).await;
    assert_eq!(history.len(), 3);
    assert_eq!(history.last_event_id(), Some(EventId::from(2)));
}

/// An append computed from an outdated history fails and changes nothing.
pub async fn stale_append_conflicts<S: EventStore<TestEvent>>(store: &S) {
    store.append(note(1, 0, "first")).await.unwrap();
    store.append(note(1, 1, "second")).await.unwrap();

    let err = store.append(note(1, 1, "stale")).await.unwrap_err();
    assert!(err.is_conflict(), "expected a conflict, got {err:?}");
    match err {
        EventStoreError::ConcurrentAppendConflict {
            aggregate_key,
            expected,
            actual,
        } => {
            assert_eq!(aggregate_key, "test-1");
            assert_eq!(expected, EventId::from(1));
            assert_eq!(actual, Some(EventId::from(1)));
        }
        _ => unreachable!(),
    }

    assert_eq!(
        read(store, 1).await.into_events(),
        vec![note(1, 0, "first"), note(1, 1, "second")]
    );
}

/// The first batch of an aggregate starts at [`EventId::first`].
pub async fn first_append_must_start_at_first_id<S: EventStore<TestEvent>>(store: &S) {
    let err = store.append(note(1, 1, "too far")).await.unwrap_err();
    assert!(err.is_conflict(), "expected a conflict, got {err:?}");
    assert!(read(store, 1).await.is_empty());
}

/// A batch spanning two aggregates is rejected as a whole.
pub async fn mixed_aggregates_are_rejected<S: EventStore<TestEvent>>(store: &S) {
    let err = store
        .append_all(batch(vec![note(1, 0, "a"), note(2, 1, "b")]))
        .await
        .unwrap_err();
    assert!(matches!(err, EventStoreError::MixedAggregates { .. }));
    assert!(read(store, 1).await.is_empty());
    assert!(read(store, 2).await.is_empty());
}

/// A batch with a gap is rejected and none of it becomes visible.
pub async fn non_contiguous_batch_is_rejected<S: EventStore<TestEvent>>(store: &S) {
    let err = store
        .append_all(batch(vec![note(1, 0, "a"), note(1, 2, "c")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EventStoreError::InvalidHistory(HistoryError::UnexpectedEventId { .. })
    ));
    assert!(read(store, 1).await.is_empty());
}

/// Appends to one aggregate never affect another.
pub async fn aggregates_are_independent<S: EventStore<TestEvent>>(store: &S) {
    store.append(note(1, 0, "one")).await.unwrap();
    store.append(note(2, 0, "two")).await.unwrap();

    assert_eq!(read(store, 1).await.into_events(), vec![note(1, 0, "one")]);
    assert_eq!(read(store, 2).await.into_events(), vec![note(2, 0, "two")]);
}

/// Snapshot events only affect replay, every event stays stored.
pub async fn snapshots_do_not_truncate_storage<S: EventStore<TestEvent>>(store: &S) {
    let events = vec![
        note(1, 0, "a"),
        notes_snapshot(1, 1, &["a"]),
        note(1, 2, "b"),
    ];
    store.append_all(batch(events.clone())).await.unwrap();

    let history = read(store, 1).await;
    assert_eq!(history.events(), events.as_slice());
    assert_eq!(history.since_last_snapshot(), &events[1..]);
}

/// A removed aggregate reads as empty and can start over.
pub async fn remove_deletes_history<S: EventStore<TestEvent>>(store: &S) {
    store.append(note(1, 0, "a")).await.unwrap();
    store.append(note(2, 0, "kept")).await.unwrap();

    store.remove(&TestAggregateId(1)).await.unwrap();
    assert!(read(store, 1).await.is_empty());
    assert_eq!(read(store, 2).await.len(), 1);

    store.append(note(1, 0, "again")).await.unwrap();
    assert_eq!(read(store, 1).await.into_events(), vec![note(1, 0, "again")]);
}

/// Two writers racing to create the same aggregate: exactly one wins, the
/// other gets a conflict and succeeds once it appends after the winner.
pub async fn concurrent_first_appends_have_one_winner<S>(store: S)
where
    S: EventStore<TestEvent> + Clone + 'static,
{
    let barrier = Arc::new(Barrier::new(2));
    let writers = ["left", "right"].map(|writer| {
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            let events = vec![note(1, 0, writer), note(1, 1, writer)];
            barrier.wait().await;
            (writer, store.append_all(batch(events)).await)
        })
    });

    let results: Vec<_> = join_all(writers)
        .await
        .into_iter()
        .map(|joined| joined.expect("writer panicked"))
        .collect();
    let winners: Vec<_> = results.iter().filter(|(_, result)| result.is_ok()).collect();
    let losers: Vec<_> = results.iter().filter(|(_, result)| result.is_err()).collect();
    assert_eq!(winners.len(), 1, "exactly one writer must win: {results:?}");
    assert_eq!(losers.len(), 1);
    let (winner, _) = winners[0];
    let (loser, loser_result) = losers[0];
    assert!(
        loser_result.as_ref().is_err_and(EventStoreError::is_conflict),
        "loser must get a conflict: {loser_result:?}"
    );

    assert_eq!(
        read(&store, 1).await.into_events(),
        vec![note(1, 0, winner), note(1, 1, winner)]
    );

    // the loser reloads and retries after the winner
    let next = next_id(&store, 1).await;
    store.append(note(1, next, loser)).await.unwrap();
    assert_eq!(
        read(&store, 1).await.into_events(),
        vec![note(1, 0, winner), note(1, 1, winner), note(1, 2, loser)]
    );
}

/// Many writers appending to one aggregate, each retrying after conflicts,
/// end up with one gapless history containing every write once.
pub async fn concurrent_appends_are_linearized<S>(store: S)
where
    S: EventStore<TestEvent> + Clone + 'static,
{
    const WRITERS: u64 = 16;

    let barrier = Arc::new(Barrier::new(WRITERS as usize));
    let writers = (0..WRITERS).map(|writer| {
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            let text = format!("writer-{writer}");
            barrier.wait().await;
            loop {
                let next = next_id(&store, 1).await;
                match store.append(note(1, next, &text)).await {
                    Ok(()) => break,
                    Err(err) if err.is_conflict() => tokio::task::yield_now().await,
                    Err(err) => panic!("unexpected append failure: {err}"),
                }
            }
        })
    });
    for joined in join_all(writers).await {
        joined.expect("writer panicked");
    }

    let history = read(&store, 1).await;
    assert_eq!(history.len(), WRITERS as usize);
    for (index, event) in history.iter().enumerate() {
        assert_eq!(event.event_id().value(), index as u64);
    }
    let mut texts: Vec<_> = history
        .iter()
        .map(|event| match event {
            TestEvent::Noted { text, .. } => text.clone(),
            TestEvent::Snapshotted { .. } => unreachable!(),
        })
        .collect();
    texts.sort();
    texts.dedup();
    assert_eq!(texts.len(), WRITERS as usize);
}
