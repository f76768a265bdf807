use mailbox_es::{Aggregate, Command, DispatchError, EventSourcingSystem, EventStore};
use tracing::warn;

/// Dispatches `command`, re-running the whole load, handle and append cycle
/// when another writer appended first.
///
/// Only [`ConcurrentAppendConflict`](mailbox_es::EventStoreError::ConcurrentAppendConflict)
/// is retried, at most `max_retries` times.
pub async fn dispatch_with_retry<A, C, S>(
    system: &EventSourcingSystem<A, C, S>,
    command: C,
    max_retries: u32,
) -> Result<Vec<A::Event>, DispatchError<A::Error>>
where
    A: Aggregate,
    C: Command<AggregateId = A::Id> + Clone,
    S: EventStore<A::Event>,
{
    let mut attempt = 0;
    loop {
        match system.dispatch(command.clone()).await {
            Err(err) if err.is_conflict() && attempt < max_retries => {
                attempt += 1;
                warn!(attempt, max_retries, "retrying after conflict");
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mailbox_domain::acl::{
        mailbox_acl_system, AclCommand, AclEvent, EntryKey, MailboxAclAggregateId,
        MailboxAclCommand, Right,
    };
    use mailbox_es::{AggregateId, Event, EventStore, EventStoreError, History, NonEmpty};
    use mailbox_es_inmemory::InMemoryEventStore;

    use super::dispatch_with_retry;

    /// Loses the first `conflicts` appends, as if another writer won.
    #[derive(Default)]
    struct ContendedStore {
        inner: InMemoryEventStore<AclEvent>,
        conflicts: AtomicUsize,
        unavailable: bool,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl EventStore<AclEvent> for ContendedStore {
        async fn append_all(&self, events: NonEmpty<AclEvent>) -> Result<(), EventStoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(EventStoreError::unavailable("store is down"));
            }
            let lost = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                let first = events.first();
                return Err(EventStoreError::ConcurrentAppendConflict {
                    aggregate_key: first.aggregate_id().as_aggregate_key(),
                    expected: first.event_id(),
                    actual: Some(first.event_id().next()),
                });
            }
            self.inner.append_all(events).await
        }

        async fn get_events_of_aggregate(
            &self,
            id: &MailboxAclAggregateId,
        ) -> Result<History<AclEvent>, EventStoreError> {
            self.inner.get_events_of_aggregate(id).await
        }

        async fn remove(&self, id: &MailboxAclAggregateId) -> Result<(), EventStoreError> {
            self.inner.remove(id).await
        }
    }

    fn grant_lookup() -> MailboxAclCommand {
        MailboxAclCommand::UpdateAcl {
            mailbox: MailboxAclAggregateId::new("inbox"),
            command: AclCommand::add(EntryKey::user("bob"), Right::Lookup.into()),
        }
    }

    #[tokio::test]
    async fn conflicts_are_retried() {
        let store = ContendedStore {
            conflicts: AtomicUsize::new(2),
            ..ContendedStore::default()
        };
        let system = mailbox_acl_system(store, None);

        let events = dispatch_with_retry(&system, grant_lookup(), 3).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(system.store().attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let store = ContendedStore {
            conflicts: AtomicUsize::new(5),
            ..ContendedStore::default()
        };
        let system = mailbox_acl_system(store, None);

        let err = dispatch_with_retry(&system, grant_lookup(), 2).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(system.store().attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let store = ContendedStore {
            unavailable: true,
            ..ContendedStore::default()
        };
        let system = mailbox_acl_system(store, None);

        let err = dispatch_with_retry(&system, grant_lookup(), 3).await.unwrap_err();
        assert!(!err.is_conflict());
        assert_eq!(system.store().attempts.load(Ordering::SeqCst), 1);
    }
}
