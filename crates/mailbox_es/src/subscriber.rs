use async_trait::async_trait;

use crate::Event;

/// Reacts to events once they are durably appended.
///
/// Subscribers are notified after a successful append. A failing subscriber
/// is logged and never turns the dispatch into a failure, the events are
/// already stored.
#[async_trait]
pub trait Subscriber<E>: Send + Sync
where
    E: Event,
{
    /// Name used when logging failures.
    fn name(&self) -> &str;

    /// Handles one appended event.
    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}
