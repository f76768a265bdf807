use anyhow::Result;
use clap::{Args, ValueEnum};
use mailbox_domain::acl::{AclEvent, MailboxAclAggregateId};
use mailbox_domain::dlp::{DlpAggregateId, DlpEvent};
use mailbox_domain::quota_threshold::{QuotaThresholdEvent, UserQuotaThresholdsId};
use mailbox_es::{EventDto, EventStore};
use mailbox_es_filestore::FlatFileEventStore;

use super::Settings;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BoundedContext {
    Acl,
    Dlp,
    Quota,
}

/// Print stored events
#[derive(Args, Clone, Debug)]
pub struct History {
    /// Bounded context of the aggregate
    #[clap(value_enum)]
    context: BoundedContext,
    /// Aggregate key, such as `MailboxAggregateId-42` or `DLPRule/example.com`
    key: Option<String>,
    /// Print every aggregate of the context as a table
    #[clap(long, conflicts_with = "key")]
    table: bool,
}

impl History {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        match self.context {
            BoundedContext::Acl => {
                let store = settings.open_store::<AclEvent>("acl")?;
                let id = self
                    .key
                    .as_deref()
                    .map(MailboxAclAggregateId::from_key)
                    .transpose()?;
                print_history(&store, id, self.table).await
            }
            BoundedContext::Dlp => {
                let store = settings.open_store::<DlpEvent>("dlp")?;
                let id = self.key.as_deref().map(DlpAggregateId::from_key).transpose()?;
                print_history(&store, id, self.table).await
            }
            BoundedContext::Quota => {
                let store = settings.open_store::<QuotaThresholdEvent>("quota-thresholds")?;
                let id = self
                    .key
                    .as_deref()
                    .map(UserQuotaThresholdsId::from_key)
                    .transpose()?;
                print_history(&store, id, self.table).await
            }
        }
    }
}

async fn print_history<E>(
    store: &FlatFileEventStore<E>,
    id: Option<E::AggregateId>,
    table: bool,
) -> Result<()>
where
    E: EventDto,
{
    match id {
        Some(id) => {
            let history = store.get_events_of_aggregate(&id).await?;
            for event in history.iter() {
                println!("{}", event.to_json()?);
            }
        }
        None if table => store.event_store().print(),
        None => println!("{} aggregates", store.event_store().aggregate_count()),
    }

    Ok(())
}
