mod acl;
mod dlp;
mod history;
mod quota;
mod retry;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailbox_es::{EventDto, SnapshotPolicy};
use mailbox_es_filestore::FlatFileEventStore;
use tracing::debug;

use self::acl::Acl;
use self::dlp::Dlp;
use self::history::History;
use self::quota::Thresholds;

/// Event sourced mailbox administration
#[derive(Parser, Debug)]
#[command(name = "mailbox-es", version, about, long_about = None)]
struct Cli {
    /// Directory holding the event files
    #[clap(long, env = "MAILBOX_ES_DATA_DIR", default_value = "./mailbox-es-data")]
    data_dir: PathBuf,
    /// Append a snapshot every N events, 0 disables snapshots
    #[clap(long, env = "MAILBOX_ES_SNAPSHOT_EVERY", default_value_t = 0)]
    snapshot_every: usize,
    /// Times a command is retried after losing a concurrent append
    #[clap(long, env = "MAILBOX_ES_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    Acl(Acl),
    Dlp(Dlp),
    Quota(Thresholds),
    History(History),
}

/// Settings shared by every subcommand.
#[derive(Clone, Debug)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub snapshot_policy: Option<SnapshotPolicy>,
    pub max_retries: u32,
}

impl Settings {
    /// Opens the event file of a bounded context.
    pub fn open_store<E>(&self, context: &str) -> Result<FlatFileEventStore<E>>
    where
        E: EventDto,
    {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("failed to create data dir {}", self.data_dir.display())
        })?;
        let path = self.data_dir.join(format!("{context}.jsonl"));
        debug!(path = %path.display(), "opening event store");
        FlatFileEventStore::load(&path)
            .with_context(|| format!("failed to load event store {}", path.display()))
    }
}

pub async fn start() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings {
        data_dir: cli.data_dir,
        snapshot_policy: SnapshotPolicy::every(cli.snapshot_every),
        max_retries: cli.max_retries,
    };

    match cli.command {
        Commands::Acl(acl) => acl.run(&settings).await,
        Commands::Dlp(dlp) => dlp.run(&settings).await,
        Commands::Quota(quota) => quota.run(&settings).await,
        Commands::History(history) => history.run(&settings).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands};

    #[test]
    fn grace_period_must_not_be_negative() {
        let parsed = Cli::try_parse_from([
            "mailbox-es",
            "quota",
            "--grace-period-hours=-1",
            "show",
            "bob",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "mailbox-es",
            "quota",
            "--grace-period-hours",
            "48",
            "show",
            "bob",
        ])
        .unwrap();
        assert!(matches!(parsed.command, Commands::Quota(_)));
    }
}
