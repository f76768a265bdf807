use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use mailbox_domain::quota_threshold::{
    quota_threshold_system, DetectThresholdCrossing, DetectThresholdCrossingHandler, Quota,
    QuotaThresholdEvent, QuotaThresholdNoticeSubscriber, QuotaThresholds, UserQuotaThresholdsId,
};

use super::retry::dispatch_with_retry;
use super::Settings;

/// Detect quota threshold crossings and report notices
#[derive(Args, Clone, Debug)]
pub struct QuotaArgs {
    /// Listener keeping the threshold history
    #[clap(long, default_value = "quota-threshold-notifier")]
    listener: String,
    /// Watched occupation ratios
    #[clap(long, env = "MAILBOX_ES_QUOTA_THRESHOLDS", default_value = "0.8,0.9,0.99")]
    thresholds: QuotaThresholds,
    /// Hours during which a reached threshold is not notified again
    #[clap(long, env = "MAILBOX_ES_GRACE_PERIOD_HOURS", default_value_t = 24)]
    grace_period_hours: u32,
}

/// Quota threshold crossings
#[derive(Args, Clone, Debug)]
pub struct Thresholds {
    #[command(flatten)]
    args: QuotaArgs,
    #[command(subcommand)]
    command: QuotaCommands,
}

#[derive(Subcommand, Clone, Debug)]
enum QuotaCommands {
    /// Report the current quotas of a user
    Detect {
        /// The user
        user: String,
        /// Used bytes
        #[clap(long)]
        size_used: u64,
        /// Allowed bytes, unlimited if absent
        #[clap(long)]
        size_limit: Option<u64>,
        /// Stored messages
        #[clap(long, default_value_t = 0)]
        count_used: u64,
        /// Allowed messages, unlimited if absent
        #[clap(long)]
        count_limit: Option<u64>,
    },
    /// Show the thresholds a user reached
    Show {
        /// The user
        user: String,
    },
}

impl Thresholds {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        let store = settings.open_store::<QuotaThresholdEvent>("quota-thresholds")?;
        let grace_period = Duration::try_hours(i64::from(self.args.grace_period_hours))
            .context("grace period out of range")?;
        let handler = DetectThresholdCrossingHandler::new(self.args.thresholds, grace_period);
        let (notices, mut receiver) = QuotaThresholdNoticeSubscriber::new();
        let system = quota_threshold_system(store, handler, notices, settings.snapshot_policy);

        match self.command {
            QuotaCommands::Detect {
                user,
                size_used,
                size_limit,
                count_used,
                count_limit,
            } => {
                let command = DetectThresholdCrossing {
                    id: UserQuotaThresholdsId::from(user, self.args.listener)?,
                    size_quota: Quota {
                        used: size_used,
                        limit: size_limit,
                    },
                    count_quota: Quota {
                        used: count_used,
                        limit: count_limit,
                    },
                    instant: Utc::now(),
                };
                let events = dispatch_with_retry(&system, command, settings.max_retries).await?;
                println!("Detected with {} events", events.len());

                while let Ok(notification) = receiver.try_recv() {
                    println!("Notice for {}:", notification.id.user());
                    println!("{}", notification.notice.generate_report());
                }
            }
            QuotaCommands::Show { user } => {
                let id = UserQuotaThresholdsId::from(user, self.args.listener)?;
                let thresholds = system.load(id).await?;
                for (name, history) in [
                    ("size", thresholds.size_history()),
                    ("count", thresholds.count_history()),
                ] {
                    println!("{name}:");
                    for change in history.changes() {
                        println!("    {}  {}", change.instant.to_rfc3339(), change.threshold);
                    }
                }
            }
        }

        Ok(())
    }
}
