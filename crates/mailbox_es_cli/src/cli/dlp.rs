use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use mailbox_domain::dlp::{self, dlp_system, DlpAggregateId, DlpCommand, DlpEvent, DlpRule};
use tokio::fs;

use super::retry::dispatch_with_retry;
use super::Settings;

/// Manage data loss prevention rules of a domain
#[derive(Args, Clone, Debug)]
pub struct Dlp {
    #[command(subcommand)]
    command: DlpCommands,
}

#[derive(Subcommand, Clone, Debug)]
enum DlpCommands {
    /// Replace the rules of a domain with those of a JSON file
    Store {
        /// Mail domain
        domain: String,
        /// JSON array of rules
        rules: PathBuf,
    },
    /// Remove every rule of a domain
    Clear {
        /// Mail domain
        domain: String,
    },
    /// List the rules of a domain as JSON
    List {
        /// Mail domain
        domain: String,
    },
}

impl Dlp {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        let store = settings.open_store::<DlpEvent>("dlp")?;
        let system = dlp_system(store, settings.snapshot_policy);

        let domain = match self.command {
            DlpCommands::Store { domain, rules } => {
                let content = fs::read_to_string(&rules)
                    .await
                    .with_context(|| format!("failed to read {}", rules.display()))?;
                let rules: Vec<DlpRule> = serde_json::from_str(&content)
                    .with_context(|| format!("invalid rules in {}", rules.display()))?;
                let domain = DlpAggregateId::new(domain);
                let command = DlpCommand::StoreRules {
                    domain: domain.clone(),
                    rules,
                };
                let events = dispatch_with_retry(&system, command, settings.max_retries).await?;
                println!("Stored with {} events", events.len());
                domain
            }
            DlpCommands::Clear { domain } => {
                let domain = DlpAggregateId::new(domain);
                let command = DlpCommand::ClearRules {
                    domain: domain.clone(),
                };
                let events = dispatch_with_retry(&system, command, settings.max_retries).await?;
                println!("Cleared with {} events", events.len());
                return Ok(());
            }
            DlpCommands::List { domain } => DlpAggregateId::new(domain),
        };

        let rules = dlp::list(system.store(), &domain).await?;
        println!("{}", serde_json::to_string_pretty(&rules)?);

        Ok(())
    }
}
