use anyhow::Result;
use clap::{Args, Subcommand};
use mailbox_domain::acl::{
    mailbox_acl_system, AclCommand, AclEvent, MailboxAcl, MailboxAclAggregateId, MailboxAclCommand,
};

use super::retry::dispatch_with_retry;
use super::Settings;

/// Manage mailbox access control lists
#[derive(Args, Clone, Debug)]
pub struct Acl {
    #[command(subcommand)]
    command: AclCommands,
}

#[derive(Subcommand, Clone, Debug)]
enum AclCommands {
    /// Edit one entry with `<entry>:<rights>`, `<entry>:+<rights>` or `<entry>:-<rights>`
    Update {
        /// Id of the mailbox
        mailbox: String,
        /// Entry edit, such as `bob:+lr` or `-$devs:w`
        edit: String,
    },
    /// Replace the whole list
    Set {
        /// Id of the mailbox
        mailbox: String,
        /// Entries, such as `owner:aeiklprstwx bob:lr`
        entries: Vec<String>,
    },
    /// Show the current list
    Show {
        /// Id of the mailbox
        mailbox: String,
    },
}

impl Acl {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        let store = settings.open_store::<AclEvent>("acl")?;
        let system = mailbox_acl_system(store, settings.snapshot_policy);

        let mailbox = match self.command {
            AclCommands::Update { mailbox, edit } => {
                let mailbox = MailboxAclAggregateId::new(mailbox);
                let command = MailboxAclCommand::UpdateAcl {
                    mailbox: mailbox.clone(),
                    command: AclCommand::parse(&edit)?,
                };
                let events = dispatch_with_retry(&system, command, settings.max_retries).await?;
                println!("Updated with {} events", events.len());
                mailbox
            }
            AclCommands::Set { mailbox, entries } => {
                let mailbox = MailboxAclAggregateId::new(mailbox);
                let acl = entries.iter().try_fold(MailboxAcl::empty(), |acl, entry| {
                    AclCommand::parse(entry).map(|command| acl.apply_command(&command))
                })?;
                let command = MailboxAclCommand::SetAcl {
                    mailbox: mailbox.clone(),
                    acl,
                };
                let events = dispatch_with_retry(&system, command, settings.max_retries).await?;
                println!("Set with {} events", events.len());
                mailbox
            }
            AclCommands::Show { mailbox } => MailboxAclAggregateId::new(mailbox),
        };

        let aggregate = system.load(mailbox).await?;
        if aggregate.acl().is_empty() {
            println!("(empty)");
        }
        for (entry_key, rights) in aggregate.acl().entries() {
            println!("    {entry_key}  {rights}");
        }

        Ok(())
    }
}
