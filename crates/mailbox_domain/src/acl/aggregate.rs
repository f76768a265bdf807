use serde::{Deserialize, Serialize};
use tracing::debug;

use mailbox_es::{
    Aggregate, AggregateId, Command, CommandHandler, Context, DtoError, Event, EventDto, EventId,
    EventSourcingSystem, EventStore, InvalidAggregateKey, SnapshotPolicy,
};

use super::{AclCommand, AclDiff, AclError, MailboxAcl};

/// Command type of [`MailboxAclCommand::UpdateAcl`].
pub const UPDATE_ACL: &str = "update-acl";
/// Command type of [`MailboxAclCommand::SetAcl`].
pub const SET_ACL: &str = "set-acl";

/// Identifies the ACL aggregate of a mailbox.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MailboxAclAggregateId(String);

impl MailboxAclAggregateId {
    const PREFIX: &'static str = "MailboxAggregateId-";

    /// The ACL aggregate of the mailbox with `mailbox_id`.
    pub fn new(mailbox_id: impl Into<String>) -> Self {
        MailboxAclAggregateId(mailbox_id.into())
    }

    /// The mailbox the ACL belongs to.
    pub fn mailbox_id(&self) -> &str {
        &self.0
    }

    /// Parses a key produced by [`AggregateId::as_aggregate_key`].
    pub fn from_key(key: &str) -> Result<Self, InvalidAggregateKey> {
        match key.strip_prefix(Self::PREFIX) {
            Some(mailbox_id) if !mailbox_id.is_empty() => Ok(MailboxAclAggregateId::new(mailbox_id)),
            _ => Err(InvalidAggregateKey::new(
                key,
                "expected MailboxAggregateId-<mailbox id>",
            )),
        }
    }
}

impl AggregateId for MailboxAclAggregateId {
    fn as_aggregate_key(&self) -> String {
        format!("{}{}", Self::PREFIX, self.0)
    }
}

/// Events of the mailbox ACL aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AclEvent {
    /// The ACL changed.
    AclUpdated {
        /// The mailbox ACL aggregate.
        aggregate_id: MailboxAclAggregateId,
        /// Position in the history.
        event_id: EventId,
        /// The change.
        diff: AclDiff,
    },
    /// The whole ACL at this point of the history.
    AclSnapshot {
        /// The mailbox ACL aggregate.
        aggregate_id: MailboxAclAggregateId,
        /// Position in the history.
        event_id: EventId,
        /// The current list.
        acl: MailboxAcl,
    },
}

impl Event for AclEvent {
    type AggregateId = MailboxAclAggregateId;

    fn event_id(&self) -> EventId {
        match self {
            AclEvent::AclUpdated { event_id, .. } | AclEvent::AclSnapshot { event_id, .. } => {
                *event_id
            }
        }
    }

    fn aggregate_id(&self) -> &MailboxAclAggregateId {
        match self {
            AclEvent::AclUpdated { aggregate_id, .. }
            | AclEvent::AclSnapshot { aggregate_id, .. } => aggregate_id,
        }
    }

    fn is_snapshot(&self) -> bool {
        matches!(self, AclEvent::AclSnapshot { .. })
    }
}

/// Storage representation of [`AclEvent`].
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum AclEventDto {
    #[serde(rename = "acl-updated")]
    AclUpdated {
        aggregate_key: String,
        event_id: i64,
        acl: AclDiff,
    },
    #[serde(rename = "acl-snapshot")]
    AclSnapshot {
        aggregate_key: String,
        event_id: i64,
        acl: MailboxAcl,
    },
}

impl EventDto for AclEvent {
    type Dto = AclEventDto;

    fn type_name(&self) -> &'static str {
        match self {
            AclEvent::AclUpdated { .. } => "acl-updated",
            AclEvent::AclSnapshot { .. } => "acl-snapshot",
        }
    }

    fn to_dto(&self) -> AclEventDto {
        match self {
            AclEvent::AclUpdated {
                aggregate_id,
                event_id,
                diff,
            } => AclEventDto::AclUpdated {
                aggregate_key: aggregate_id.as_aggregate_key(),
                event_id: event_id.as_i64(),
                acl: diff.clone(),
            },
            AclEvent::AclSnapshot {
                aggregate_id,
                event_id,
                acl,
            } => AclEventDto::AclSnapshot {
                aggregate_key: aggregate_id.as_aggregate_key(),
                event_id: event_id.as_i64(),
                acl: acl.clone(),
            },
        }
    }

    fn from_dto(dto: AclEventDto) -> Result<Self, DtoError> {
        Ok(match dto {
            AclEventDto::AclUpdated {
                aggregate_key,
                event_id,
                acl,
            } => AclEvent::AclUpdated {
                aggregate_id: MailboxAclAggregateId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                diff: acl,
            },
            AclEventDto::AclSnapshot {
                aggregate_key,
                event_id,
                acl,
            } => AclEvent::AclSnapshot {
                aggregate_id: MailboxAclAggregateId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                acl,
            },
        })
    }
}

/// The ACL of one mailbox, folded from its [`AclEvent`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxAclAggregate {
    id: MailboxAclAggregateId,
    acl: MailboxAcl,
}

impl MailboxAclAggregate {
    /// The current list.
    pub fn acl(&self) -> &MailboxAcl {
        &self.acl
    }

    fn change_to(&self, ctx: &mut Context<'_, MailboxAclAggregateId>, acl: MailboxAcl) -> Vec<AclEvent> {
        let diff = AclDiff::compute(self.acl.clone(), acl);
        if diff.is_noop() {
            debug!(mailbox = %self.id.mailbox_id(), "acl unchanged");
            return vec![];
        }

        vec![AclEvent::AclUpdated {
            aggregate_id: ctx.aggregate_id().clone(),
            event_id: ctx.next_event_id(),
            diff,
        }]
    }
}

impl Aggregate for MailboxAclAggregate {
    type Id = MailboxAclAggregateId;
    type Event = AclEvent;
    type Error = AclError;

    fn new(id: MailboxAclAggregateId) -> Self {
        MailboxAclAggregate {
            id,
            acl: MailboxAcl::empty(),
        }
    }

    fn apply(&mut self, event: &AclEvent) {
        match event {
            AclEvent::AclUpdated { diff, .. } => self.acl = diff.apply_to(&self.acl),
            AclEvent::AclSnapshot { acl, .. } => self.acl = acl.clone(),
        }
    }

    fn snapshot(&self, event_id: EventId) -> Option<AclEvent> {
        Some(AclEvent::AclSnapshot {
            aggregate_id: self.id.clone(),
            event_id,
            acl: self.acl.clone(),
        })
    }
}

/// Commands of the mailbox ACL aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MailboxAclCommand {
    /// Edits one entry of the ACL.
    UpdateAcl {
        /// The targeted mailbox.
        mailbox: MailboxAclAggregateId,
        /// The edit.
        command: AclCommand,
    },
    /// Replaces the whole ACL.
    SetAcl {
        /// The targeted mailbox.
        mailbox: MailboxAclAggregateId,
        /// The new list.
        acl: MailboxAcl,
    },
}

impl Command for MailboxAclCommand {
    type AggregateId = MailboxAclAggregateId;

    fn command_type(&self) -> &'static str {
        match self {
            MailboxAclCommand::UpdateAcl { .. } => UPDATE_ACL,
            MailboxAclCommand::SetAcl { .. } => SET_ACL,
        }
    }

    fn aggregate_id(&self) -> &MailboxAclAggregateId {
        match self {
            MailboxAclCommand::UpdateAcl { mailbox, .. }
            | MailboxAclCommand::SetAcl { mailbox, .. } => mailbox,
        }
    }
}

/// Handles [`MailboxAclCommand::UpdateAcl`].
///
/// An edit leaving the list unchanged emits nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateAclHandler;

impl CommandHandler<MailboxAclAggregate, MailboxAclCommand> for UpdateAclHandler {
    fn command_type(&self) -> &'static str {
        UPDATE_ACL
    }

    fn handle(
        &self,
        ctx: &mut Context<'_, MailboxAclAggregateId>,
        aggregate: &MailboxAclAggregate,
        command: MailboxAclCommand,
    ) -> Result<Vec<AclEvent>, AclError> {
        let MailboxAclCommand::UpdateAcl { command, .. } = command else {
            return Ok(vec![]);
        };

        Ok(aggregate.change_to(ctx, aggregate.acl.apply_command(&command)))
    }
}

/// Handles [`MailboxAclCommand::SetAcl`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SetAclHandler;

impl CommandHandler<MailboxAclAggregate, MailboxAclCommand> for SetAclHandler {
    fn command_type(&self) -> &'static str {
        SET_ACL
    }

    fn handle(
        &self,
        ctx: &mut Context<'_, MailboxAclAggregateId>,
        aggregate: &MailboxAclAggregate,
        command: MailboxAclCommand,
    ) -> Result<Vec<AclEvent>, AclError> {
        let MailboxAclCommand::SetAcl { acl, .. } = command else {
            return Ok(vec![]);
        };

        Ok(aggregate.change_to(ctx, acl))
    }
}

/// The command dispatcher of the ACL context.
pub type MailboxAclSystem<S> = EventSourcingSystem<MailboxAclAggregate, MailboxAclCommand, S>;

/// Creates a [`MailboxAclSystem`] with every ACL handler registered.
pub fn mailbox_acl_system<S>(store: S, snapshot_policy: Option<SnapshotPolicy>) -> MailboxAclSystem<S>
where
    S: EventStore<AclEvent>,
{
    EventSourcingSystem::builder(store)
        .handler(UpdateAclHandler)
        .handler(SetAclHandler)
        .snapshot_policy(snapshot_policy)
        .build()
}
