use serde::{Deserialize, Serialize};
use tracing::debug;

use mailbox_es::{
    Aggregate, AggregateId, Command, CommandHandler, Context, DtoError, Event, EventDto, EventId,
    EventSourcingSystem, EventStore, EventStoreError, InvalidAggregateKey, SnapshotPolicy,
};

use super::{validate_rules, DlpError, DlpRule};

/// Command type of [`DlpCommand::StoreRules`].
pub const STORE_RULES: &str = "store-dlp-rules";
/// Command type of [`DlpCommand::ClearRules`].
pub const CLEAR_RULES: &str = "clear-dlp-rules";

/// Identifies the DLP configuration of a mail domain.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DlpAggregateId(String);

impl DlpAggregateId {
    const PREFIX: &'static str = "DLPRule/";

    /// The DLP configuration of `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        DlpAggregateId(domain.into())
    }

    /// The configured domain.
    pub fn domain(&self) -> &str {
        &self.0
    }

    /// Parses a key produced by [`AggregateId::as_aggregate_key`].
    pub fn from_key(key: &str) -> Result<Self, InvalidAggregateKey> {
        match key.strip_prefix(Self::PREFIX) {
            Some(domain) if !domain.is_empty() => Ok(DlpAggregateId::new(domain)),
            _ => Err(InvalidAggregateKey::new(key, "expected DLPRule/<domain>")),
        }
    }
}

impl AggregateId for DlpAggregateId {
    fn as_aggregate_key(&self) -> String {
        format!("{}{}", Self::PREFIX, self.0)
    }
}

/// Events of a domain's DLP configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DlpEvent {
    /// Rules were added, replacing any rule with the same id.
    ConfigurationItemsAdded {
        /// The configured domain.
        aggregate_id: DlpAggregateId,
        /// Position in the history.
        event_id: EventId,
        /// The added rules.
        rules: Vec<DlpRule>,
    },
    /// Rules were removed.
    ConfigurationItemsRemoved {
        /// The configured domain.
        aggregate_id: DlpAggregateId,
        /// Position in the history.
        event_id: EventId,
        /// The removed rules.
        rules: Vec<DlpRule>,
    },
    /// Every rule configured at this point of the history.
    RulesSnapshotted {
        /// The configured domain.
        aggregate_id: DlpAggregateId,
        /// Position in the history.
        event_id: EventId,
        /// The configured rules.
        rules: Vec<DlpRule>,
    },
}

impl DlpEvent {
    fn rules(&self) -> &[DlpRule] {
        match self {
            DlpEvent::ConfigurationItemsAdded { rules, .. }
            | DlpEvent::ConfigurationItemsRemoved { rules, .. }
            | DlpEvent::RulesSnapshotted { rules, .. } => rules,
        }
    }
}

impl Event for DlpEvent {
    type AggregateId = DlpAggregateId;

    fn event_id(&self) -> EventId {
        match self {
            DlpEvent::ConfigurationItemsAdded { event_id, .. }
            | DlpEvent::ConfigurationItemsRemoved { event_id, .. }
            | DlpEvent::RulesSnapshotted { event_id, .. } => *event_id,
        }
    }

    fn aggregate_id(&self) -> &DlpAggregateId {
        match self {
            DlpEvent::ConfigurationItemsAdded { aggregate_id, .. }
            | DlpEvent::ConfigurationItemsRemoved { aggregate_id, .. }
            | DlpEvent::RulesSnapshotted { aggregate_id, .. } => aggregate_id,
        }
    }

    fn is_snapshot(&self) -> bool {
        matches!(self, DlpEvent::RulesSnapshotted { .. })
    }
}

/// Storage representation of [`DlpEvent`].
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum DlpEventDto {
    #[serde(rename = "dlp-configuration-store")]
    ConfigurationItemsAdded {
        aggregate_key: String,
        event_id: i64,
        configuration_items: Vec<DlpRule>,
    },
    #[serde(rename = "dlp-configuration-clear")]
    ConfigurationItemsRemoved {
        aggregate_key: String,
        event_id: i64,
        configuration_items: Vec<DlpRule>,
    },
    #[serde(rename = "dlp-configuration-snapshot")]
    RulesSnapshotted {
        aggregate_key: String,
        event_id: i64,
        configuration_items: Vec<DlpRule>,
    },
}

impl EventDto for DlpEvent {
    type Dto = DlpEventDto;

    fn type_name(&self) -> &'static str {
        match self {
            DlpEvent::ConfigurationItemsAdded { .. } => "dlp-configuration-store",
            DlpEvent::ConfigurationItemsRemoved { .. } => "dlp-configuration-clear",
            DlpEvent::RulesSnapshotted { .. } => "dlp-configuration-snapshot",
        }
    }

    fn to_dto(&self) -> DlpEventDto {
        let aggregate_key = self.aggregate_id().as_aggregate_key();
        let event_id = self.event_id().as_i64();
        let configuration_items = self.rules().to_vec();
        match self {
            DlpEvent::ConfigurationItemsAdded { .. } => DlpEventDto::ConfigurationItemsAdded {
                aggregate_key,
                event_id,
                configuration_items,
            },
            DlpEvent::ConfigurationItemsRemoved { .. } => DlpEventDto::ConfigurationItemsRemoved {
                aggregate_key,
                event_id,
                configuration_items,
            },
            DlpEvent::RulesSnapshotted { .. } => DlpEventDto::RulesSnapshotted {
                aggregate_key,
                event_id,
                configuration_items,
            },
        }
    }

    fn from_dto(dto: DlpEventDto) -> Result<Self, DtoError> {
        Ok(match dto {
            DlpEventDto::ConfigurationItemsAdded {
                aggregate_key,
                event_id,
                configuration_items,
            } => DlpEvent::ConfigurationItemsAdded {
                aggregate_id: DlpAggregateId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                rules: configuration_items,
            },
            DlpEventDto::ConfigurationItemsRemoved {
                aggregate_key,
                event_id,
                configuration_items,
            } => DlpEvent::ConfigurationItemsRemoved {
                aggregate_id: DlpAggregateId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                rules: configuration_items,
            },
            DlpEventDto::RulesSnapshotted {
                aggregate_key,
                event_id,
                configuration_items,
            } => DlpEvent::RulesSnapshotted {
                aggregate_id: DlpAggregateId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                rules: configuration_items,
            },
        })
    }
}

/// The DLP rules of a domain, folded from its [`DlpEvent`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DlpDomainConfiguration {
    id: DlpAggregateId,
    rules: Vec<DlpRule>,
}

impl DlpDomainConfiguration {
    /// The configured rules, at most one per id, in insertion order.
    pub fn retrieve_rules(&self) -> &[DlpRule] {
        &self.rules
    }
}

impl Aggregate for DlpDomainConfiguration {
    type Id = DlpAggregateId;
    type Event = DlpEvent;
    type Error = DlpError;

    fn new(id: DlpAggregateId) -> Self {
        DlpDomainConfiguration { id, rules: vec![] }
    }

    fn apply(&mut self, event: &DlpEvent) {
        match event {
            DlpEvent::ConfigurationItemsAdded { rules, .. } => {
                for rule in rules {
                    self.rules.retain(|existing| existing.id != rule.id);
                    self.rules.push(rule.clone());
                }
            }
            DlpEvent::ConfigurationItemsRemoved { rules, .. } => {
                self.rules
                    .retain(|existing| !rules.iter().any(|removed| removed.id == existing.id));
            }
            DlpEvent::RulesSnapshotted { rules, .. } => self.rules = rules.clone(),
        }
    }

    fn snapshot(&self, event_id: EventId) -> Option<DlpEvent> {
        Some(DlpEvent::RulesSnapshotted {
            aggregate_id: self.id.clone(),
            event_id,
            rules: self.rules.clone(),
        })
    }
}

/// Commands of the DLP configuration aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DlpCommand {
    /// Replaces the rules of a domain.
    StoreRules {
        /// The configured domain.
        domain: DlpAggregateId,
        /// The complete new rule set.
        rules: Vec<DlpRule>,
    },
    /// Removes every rule of a domain.
    ClearRules {
        /// The configured domain.
        domain: DlpAggregateId,
    },
}

impl Command for DlpCommand {
    type AggregateId = DlpAggregateId;

    fn command_type(&self) -> &'static str {
        match self {
            DlpCommand::StoreRules { .. } => STORE_RULES,
            DlpCommand::ClearRules { .. } => CLEAR_RULES,
        }
    }

    fn aggregate_id(&self) -> &DlpAggregateId {
        match self {
            DlpCommand::StoreRules { domain, .. } | DlpCommand::ClearRules { domain } => domain,
        }
    }
}

/// Handles [`DlpCommand::StoreRules`].
///
/// Emits the removal of stored rules absent from the new set, then the
/// addition of rules not stored yet. A modified rule is both removed and
/// added.
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreRulesHandler;

impl CommandHandler<DlpDomainConfiguration, DlpCommand> for StoreRulesHandler {
    fn command_type(&self) -> &'static str {
        STORE_RULES
    }

    fn handle(
        &self,
        ctx: &mut Context<'_, DlpAggregateId>,
        configuration: &DlpDomainConfiguration,
        command: DlpCommand,
    ) -> Result<Vec<DlpEvent>, DlpError> {
        let DlpCommand::StoreRules { rules, .. } = command else {
            return Ok(vec![]);
        };
        validate_rules(&rules)?;

        let removed: Vec<_> = configuration
            .rules
            .iter()
            .filter(|stored| !rules.contains(*stored))
            .cloned()
            .collect();
        let added: Vec<_> = rules
            .into_iter()
            .filter(|rule| !configuration.rules.contains(rule))
            .collect();
        debug!(
            domain = %configuration.id.domain(),
            removed = removed.len(),
            added = added.len(),
            "storing dlp rules"
        );

        let mut events = Vec::with_capacity(2);
        if !removed.is_empty() {
            events.push(DlpEvent::ConfigurationItemsRemoved {
                aggregate_id: ctx.aggregate_id().clone(),
                event_id: ctx.next_event_id(),
                rules: removed,
            });
        }
        if !added.is_empty() {
            events.push(DlpEvent::ConfigurationItemsAdded {
                aggregate_id: ctx.aggregate_id().clone(),
                event_id: ctx.next_event_id(),
                rules: added,
            });
        }

        Ok(events)
    }
}

/// Handles [`DlpCommand::ClearRules`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ClearRulesHandler;

impl CommandHandler<DlpDomainConfiguration, DlpCommand> for ClearRulesHandler {
    fn command_type(&self) -> &'static str {
        CLEAR_RULES
    }

    fn handle(
        &self,
        ctx: &mut Context<'_, DlpAggregateId>,
        configuration: &DlpDomainConfiguration,
        command: DlpCommand,
    ) -> Result<Vec<DlpEvent>, DlpError> {
        if !matches!(command, DlpCommand::ClearRules { .. }) || configuration.rules.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![DlpEvent::ConfigurationItemsRemoved {
            aggregate_id: ctx.aggregate_id().clone(),
            event_id: ctx.next_event_id(),
            rules: configuration.rules.clone(),
        }])
    }
}

/// The command dispatcher of the DLP context.
pub type DlpSystem<S> = EventSourcingSystem<DlpDomainConfiguration, DlpCommand, S>;

/// Creates a [`DlpSystem`] with every DLP handler registered.
pub fn dlp_system<S>(store: S, snapshot_policy: Option<SnapshotPolicy>) -> DlpSystem<S>
where
    S: EventStore<DlpEvent>,
{
    EventSourcingSystem::builder(store)
        .handler(StoreRulesHandler)
        .handler(ClearRulesHandler)
        .snapshot_policy(snapshot_policy)
        .build()
}

/// The rules currently configured for `domain`.
pub async fn list<S>(store: &S, domain: &DlpAggregateId) -> Result<Vec<DlpRule>, EventStoreError>
where
    S: EventStore<DlpEvent> + ?Sized,
{
    let history = store.get_events_of_aggregate(domain).await?;
    Ok(DlpDomainConfiguration::load(domain.clone(), &history).rules)
}

#[cfg(test)]
mod tests {
    use mailbox_es::{EventDto, EventId};
    use mailbox_es_testing::Given;

    use super::*;
    use crate::dlp::{DlpRuleId, DlpTargets};

    fn domain() -> DlpAggregateId {
        DlpAggregateId::new("example.com")
    }

    fn rule(id: &str, expression: &str) -> DlpRule {
        DlpRule {
            id: DlpRuleId(id.to_string()),
            expression: expression.to_string(),
            explanation: None,
            targets: DlpTargets {
                content: true,
                ..DlpTargets::default()
            },
        }
    }

    fn added(event_id: u32, rules: Vec<DlpRule>) -> DlpEvent {
        DlpEvent::ConfigurationItemsAdded {
            aggregate_id: domain(),
            event_id: EventId::from(event_id),
            rules,
        }
    }

    fn removed(event_id: u32, rules: Vec<DlpRule>) -> DlpEvent {
        DlpEvent::ConfigurationItemsRemoved {
            aggregate_id: domain(),
            event_id: EventId::from(event_id),
            rules,
        }
    }

    fn store(rules: Vec<DlpRule>) -> DlpCommand {
        DlpCommand::StoreRules {
            domain: domain(),
            rules,
        }
    }

    #[test]
    fn key_round_trip() {
        assert_eq!(domain().as_aggregate_key(), "DLPRule/example.com");
        assert_eq!(DlpAggregateId::from_key("DLPRule/example.com"), Ok(domain()));
        assert!(DlpAggregateId::from_key("DLPRule/").is_err());
        assert!(DlpAggregateId::from_key("example.com").is_err());
    }

    #[test]
    fn fold_adds_and_removes_by_id() {
        let a = rule("a", "x");
        let b = rule("b", "y");
        let configuration = DlpDomainConfiguration::given_events(
            domain(),
            vec![added(0, vec![a.clone(), b.clone()]), removed(1, vec![a])],
        )
        .into_state();
        assert_eq!(configuration.retrieve_rules(), &[b]);
    }

    #[test]
    fn re_added_rule_is_not_duplicated() {
        let configuration = DlpDomainConfiguration::given_events(
            domain(),
            vec![
                added(0, vec![rule("a", "x")]),
                added(1, vec![rule("a", "z")]),
            ],
        )
        .into_state();
        assert_eq!(configuration.retrieve_rules(), &[rule("a", "z")]);
    }

    #[test]
    fn store_rules_emits_removals_then_additions() {
        DlpDomainConfiguration::given(domain(), added(0, vec![rule("a", "x"), rule("b", "y")]))
            .when(&StoreRulesHandler, store(vec![rule("b", "y"), rule("c", "z")]))
            .then_ok(vec![
                removed(1, vec![rule("a", "x")]),
                added(2, vec![rule("c", "z")]),
            ])
            .when(&StoreRulesHandler, store(vec![rule("b", "y"), rule("c", "z")]))
            .then_no_events();
    }

    #[test]
    fn modified_rule_is_replaced() {
        DlpDomainConfiguration::given(domain(), added(0, vec![rule("a", "x")]))
            .when(&StoreRulesHandler, store(vec![rule("a", "changed")]))
            .then_ok(vec![
                removed(1, vec![rule("a", "x")]),
                added(2, vec![rule("a", "changed")]),
            ])
            .should_eq(DlpDomainConfiguration {
                id: domain(),
                rules: vec![rule("a", "changed")],
            });
    }

    #[test]
    fn store_rules_validates() {
        DlpDomainConfiguration::given_no_events(domain())
            .when(&StoreRulesHandler, store(vec![rule("a", "x"), rule("a", "y")]))
            .then_err(DlpError::DuplicateRuleIds(vec![DlpRuleId("a".to_string())]));

        let result = DlpDomainConfiguration::given_no_events(domain())
            .when(&StoreRulesHandler, store(vec![rule("a", "[")]))
            .into_result();
        assert!(matches!(result, Err(DlpError::InvalidExpression { .. })));
    }

    #[test]
    fn clear_rules() {
        DlpDomainConfiguration::given_no_events(domain())
            .when(&ClearRulesHandler, DlpCommand::ClearRules { domain: domain() })
            .then_no_events();

        DlpDomainConfiguration::given(domain(), added(0, vec![rule("a", "x")]))
            .when(&ClearRulesHandler, DlpCommand::ClearRules { domain: domain() })
            .then_ok(vec![removed(1, vec![rule("a", "x")])])
            .should_eq(DlpDomainConfiguration::new(domain()));
    }

    #[test]
    fn dto_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&added(0, vec![rule("a", "x")]).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "dlp-configuration-store",
                "aggregateKey": "DLPRule/example.com",
                "eventId": 0,
                "configurationItems": [{
                    "id": "a",
                    "expression": "x",
                    "targetsSender": false,
                    "targetsRecipients": false,
                    "targetsContent": true,
                }],
            })
        );
        assert_eq!(
            DlpEvent::from_json(&json.to_string()).unwrap(),
            added(0, vec![rule("a", "x")])
        );
    }
}
