use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mailbox_es::{
    Aggregate, AggregateId, Command, CommandHandler, Context, DtoError, Event, EventDto, EventId,
    EventSourcingSystem, EventStore, InvalidAggregateKey, SnapshotPolicy,
};

use super::{
    HistoryEvolution, Quota, QuotaThreshold, QuotaThresholdChange, QuotaThresholdError,
    QuotaThresholdHistory, QuotaThresholdNoticeSubscriber, QuotaThresholds, Recentness,
};

/// Command type of [`DetectThresholdCrossing`].
pub const DETECT_THRESHOLD_CROSSING: &str = "detect-threshold-crossing";

const SEPARATOR: char = '/';

/// Identifies the threshold history a listener keeps for a user.
///
/// Keyed as `QuotaThresholdEvents/<user>/<listener>`; neither component may
/// contain a `/`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct UserQuotaThresholdsId {
    user: String,
    listener_name: String,
}

impl UserQuotaThresholdsId {
    const PREFIX: &'static str = "QuotaThresholdEvents";

    /// The history `listener_name` keeps for `user`.
    pub fn from(
        user: impl Into<String>,
        listener_name: impl Into<String>,
    ) -> Result<Self, InvalidAggregateKey> {
        let user = user.into();
        let listener_name = listener_name.into();
        for component in [&user, &listener_name] {
            if component.contains(SEPARATOR) {
                return Err(InvalidAggregateKey::new(
                    component.as_str(),
                    "component contains '/'",
                ));
            }
        }

        Ok(UserQuotaThresholdsId {
            user,
            listener_name,
        })
    }

    /// Parses a key produced by [`AggregateId::as_aggregate_key`].
    pub fn from_key(key: &str) -> Result<Self, InvalidAggregateKey> {
        let parts: Vec<_> = key.split(SEPARATOR).collect();
        match parts.as_slice() {
            [prefix, user, listener_name] if *prefix == Self::PREFIX => {
                UserQuotaThresholdsId::from(*user, *listener_name)
            }
            [_, _, _] => Err(InvalidAggregateKey::new(key, "unexpected key prefix")),
            _ => Err(InvalidAggregateKey::new(key, "expected 3 '/' separated parts")),
        }
    }

    /// The user whose quota is watched.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The listener keeping the history.
    pub fn listener_name(&self) -> &str {
        &self.listener_name
    }
}

impl AggregateId for UserQuotaThresholdsId {
    fn as_aggregate_key(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            Self::PREFIX,
            self.user,
            self.listener_name
        )
    }
}

/// Events of a user's quota threshold history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuotaThresholdEvent {
    /// The size or count threshold evolved.
    QuotaThresholdChanged {
        /// The watched user and listener.
        aggregate_id: UserQuotaThresholdsId,
        /// Position in the history.
        event_id: EventId,
        /// Evolution of the size threshold.
        size_evolution: HistoryEvolution,
        /// Evolution of the message count threshold.
        count_evolution: HistoryEvolution,
        /// Size quota when the change was detected.
        size_quota: Quota,
        /// Message count quota when the change was detected.
        count_quota: Quota,
    },
    /// Both threshold histories at this point of the history.
    QuotaThresholdsSnapshotted {
        /// The watched user and listener.
        aggregate_id: UserQuotaThresholdsId,
        /// Position in the history.
        event_id: EventId,
        /// Reached size thresholds.
        size_history: QuotaThresholdHistory,
        /// Reached message count thresholds.
        count_history: QuotaThresholdHistory,
    },
}

impl Event for QuotaThresholdEvent {
    type AggregateId = UserQuotaThresholdsId;

    fn event_id(&self) -> EventId {
        match self {
            QuotaThresholdEvent::QuotaThresholdChanged { event_id, .. }
            | QuotaThresholdEvent::QuotaThresholdsSnapshotted { event_id, .. } => *event_id,
        }
    }

    fn aggregate_id(&self) -> &UserQuotaThresholdsId {
        match self {
            QuotaThresholdEvent::QuotaThresholdChanged { aggregate_id, .. }
            | QuotaThresholdEvent::QuotaThresholdsSnapshotted { aggregate_id, .. } => aggregate_id,
        }
    }

    fn is_snapshot(&self) -> bool {
        matches!(self, QuotaThresholdEvent::QuotaThresholdsSnapshotted { .. })
    }
}

/// Kind of a [`HistoryEvolutionDto`].
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryChangeType {
    NoChange,
    LowerThresholdReached,
    HigherThresholdReached,
}

/// Storage representation of [`HistoryEvolution`].
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvolutionDto {
    pub change: HistoryChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recentness: Option<Recentness>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<QuotaThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instant: Option<i64>,
}

impl From<&HistoryEvolution> for HistoryEvolutionDto {
    fn from(evolution: &HistoryEvolution) -> Self {
        let (change, recentness) = match evolution {
            HistoryEvolution::NoChanges => (HistoryChangeType::NoChange, None),
            HistoryEvolution::LowerThresholdReached(_) => {
                (HistoryChangeType::LowerThresholdReached, None)
            }
            HistoryEvolution::HigherThresholdReached { recentness, .. } => {
                (HistoryChangeType::HigherThresholdReached, Some(*recentness))
            }
        };
        HistoryEvolutionDto {
            change,
            recentness,
            threshold: evolution.change().map(|change| change.threshold),
            instant: evolution.change().map(|change| change.instant.timestamp_millis()),
        }
    }
}

impl TryFrom<HistoryEvolutionDto> for HistoryEvolution {
    type Error = DtoError;

    fn try_from(dto: HistoryEvolutionDto) -> Result<Self, DtoError> {
        let change = || -> Result<QuotaThresholdChange, DtoError> {
            let threshold = dto
                .threshold
                .ok_or_else(|| DtoError::invalid_field("threshold", "missing"))?;
            let instant = dto
                .instant
                .ok_or_else(|| DtoError::invalid_field("instant", "missing"))?;
            Ok(QuotaThresholdChange::new(threshold, instant_from_millis(instant)?))
        };

        Ok(match dto.change {
            HistoryChangeType::NoChange => HistoryEvolution::NoChanges,
            HistoryChangeType::LowerThresholdReached => {
                HistoryEvolution::LowerThresholdReached(change()?)
            }
            HistoryChangeType::HigherThresholdReached => HistoryEvolution::HigherThresholdReached {
                change: change()?,
                recentness: dto
                    .recentness
                    .ok_or_else(|| DtoError::invalid_field("recentness", "missing"))?,
            },
        })
    }
}

fn instant_from_millis(millis: i64) -> Result<DateTime<Utc>, DtoError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DtoError::invalid_field("instant", format!("out of range: {millis}")))
}

/// Storage representation of [`QuotaThresholdEvent`].
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum QuotaThresholdEventDto {
    #[serde(rename = "quota-threshold-change")]
    QuotaThresholdChanged {
        aggregate_key: String,
        event_id: i64,
        size_evolution: HistoryEvolutionDto,
        count_evolution: HistoryEvolutionDto,
        size_quota: Quota,
        count_quota: Quota,
    },
    #[serde(rename = "quota-thresholds-snapshot")]
    QuotaThresholdsSnapshotted {
        aggregate_key: String,
        event_id: i64,
        size_history: QuotaThresholdHistory,
        count_history: QuotaThresholdHistory,
    },
}

impl EventDto for QuotaThresholdEvent {
    type Dto = QuotaThresholdEventDto;

    fn type_name(&self) -> &'static str {
        match self {
            QuotaThresholdEvent::QuotaThresholdChanged { .. } => "quota-threshold-change",
            QuotaThresholdEvent::QuotaThresholdsSnapshotted { .. } => "quota-thresholds-snapshot",
        }
    }

    fn to_dto(&self) -> QuotaThresholdEventDto {
        match self {
            QuotaThresholdEvent::QuotaThresholdChanged {
                aggregate_id,
                event_id,
                size_evolution,
                count_evolution,
                size_quota,
                count_quota,
            } => QuotaThresholdEventDto::QuotaThresholdChanged {
                aggregate_key: aggregate_id.as_aggregate_key(),
                event_id: event_id.as_i64(),
                size_evolution: size_evolution.into(),
                count_evolution: count_evolution.into(),
                size_quota: *size_quota,
                count_quota: *count_quota,
            },
            QuotaThresholdEvent::QuotaThresholdsSnapshotted {
                aggregate_id,
                event_id,
                size_history,
                count_history,
            } => QuotaThresholdEventDto::QuotaThresholdsSnapshotted {
                aggregate_key: aggregate_id.as_aggregate_key(),
                event_id: event_id.as_i64(),
                size_history: size_history.clone(),
                count_history: count_history.clone(),
            },
        }
    }

    fn from_dto(dto: QuotaThresholdEventDto) -> Result<Self, DtoError> {
        Ok(match dto {
            QuotaThresholdEventDto::QuotaThresholdChanged {
                aggregate_key,
                event_id,
                size_evolution,
                count_evolution,
                size_quota,
                count_quota,
            } => QuotaThresholdEvent::QuotaThresholdChanged {
                aggregate_id: UserQuotaThresholdsId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                size_evolution: size_evolution.try_into()?,
                count_evolution: count_evolution.try_into()?,
                size_quota,
                count_quota,
            },
            QuotaThresholdEventDto::QuotaThresholdsSnapshotted {
                aggregate_key,
                event_id,
                size_history,
                count_history,
            } => QuotaThresholdEvent::QuotaThresholdsSnapshotted {
                aggregate_id: UserQuotaThresholdsId::from_key(&aggregate_key)?,
                event_id: EventId::of(event_id)?,
                size_history,
                count_history,
            },
        })
    }
}

/// The thresholds a user reached, folded from its [`QuotaThresholdEvent`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserQuotaThresholds {
    id: UserQuotaThresholdsId,
    size_history: QuotaThresholdHistory,
    count_history: QuotaThresholdHistory,
}

impl UserQuotaThresholds {
    /// Reached size thresholds.
    pub fn size_history(&self) -> &QuotaThresholdHistory {
        &self.size_history
    }

    /// Reached message count thresholds.
    pub fn count_history(&self) -> &QuotaThresholdHistory {
        &self.count_history
    }
}

impl Aggregate for UserQuotaThresholds {
    type Id = UserQuotaThresholdsId;
    type Event = QuotaThresholdEvent;
    type Error = QuotaThresholdError;

    fn new(id: UserQuotaThresholdsId) -> Self {
        UserQuotaThresholds {
            id,
            size_history: QuotaThresholdHistory::default(),
            count_history: QuotaThresholdHistory::default(),
        }
    }

    fn apply(&mut self, event: &QuotaThresholdEvent) {
        match event {
            QuotaThresholdEvent::QuotaThresholdChanged {
                size_evolution,
                count_evolution,
                ..
            } => {
                if let Some(change) = size_evolution.change() {
                    self.size_history.push(*change);
                }
                if let Some(change) = count_evolution.change() {
                    self.count_history.push(*change);
                }
            }
            QuotaThresholdEvent::QuotaThresholdsSnapshotted {
                size_history,
                count_history,
                ..
            } => {
                self.size_history = size_history.clone();
                self.count_history = count_history.clone();
            }
        }
    }

    fn snapshot(&self, event_id: EventId) -> Option<QuotaThresholdEvent> {
        Some(QuotaThresholdEvent::QuotaThresholdsSnapshotted {
            aggregate_id: self.id.clone(),
            event_id,
            size_history: self.size_history.clone(),
            count_history: self.count_history.clone(),
        })
    }
}

/// Reports the current quotas of a user, to detect crossed thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectThresholdCrossing {
    /// The watched user and listener.
    pub id: UserQuotaThresholdsId,
    /// Current size quota.
    pub size_quota: Quota,
    /// Current message count quota.
    pub count_quota: Quota,
    /// When the quotas were measured.
    pub instant: DateTime<Utc>,
}

impl Command for DetectThresholdCrossing {
    type AggregateId = UserQuotaThresholdsId;

    fn command_type(&self) -> &'static str {
        DETECT_THRESHOLD_CROSSING
    }

    fn aggregate_id(&self) -> &UserQuotaThresholdsId {
        &self.id
    }
}

/// Handles [`DetectThresholdCrossing`].
///
/// Emits a [`QuotaThresholdEvent::QuotaThresholdChanged`] when the highest
/// exceeded size or count threshold differs from the latest reached one.
#[derive(Clone, Debug)]
pub struct DetectThresholdCrossingHandler {
    thresholds: QuotaThresholds,
    grace_period: Duration,
}

impl DetectThresholdCrossingHandler {
    /// Watches `thresholds`, notifying at most once per `grace_period`.
    ///
    /// A negative grace period counts as zero.
    pub fn new(thresholds: QuotaThresholds, grace_period: Duration) -> Self {
        DetectThresholdCrossingHandler {
            thresholds,
            grace_period: grace_period.max(Duration::zero()),
        }
    }

    fn evolution(
        &self,
        history: &QuotaThresholdHistory,
        quota: &Quota,
        instant: DateTime<Utc>,
    ) -> HistoryEvolution {
        let change = QuotaThresholdChange::new(self.thresholds.highest_exceeded(quota), instant);
        history.compare_with_current_threshold(&change, self.grace_period)
    }
}

impl CommandHandler<UserQuotaThresholds, DetectThresholdCrossing> for DetectThresholdCrossingHandler {
    fn command_type(&self) -> &'static str {
        DETECT_THRESHOLD_CROSSING
    }

    fn handle(
        &self,
        ctx: &mut Context<'_, UserQuotaThresholdsId>,
        aggregate: &UserQuotaThresholds,
        command: DetectThresholdCrossing,
    ) -> Result<Vec<QuotaThresholdEvent>, QuotaThresholdError> {
        let size_evolution =
            self.evolution(&aggregate.size_history, &command.size_quota, command.instant);
        let count_evolution =
            self.evolution(&aggregate.count_history, &command.count_quota, command.instant);
        if !size_evolution.is_change() && !count_evolution.is_change() {
            return Ok(vec![]);
        }
        debug!(
            user = %command.id.user(),
            listener = %command.id.listener_name(),
            ?size_evolution,
            ?count_evolution,
            "quota threshold changed"
        );

        Ok(vec![QuotaThresholdEvent::QuotaThresholdChanged {
            aggregate_id: ctx.aggregate_id().clone(),
            event_id: ctx.next_event_id(),
            size_evolution,
            count_evolution,
            size_quota: command.size_quota,
            count_quota: command.count_quota,
        }])
    }
}

/// The command dispatcher of the quota threshold context.
pub type QuotaThresholdSystem<S> =
    EventSourcingSystem<UserQuotaThresholds, DetectThresholdCrossing, S>;

/// Creates a [`QuotaThresholdSystem`] sending notices to `notices`.
pub fn quota_threshold_system<S>(
    store: S,
    handler: DetectThresholdCrossingHandler,
    notices: QuotaThresholdNoticeSubscriber,
    snapshot_policy: Option<SnapshotPolicy>,
) -> QuotaThresholdSystem<S>
where
    S: EventStore<QuotaThresholdEvent>,
{
    EventSourcingSystem::builder(store)
        .handler(handler)
        .subscriber(notices)
        .snapshot_policy(snapshot_policy)
        .build()
}
