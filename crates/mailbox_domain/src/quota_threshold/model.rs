use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors of the quota threshold context.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QuotaThresholdError {
    /// A threshold ratio outside `[0, 1]`.
    #[error("quota threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
    /// A threshold list that could not be parsed.
    #[error("invalid quota thresholds '{0}'")]
    InvalidThresholds(String),
}

/// An occupation ratio of a quota, within `[0, 1]`.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct QuotaThreshold(f64);

impl QuotaThreshold {
    /// The threshold every quota exceeds as soon as it is used.
    pub const ZERO: QuotaThreshold = QuotaThreshold(0.0);

    /// A threshold of `ratio`.
    pub fn new(ratio: f64) -> Result<Self, QuotaThresholdError> {
        if (0.0..=1.0).contains(&ratio) {
            Ok(QuotaThreshold(ratio))
        } else {
            Err(QuotaThresholdError::InvalidThreshold(ratio))
        }
    }

    /// The occupation ratio.
    pub fn ratio(&self) -> f64 {
        self.0
    }

    /// The ratio as a whole percentage.
    pub fn as_percent(&self) -> u32 {
        (self.0 * 100.0).round() as u32
    }

    /// Whether `quota` occupies more than this threshold.
    pub fn is_exceeded(&self, quota: &Quota) -> bool {
        quota.ratio().is_some_and(|ratio| ratio > self.0)
    }
}

impl PartialEq for QuotaThreshold {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QuotaThreshold {}

impl PartialOrd for QuotaThreshold {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QuotaThreshold {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl TryFrom<f64> for QuotaThreshold {
    type Error = QuotaThresholdError;

    fn try_from(ratio: f64) -> Result<Self, Self::Error> {
        QuotaThreshold::new(ratio)
    }
}

impl From<QuotaThreshold> for f64 {
    fn from(threshold: QuotaThreshold) -> Self {
        threshold.0
    }
}

impl fmt::Debug for QuotaThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuotaThreshold({})", self.0)
    }
}

impl fmt::Display for QuotaThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} %", self.as_percent())
    }
}

/// Current usage of a quota. A `limit` of `None` is unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Used amount.
    pub used: u64,
    /// Allowed amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Quota {
    /// A quota of `used` out of `limit`.
    pub fn limited(used: u64, limit: u64) -> Self {
        Quota {
            used,
            limit: Some(limit),
        }
    }

    /// An unlimited quota of which `used` is consumed.
    pub fn unlimited(used: u64) -> Self {
        Quota { used, limit: None }
    }

    /// Occupation ratio, `None` when unlimited.
    pub fn ratio(&self) -> Option<f64> {
        match self.limit {
            None => None,
            Some(0) if self.used == 0 => Some(0.0),
            Some(0) => Some(f64::INFINITY),
            Some(limit) => Some(self.used as f64 / limit as f64),
        }
    }
}

/// The thresholds a listener watches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotaThresholds(Vec<QuotaThreshold>);

impl QuotaThresholds {
    /// Watches `thresholds`, in any order.
    pub fn new(thresholds: impl IntoIterator<Item = QuotaThreshold>) -> Self {
        let mut thresholds: Vec<_> = thresholds.into_iter().collect();
        thresholds.sort_by(|a, b| b.cmp(a));
        thresholds.dedup();
        QuotaThresholds(thresholds)
    }

    /// The watched thresholds, highest first.
    pub fn thresholds(&self) -> &[QuotaThreshold] {
        &self.0
    }

    /// The highest threshold `quota` exceeds, [`QuotaThreshold::ZERO`] if
    /// none.
    pub fn highest_exceeded(&self, quota: &Quota) -> QuotaThreshold {
        self.0
            .iter()
            .copied()
            .find(|threshold| threshold.is_exceeded(quota))
            .unwrap_or(QuotaThreshold::ZERO)
    }
}

impl FromStr for QuotaThresholds {
    type Err = QuotaThresholdError;

    /// Parses comma separated ratios, such as `0.8,0.9,0.99`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let thresholds = s
            .split(',')
            .map(str::trim)
            .filter(|ratio| !ratio.is_empty())
            .map(|ratio| {
                ratio
                    .parse::<f64>()
                    .map_err(|_| QuotaThresholdError::InvalidThresholds(s.to_string()))
                    .and_then(QuotaThreshold::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QuotaThresholds::new(thresholds))
    }
}

/// A threshold reached at some instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaThresholdChange {
    /// The reached threshold.
    pub threshold: QuotaThreshold,
    /// When it was reached.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub instant: DateTime<Utc>,
}

impl QuotaThresholdChange {
    /// `threshold` reached at `instant`.
    pub fn new(threshold: QuotaThreshold, instant: DateTime<Utc>) -> Self {
        QuotaThresholdChange { threshold, instant }
    }

    /// Whether the change happened strictly after `instant`.
    pub fn is_after(&self, instant: DateTime<Utc>) -> bool {
        self.instant > instant
    }
}

/// Whether a higher threshold was already reached during the grace period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recentness {
    /// It was; the user was notified recently.
    AlreadyReachedDuringGracePeriod,
    /// It was not; the user should be notified.
    NotAlreadyReachedDuringGracePeriod,
}

/// How a new threshold compares to the history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryEvolution {
    /// The threshold is the latest reached one.
    NoChanges,
    /// Usage dropped below the latest reached threshold.
    LowerThresholdReached(QuotaThresholdChange),
    /// Usage grew above the latest reached threshold.
    HigherThresholdReached {
        /// The reached threshold.
        change: QuotaThresholdChange,
        /// Whether it was already reached during the grace period.
        recentness: Recentness,
    },
}

impl HistoryEvolution {
    /// Whether the history should record a change.
    pub fn is_change(&self) -> bool {
        !matches!(self, HistoryEvolution::NoChanges)
    }

    /// The recorded change, if any.
    pub fn change(&self) -> Option<&QuotaThresholdChange> {
        match self {
            HistoryEvolution::NoChanges => None,
            HistoryEvolution::LowerThresholdReached(change)
            | HistoryEvolution::HigherThresholdReached { change, .. } => Some(change),
        }
    }

    /// Whether the user should be notified of this evolution.
    pub fn is_not_already_reached_during_grace_period(&self) -> bool {
        matches!(
            self,
            HistoryEvolution::HigherThresholdReached {
                recentness: Recentness::NotAlreadyReachedDuringGracePeriod,
                ..
            }
        )
    }
}

/// The thresholds reached so far, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaThresholdHistory(Vec<QuotaThresholdChange>);

impl QuotaThresholdHistory {
    /// A history of `changes`, oldest first.
    pub fn new(changes: Vec<QuotaThresholdChange>) -> Self {
        QuotaThresholdHistory(changes)
    }

    /// The recorded changes, oldest first.
    pub fn changes(&self) -> &[QuotaThresholdChange] {
        &self.0
    }

    /// Records `change`.
    pub fn push(&mut self, change: QuotaThresholdChange) {
        self.0.push(change);
    }

    /// Compares `change` with the latest reached threshold.
    ///
    /// A higher threshold is judged recent if a threshold at least as high
    /// was reached after `change.instant - grace_period`.
    pub fn compare_with_current_threshold(
        &self,
        change: &QuotaThresholdChange,
        grace_period: Duration,
    ) -> HistoryEvolution {
        let latest = self
            .0
            .last()
            .map(|change| change.threshold)
            .unwrap_or(QuotaThreshold::ZERO);

        match change.threshold.cmp(&latest) {
            Ordering::Equal => HistoryEvolution::NoChanges,
            Ordering::Less => HistoryEvolution::LowerThresholdReached(*change),
            Ordering::Greater => {
                // A grace period reaching past the earliest instant covers everything.
                let since = change.instant.checked_sub_signed(grace_period);
                let recent = self
                    .0
                    .iter()
                    .filter(|past| since.map_or(true, |since| past.is_after(since)))
                    .any(|past| past.threshold >= change.threshold);
                let recentness = if recent {
                    Recentness::AlreadyReachedDuringGracePeriod
                } else {
                    Recentness::NotAlreadyReachedDuringGracePeriod
                };
                HistoryEvolution::HigherThresholdReached {
                    change: *change,
                    recentness,
                }
            }
        }
    }
}
