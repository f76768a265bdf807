use std::fmt;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use mailbox_es::Subscriber;

use super::{HistoryEvolution, Quota, QuotaThreshold, QuotaThresholdEvent, UserQuotaThresholdsId};

/// Tells a user that their quota occupation crossed a threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaThresholdNotice {
    /// Crossed message count threshold, if it should be reported.
    pub count_threshold: Option<QuotaThreshold>,
    /// Crossed size threshold, if it should be reported.
    pub size_threshold: Option<QuotaThreshold>,
    /// Size quota when the threshold was crossed.
    pub size_quota: Quota,
    /// Message count quota when the threshold was crossed.
    pub count_quota: Quota,
}

impl QuotaThresholdNotice {
    /// The notice to send for the given evolutions.
    ///
    /// Only higher thresholds not already reached during the grace period
    /// are reported; `None` if there is nothing to report.
    pub fn from_evolutions(
        size_evolution: &HistoryEvolution,
        count_evolution: &HistoryEvolution,
        size_quota: Quota,
        count_quota: Quota,
    ) -> Option<Self> {
        let reported = |evolution: &HistoryEvolution| {
            evolution
                .is_not_already_reached_during_grace_period()
                .then(|| evolution.change().map(|change| change.threshold))
                .flatten()
        };
        let size_threshold = reported(size_evolution);
        let count_threshold = reported(count_evolution);
        if size_threshold.is_none() && count_threshold.is_none() {
            return None;
        }

        Some(QuotaThresholdNotice {
            count_threshold,
            size_threshold,
            size_quota,
            count_quota,
        })
    }

    /// A human readable report of the notice.
    pub fn generate_report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QuotaThresholdNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(
            "You receive this email because you recently exceeded a threshold related to the quotas of your email account.\n\n",
        )?;

        if let Some(threshold) = self.size_threshold {
            writeln!(
                f,
                "You currently occupy more than {} % of the total size allocated to you.",
                threshold.as_percent()
            )?;
            match self.size_quota.limit {
                Some(limit) => writeln!(
                    f,
                    "You currently occupy {} bytes on a total of {limit} bytes allocated to you.",
                    self.size_quota.used
                )?,
                None => writeln!(f, "You currently occupy {} bytes.", self.size_quota.used)?,
            }
            f.write_str("\n")?;
        }

        if let Some(threshold) = self.count_threshold {
            writeln!(
                f,
                "You currently occupy more than {} % of the total message count allocated to you.",
                threshold.as_percent()
            )?;
            match self.count_quota.limit {
                Some(limit) => writeln!(
                    f,
                    "You currently have {} messages on a total of {limit} allowed for you.",
                    self.count_quota.used
                )?,
                None => writeln!(f, "You currently have {} messages.", self.count_quota.used)?,
            }
            f.write_str("\n")?;
        }

        f.write_str(
            "You need to be aware that actions leading to exceeded quotas will be denied. This will result in a degraded service.\n\
             To mitigate this issue you might reach your administrator in order to increase your configured quota. You might also delete some non important emails.",
        )
    }
}

/// A notice addressed to the user of a threshold history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThresholdNotification {
    /// The notified user and the listener that detected the crossing.
    pub id: UserQuotaThresholdsId,
    /// What to tell the user.
    pub notice: QuotaThresholdNotice,
}

/// Turns appended threshold changes into [`ThresholdNotification`]s sent on
/// a channel.
#[derive(Clone, Debug)]
pub struct QuotaThresholdNoticeSubscriber {
    sender: mpsc::UnboundedSender<ThresholdNotification>,
}

impl QuotaThresholdNoticeSubscriber {
    /// Creates a subscriber and the receiving end of its notifications.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ThresholdNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (QuotaThresholdNoticeSubscriber { sender }, receiver)
    }
}

#[async_trait]
impl Subscriber<QuotaThresholdEvent> for QuotaThresholdNoticeSubscriber {
    fn name(&self) -> &str {
        "quota-threshold-notice"
    }

    async fn handle(&self, event: &QuotaThresholdEvent) -> anyhow::Result<()> {
        let QuotaThresholdEvent::QuotaThresholdChanged {
            aggregate_id,
            size_evolution,
            count_evolution,
            size_quota,
            count_quota,
            ..
        } = event
        else {
            return Ok(());
        };
        let Some(notice) = QuotaThresholdNotice::from_evolutions(
            size_evolution,
            count_evolution,
            *size_quota,
            *count_quota,
        ) else {
            return Ok(());
        };

        info!(
            user = %aggregate_id.user(),
            listener = %aggregate_id.listener_name(),
            size_threshold = ?notice.size_threshold,
            count_threshold = ?notice.count_threshold,
            "quota threshold notice"
        );
        self.sender
            .send(ThresholdNotification {
                id: aggregate_id.clone(),
                notice,
            })
            .map_err(|_| anyhow!("notice receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use mailbox_es::EventId;

    use super::*;
    use crate::quota_threshold::{QuotaThresholdChange, Recentness};

    fn threshold(ratio: f64) -> QuotaThreshold {
        QuotaThreshold::new(ratio).unwrap()
    }

    fn higher(ratio: f64, recentness: Recentness) -> HistoryEvolution {
        HistoryEvolution::HigherThresholdReached {
            change: QuotaThresholdChange::new(
                threshold(ratio),
                Utc.with_ymd_and_hms(2018, 1, 18, 12, 0, 0).unwrap(),
            ),
            recentness,
        }
    }

    const HEADER: &str = "You receive this email because you recently exceeded a threshold related to the quotas of your email account.\n\n";
    const FOOTER: &str = "You need to be aware that actions leading to exceeded quotas will be denied. This will result in a degraded service.\nTo mitigate this issue you might reach your administrator in order to increase your configured quota. You might also delete some non important emails.";

    #[test]
    fn nothing_to_report() {
        let quota = Quota::limited(82, 100);
        assert_eq!(
            QuotaThresholdNotice::from_evolutions(
                &HistoryEvolution::NoChanges,
                &HistoryEvolution::NoChanges,
                quota,
                quota
            ),
            None
        );
        assert_eq!(
            QuotaThresholdNotice::from_evolutions(
                &higher(0.8, Recentness::AlreadyReachedDuringGracePeriod),
                &HistoryEvolution::NoChanges,
                quota,
                quota
            ),
            None
        );
    }

    #[test]
    fn reports_only_new_higher_thresholds() {
        let quota = Quota::limited(82, 100);
        let notice = QuotaThresholdNotice::from_evolutions(
            &higher(0.8, Recentness::NotAlreadyReachedDuringGracePeriod),
            &HistoryEvolution::LowerThresholdReached(QuotaThresholdChange::new(
                threshold(0.5),
                Utc.with_ymd_and_hms(2018, 1, 18, 12, 0, 0).unwrap(),
            )),
            quota,
            quota,
        );
        assert_eq!(
            notice,
            Some(QuotaThresholdNotice {
                count_threshold: None,
                size_threshold: Some(threshold(0.8)),
                size_quota: quota,
                count_quota: quota,
            })
        );
    }

    #[test]
    fn report_with_both_quotas() {
        let notice = QuotaThresholdNotice {
            count_threshold: Some(threshold(0.8)),
            size_threshold: Some(threshold(0.8)),
            size_quota: Quota::limited(82, 100),
            count_quota: Quota::limited(92, 100),
        };
        assert_eq!(
            notice.generate_report(),
            format!(
                "{HEADER}\
                 You currently occupy more than 80 % of the total size allocated to you.\n\
                 You currently occupy 82 bytes on a total of 100 bytes allocated to you.\n\
                 \n\
                 You currently occupy more than 80 % of the total message count allocated to you.\n\
                 You currently have 92 messages on a total of 100 allowed for you.\n\
                 \n\
                 {FOOTER}"
            )
        );
    }

    #[test]
    fn report_with_unlimited_quotas() {
        let notice = QuotaThresholdNotice {
            count_threshold: Some(threshold(0.8)),
            size_threshold: Some(threshold(0.8)),
            size_quota: Quota::unlimited(82),
            count_quota: Quota::unlimited(92),
        };
        let report = notice.generate_report();
        assert!(report.contains("You currently occupy 82 bytes.\n"));
        assert!(report.contains("You currently have 92 messages.\n"));
    }

    #[test]
    fn report_with_size_only_is_the_displayed_notice() {
        let notice = QuotaThresholdNotice {
            count_threshold: None,
            size_threshold: Some(threshold(0.9)),
            size_quota: Quota::limited(95, 100),
            count_quota: Quota::limited(1, 100),
        };
        assert_eq!(notice.generate_report(), notice.to_string());
        assert_eq!(
            notice.to_string(),
            format!(
                "{HEADER}\
                 You currently occupy more than 90 % of the total size allocated to you.\n\
                 You currently occupy 95 bytes on a total of 100 bytes allocated to you.\n\
                 \n\
                 {FOOTER}"
            )
        );
    }

    #[tokio::test]
    async fn subscriber_sends_notifications() {
        let (subscriber, mut receiver) = QuotaThresholdNoticeSubscriber::new();
        let id = UserQuotaThresholdsId::from("bob", "notifier").unwrap();
        let event = QuotaThresholdEvent::QuotaThresholdChanged {
            aggregate_id: id.clone(),
            event_id: EventId::first(),
            size_evolution: higher(0.8, Recentness::NotAlreadyReachedDuringGracePeriod),
            count_evolution: HistoryEvolution::NoChanges,
            size_quota: Quota::limited(82, 100),
            count_quota: Quota::limited(1, 100),
        };

        subscriber.handle(&event).await.unwrap();
        let notification = receiver.try_recv().unwrap();
        assert_eq!(notification.id, id);
        assert_eq!(notification.notice.size_threshold, Some(threshold(0.8)));

        drop(receiver);
        assert!(subscriber.handle(&event).await.is_err());
    }
}
