//! Quota threshold crossings.
//!
//! For each user and listener, the history of crossed occupation thresholds
//! (size and message count) is event sourced. When a higher threshold is
//! reached and was not already reached during the grace period, a
//! [`QuotaThresholdNotice`] is emitted.

pub use aggregate::*;
pub use model::*;
pub use notice::*;

mod aggregate;
mod model;
mod notice;
