//! Testing utilities for [mailbox_es](mailbox_es) aggregates and stores.
//!
//! # Aggregates
//!
//! [`Given`] builds an aggregate from past events, runs a command handler on
//! it and checks the outcome:
//!
//! ```ignore
//! use mailbox_es_testing::*;
//!
//! DlpDomainConfiguration::given_no_events(domain.clone())
//!     .when(&StoreRulesHandler, store_rules(vec![rule_a.clone()]))
//!     .then_ok(vec![added(0, vec![rule_a])]);
//! ```
//!
//! # Event stores
//!
//! [`contract::run_all`] checks that a backend honours the
//! [`EventStore`](mailbox_es::EventStore) contract, including its behaviour
//! under concurrent appends.

#![deny(missing_docs)]

pub mod contract;
pub mod fixtures;
mod given;

pub use given::*;
