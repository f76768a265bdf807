//! Event sourced bounded contexts of a mailbox server.
//!
//! - [`acl`]: per-mailbox access control lists (RFC 4314 rights).
//! - [`dlp`]: per-domain data loss prevention rules.
//! - [`quota_threshold`]: per-user quota threshold crossings and the notices
//!   they trigger.
//!
//! Each context defines its aggregate id, events with their storage DTOs, the
//! folded aggregate, and the command handlers to register on a
//! [`EventSourcingSystem`](mailbox_es::EventSourcingSystem).

pub mod acl;
pub mod dlp;
pub mod quota_threshold;
