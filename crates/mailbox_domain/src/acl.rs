//! Mailbox access control lists.
//!
//! The ACL of a mailbox is rebuilt from `acl-updated` events, each carrying
//! the diff between the previous and the new list. Replaying the diffs in
//! order yields the current [`MailboxAcl`].

pub use aggregate::*;
pub use entry_key::*;
pub use mailbox_acl::*;
pub use rights::*;

mod aggregate;
mod entry_key;
mod mailbox_acl;
mod rights;
