use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{EntryKey, InvalidEntryKeyError, Rights, UnsupportedRightError};

/// How an [`AclCommand`] combines its rights with the existing entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditMode {
    /// The entry gets exactly the given rights.
    Replace,
    /// The given rights are granted in addition to the existing ones.
    Add,
    /// The given rights are withdrawn from the existing ones.
    Remove,
}

/// An edit of a single ACL entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclCommand {
    /// The entry to edit.
    pub entry_key: EntryKey,
    /// How `rights` combine with the existing rights.
    pub edit_mode: EditMode,
    /// The rights to set, grant or withdraw.
    pub rights: Rights,
}

impl AclCommand {
    /// Sets the rights of `entry_key` to `rights`.
    pub fn replace(entry_key: EntryKey, rights: Rights) -> Self {
        AclCommand {
            entry_key,
            edit_mode: EditMode::Replace,
            rights,
        }
    }

    /// Grants `rights` to `entry_key`.
    pub fn add(entry_key: EntryKey, rights: Rights) -> Self {
        AclCommand {
            entry_key,
            edit_mode: EditMode::Add,
            rights,
        }
    }

    /// Withdraws `rights` from `entry_key`.
    pub fn remove(entry_key: EntryKey, rights: Rights) -> Self {
        AclCommand {
            entry_key,
            edit_mode: EditMode::Remove,
            rights,
        }
    }
}

/// The access control list of a mailbox.
///
/// Entries never hold an empty set of rights: an edit leaving an entry empty
/// removes it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Rights>",
    into = "BTreeMap<String, Rights>"
)]
pub struct MailboxAcl {
    entries: BTreeMap<EntryKey, Rights>,
}

impl MailboxAcl {
    /// An ACL without entries.
    pub fn empty() -> Self {
        MailboxAcl::default()
    }

    /// Builds an ACL from its entries, skipping empty rights.
    pub fn from_entries(entries: impl IntoIterator<Item = (EntryKey, Rights)>) -> Self {
        MailboxAcl {
            entries: entries
                .into_iter()
                .filter(|(_, rights)| !rights.is_empty())
                .collect(),
        }
    }

    /// The entries, ordered by key.
    pub fn entries(&self) -> &BTreeMap<EntryKey, Rights> {
        &self.entries
    }

    /// Rights of `entry_key`, if it has an entry.
    pub fn get(&self, entry_key: &EntryKey) -> Option<Rights> {
        self.entries.get(entry_key).copied()
    }

    /// Whether the ACL has no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ACL resulting from `command`.
    pub fn apply_command(&self, command: &AclCommand) -> MailboxAcl {
        let existing = self.get(&command.entry_key).unwrap_or_default();
        let rights = match command.edit_mode {
            EditMode::Replace => command.rights,
            EditMode::Add => existing.union(command.rights),
            EditMode::Remove => existing.except(command.rights),
        };
        self.with_entry(command.entry_key.clone(), rights)
    }

    /// The ACL with `entry_key` holding exactly `rights`.
    ///
    /// Empty rights remove the entry.
    pub fn with_entry(&self, entry_key: EntryKey, rights: Rights) -> MailboxAcl {
        let mut acl = self.clone();
        if rights.is_empty() {
            acl.entries.remove(&entry_key);
        } else {
            acl.entries.insert(entry_key, rights);
        }
        acl
    }
}

impl fmt::Debug for MailboxAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(key, rights)| (key.to_string(), rights.to_string())),
            )
            .finish()
    }
}

impl fmt::Display for MailboxAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, rights) in &self.entries {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{key}:{rights}")?;
        }
        Ok(())
    }
}

impl TryFrom<BTreeMap<String, Rights>> for MailboxAcl {
    type Error = InvalidEntryKeyError;

    fn try_from(entries: BTreeMap<String, Rights>) -> Result<Self, Self::Error> {
        let entries = entries
            .into_iter()
            .map(|(key, rights)| Ok((EntryKey::deserialize(&key)?, rights)))
            .collect::<Result<Vec<_>, InvalidEntryKeyError>>()?;
        Ok(MailboxAcl::from_entries(entries))
    }
}

impl From<MailboxAcl> for BTreeMap<String, Rights> {
    fn from(acl: MailboxAcl) -> Self {
        acl.entries
            .into_iter()
            .map(|(key, rights)| (key.serialize(), rights))
            .collect()
    }
}

/// A change of an ACL, from `old` to `new`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclDiff {
    /// The list before the change.
    pub old_acl: MailboxAcl,
    /// The list after the change.
    pub new_acl: MailboxAcl,
}

/// One entry of an [`AclDiff`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryChange {
    /// The entry did not exist before.
    Added(EntryKey, Rights),
    /// The entry no longer exists.
    Removed(EntryKey, Rights),
    /// The entry's rights changed.
    Changed {
        /// The edited entry.
        entry_key: EntryKey,
        /// Its rights before.
        old: Rights,
        /// Its rights after.
        new: Rights,
    },
}

impl AclDiff {
    /// The diff turning `old_acl` into `new_acl`.
    pub fn compute(old_acl: MailboxAcl, new_acl: MailboxAcl) -> Self {
        AclDiff { old_acl, new_acl }
    }

    /// Whether the diff changes nothing.
    pub fn is_noop(&self) -> bool {
        self.old_acl == self.new_acl
    }

    /// The entries that differ between both lists.
    pub fn changes(&self) -> Vec<EntryChange> {
        let removed = self
            .old_acl
            .entries
            .iter()
            .filter(|(key, _)| !self.new_acl.entries.contains_key(*key))
            .map(|(key, rights)| EntryChange::Removed(key.clone(), *rights));
        let added_or_changed = self
            .new_acl
            .entries
            .iter()
            .filter_map(|(key, rights)| match self.old_acl.get(key) {
                None => Some(EntryChange::Added(key.clone(), *rights)),
                Some(old) if old != *rights => Some(EntryChange::Changed {
                    entry_key: key.clone(),
                    old,
                    new: *rights,
                }),
                Some(_) => None,
            });
        removed.chain(added_or_changed).collect()
    }

    /// Applies the delta of the diff to `acl`.
    ///
    /// Entries the diff does not touch are kept as they are in `acl`.
    pub fn apply_to(&self, acl: &MailboxAcl) -> MailboxAcl {
        self.changes()
            .into_iter()
            .fold(acl.clone(), |acl, change| match change {
                EntryChange::Removed(key, _) => acl.with_entry(key, Rights::EMPTY),
                EntryChange::Added(key, rights)
                | EntryChange::Changed {
                    entry_key: key,
                    new: rights,
                    ..
                } => acl.with_entry(key, rights),
            })
    }
}

/// Errors of the ACL context.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AclError {
    /// A right letter is not supported.
    #[error(transparent)]
    UnsupportedRight(#[from] UnsupportedRightError),
    /// An entry key is malformed.
    #[error(transparent)]
    InvalidEntryKey(#[from] InvalidEntryKeyError),
}

impl AclCommand {
    /// Parses the `<entry>:<mode><rights>` form, where `mode` is `+` to add,
    /// `-` to remove and nothing to replace.
    pub fn parse(s: &str) -> Result<Self, AclError> {
        let (key, rights) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidEntryKeyError {
                key: s.to_string(),
                reason: "expected <entry>:<rights>",
            })?;
        let entry_key = EntryKey::deserialize(key)?;
        let (edit_mode, rights) = match rights.chars().next() {
            Some('+') => (EditMode::Add, &rights[1..]),
            Some('-') => (EditMode::Remove, &rights[1..]),
            _ => (EditMode::Replace, rights),
        };

        Ok(AclCommand {
            entry_key,
            edit_mode,
            rights: rights.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Right;

    fn rights(s: &str) -> Rights {
        s.parse().unwrap()
    }

    #[test]
    fn replace_add_remove() {
        let bob = EntryKey::user("bob");
        let acl = MailboxAcl::empty().apply_command(&AclCommand::replace(bob.clone(), rights("lr")));
        assert_eq!(acl.get(&bob), Some(rights("lr")));

        let acl = acl.apply_command(&AclCommand::add(bob.clone(), rights("ia")));
        assert_eq!(acl.get(&bob), Some(rights("ailr")));

        let acl = acl.apply_command(&AclCommand::remove(bob.clone(), rights("ai")));
        assert_eq!(acl.get(&bob), Some(rights("lr")));

        let acl = acl.apply_command(&AclCommand::remove(bob.clone(), rights("lr")));
        assert_eq!(acl.get(&bob), None);
        assert!(acl.is_empty());
    }

    #[test]
    fn replace_with_empty_rights_removes_entry() {
        let bob = EntryKey::user("bob");
        let acl = MailboxAcl::from_entries([(bob.clone(), rights("l"))]);
        assert!(acl
            .apply_command(&AclCommand::replace(bob, Rights::EMPTY))
            .is_empty());
    }

    #[test]
    fn diff_lists_changes() {
        let old = MailboxAcl::from_entries([
            (EntryKey::user("alice"), rights("l")),
            (EntryKey::user("bob"), rights("lr")),
        ]);
        let new = MailboxAcl::from_entries([
            (EntryKey::user("bob"), rights("a")),
            (EntryKey::group("devs"), rights("r")),
        ]);

        assert_eq!(
            AclDiff::compute(old, new).changes(),
            vec![
                EntryChange::Removed(EntryKey::user("alice"), rights("l")),
                EntryChange::Changed {
                    entry_key: EntryKey::user("bob"),
                    old: rights("lr"),
                    new: rights("a"),
                },
                EntryChange::Added(EntryKey::group("devs"), rights("r")),
            ]
        );
    }

    #[test]
    fn apply_to_keeps_untouched_entries() {
        let carol = EntryKey::user("carol");
        let diff = AclDiff::compute(
            MailboxAcl::empty(),
            MailboxAcl::from_entries([(EntryKey::user("bob"), rights("l"))]),
        );
        let acl = diff.apply_to(&MailboxAcl::from_entries([(carol.clone(), rights("r"))]));
        assert_eq!(acl.get(&carol), Some(rights("r")));
        assert_eq!(acl.get(&EntryKey::user("bob")), Some(Right::Lookup.into()));
    }

    #[test]
    fn serializes_as_key_to_rights_map() {
        let acl = MailboxAcl::from_entries([
            (EntryKey::user("bob").negative(), rights("w")),
            (EntryKey::group("devs"), rights("rl")),
        ]);
        let json = serde_json::to_value(&acl).unwrap();
        assert_eq!(json, serde_json::json!({"-bob": "w", "$devs": "lr"}));
        assert_eq!(serde_json::from_value::<MailboxAcl>(json).unwrap(), acl);
    }

    #[test]
    fn parses_command_form() {
        assert_eq!(
            AclCommand::parse("bob:+lr"),
            Ok(AclCommand::add(EntryKey::user("bob"), rights("lr")))
        );
        assert_eq!(
            AclCommand::parse("-$devs:-w"),
            Ok(AclCommand::remove(EntryKey::group("devs").negative(), rights("w")))
        );
        assert_eq!(
            AclCommand::parse("owner:aeiklprstwx"),
            Ok(AclCommand::replace(EntryKey::owner(), Rights::all()))
        );
        assert_eq!(
            AclCommand::parse("bob:lz"),
            Err(AclError::UnsupportedRight(UnsupportedRightError('z')))
        );
        assert!(matches!(
            AclCommand::parse("bob"),
            Err(AclError::InvalidEntryKey(_))
        ));
    }
}
