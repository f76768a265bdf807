use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const NEGATIVE_MARKER: char = '-';
const GROUP_MARKER: char = '$';

/// Special identifier granting rights to the mailbox owner.
pub const OWNER: &str = "owner";
/// Special identifier granting rights to everyone.
pub const ANYBODY: &str = "anybody";
/// Special identifier granting rights to every authenticated user.
pub const AUTHENTICATED: &str = "authenticated";

const SPECIAL_NAMES: [&str; 3] = [OWNER, ANYBODY, AUTHENTICATED];

/// What an [`EntryKey`] name refers to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum NameType {
    /// A single user.
    User,
    /// A group, serialized with a leading `$`.
    Group,
    /// One of [`OWNER`], [`ANYBODY`] or [`AUTHENTICATED`].
    Special,
}

/// The identifier an ACL entry applies to.
///
/// Serialized as `[-][$]name`: `-` marks a negative entry, whose rights are
/// denied rather than granted, and `$` marks a group.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryKey {
    name: String,
    name_type: NameType,
    negative: bool,
}

impl EntryKey {
    /// A positive entry for a user.
    pub fn user(name: impl Into<String>) -> Self {
        EntryKey::new(name, NameType::User, false)
    }

    /// A positive entry for a group.
    pub fn group(name: impl Into<String>) -> Self {
        EntryKey::new(name, NameType::Group, false)
    }

    /// The positive `owner` entry.
    pub fn owner() -> Self {
        EntryKey::new(OWNER, NameType::Special, false)
    }

    /// The positive `anybody` entry.
    pub fn anybody() -> Self {
        EntryKey::new(ANYBODY, NameType::Special, false)
    }

    /// The positive `authenticated` entry.
    pub fn authenticated() -> Self {
        EntryKey::new(AUTHENTICATED, NameType::Special, false)
    }

    fn new(name: impl Into<String>, name_type: NameType, negative: bool) -> Self {
        EntryKey {
            name: name.into(),
            name_type,
            negative,
        }
    }

    /// The same identifier with its rights denied.
    pub fn negative(mut self) -> Self {
        self.negative = true;
        self
    }

    /// Name of the user, group or special identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the name refers to.
    pub fn name_type(&self) -> NameType {
        self.name_type
    }

    /// Whether the entry denies its rights.
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// The `[-][$]name` form.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Parses the `[-][$]name` form.
    pub fn deserialize(s: &str) -> Result<Self, InvalidEntryKeyError> {
        let (negative, rest) = match s.strip_prefix(NEGATIVE_MARKER) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (name_type, name) = match rest.strip_prefix(GROUP_MARKER) {
            Some(name) => (NameType::Group, name),
            None if SPECIAL_NAMES.contains(&rest) => (NameType::Special, rest),
            None => (NameType::User, rest),
        };
        if name.is_empty() {
            return Err(InvalidEntryKeyError::new(s, "name is empty"));
        }
        if name.starts_with(NEGATIVE_MARKER) || name.starts_with(GROUP_MARKER) {
            return Err(InvalidEntryKeyError::new(s, "name starts with a marker"));
        }

        Ok(EntryKey::new(name, name_type, negative))
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "{NEGATIVE_MARKER}")?;
        }
        if self.name_type == NameType::Group {
            write!(f, "{GROUP_MARKER}")?;
        }
        write!(f, "{}", self.name)
    }
}

impl FromStr for EntryKey {
    type Err = InvalidEntryKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryKey::deserialize(s)
    }
}

/// A string that is not a valid [`EntryKey`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid acl entry key '{key}': {reason}")]
pub struct InvalidEntryKeyError {
    /// The rejected string.
    pub key: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl InvalidEntryKeyError {
    fn new(key: &str, reason: &'static str) -> Self {
        InvalidEntryKeyError {
            key: key.to_string(),
            reason,
        }
    }
}
