use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A right as defined by RFC 4314.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Right {
    /// `a`: administer, change the ACL.
    Administer,
    /// `e`: perform expunge.
    PerformExpunge,
    /// `i`: insert messages.
    Insert,
    /// `k`: create child mailboxes.
    CreateMailbox,
    /// `l`: see the mailbox in listings.
    Lookup,
    /// `p`: post messages to the submission address.
    Post,
    /// `r`: read messages.
    Read,
    /// `s`: keep the seen flag across sessions.
    WriteSeenFlag,
    /// `t`: set or clear the deleted flag.
    DeleteMessages,
    /// `w`: write flags other than seen and deleted.
    Write,
    /// `x`: delete the mailbox.
    DeleteMailbox,
}

impl Right {
    /// Every right, in serialization order.
    pub const ALL: [Right; 11] = [
        Right::Administer,
        Right::PerformExpunge,
        Right::Insert,
        Right::CreateMailbox,
        Right::Lookup,
        Right::Post,
        Right::Read,
        Right::WriteSeenFlag,
        Right::DeleteMessages,
        Right::Write,
        Right::DeleteMailbox,
    ];

    /// The RFC 4314 letter of the right.
    pub fn as_char(self) -> char {
        match self {
            Right::Administer => 'a',
            Right::PerformExpunge => 'e',
            Right::Insert => 'i',
            Right::CreateMailbox => 'k',
            Right::Lookup => 'l',
            Right::Post => 'p',
            Right::Read => 'r',
            Right::WriteSeenFlag => 's',
            Right::DeleteMessages => 't',
            Right::Write => 'w',
            Right::DeleteMailbox => 'x',
        }
    }

    /// Parses an RFC 4314 letter.
    pub fn for_char(c: char) -> Result<Self, UnsupportedRightError> {
        Right::ALL
            .into_iter()
            .find(|right| right.as_char() == c)
            .ok_or(UnsupportedRightError(c))
    }

    fn mask(self) -> u16 {
        1 << self as u16
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A letter that is not an RFC 4314 right.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("unsupported right '{0}'")]
pub struct UnsupportedRightError(pub char);

/// A set of [`Right`]s, serialized as its letters (`"lr"`).
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rights(u16);

impl Rights {
    /// No right at all.
    pub const EMPTY: Rights = Rights(0);

    /// All rights.
    pub fn all() -> Self {
        Right::ALL.into_iter().collect()
    }

    /// Whether no right is granted.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether `right` is granted.
    pub fn contains(&self, right: Right) -> bool {
        self.0 & right.mask() != 0
    }

    /// Rights granted by either set.
    pub fn union(self, other: Rights) -> Rights {
        Rights(self.0 | other.0)
    }

    /// Rights of `self` not in `other`.
    pub fn except(self, other: Rights) -> Rights {
        Rights(self.0 & !other.0)
    }

    /// The granted rights in serialization order.
    pub fn iter(&self) -> impl Iterator<Item = Right> + '_ {
        Right::ALL.into_iter().filter(|right| self.contains(*right))
    }
}

impl FromIterator<Right> for Rights {
    fn from_iter<T: IntoIterator<Item = Right>>(iter: T) -> Self {
        Rights(iter.into_iter().fold(0, |mask, right| mask | right.mask()))
    }
}

impl From<Right> for Rights {
    fn from(right: Right) -> Self {
        Rights(right.mask())
    }
}

impl FromStr for Rights {
    type Err = UnsupportedRightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars().map(Right::for_char).collect()
    }
}

impl TryFrom<String> for Rights {
    type Error = UnsupportedRightError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Rights> for String {
    fn from(rights: Rights) -> Self {
        rights.to_string()
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.iter().try_for_each(|right| write!(f, "{right}"))
    }
}

impl fmt::Debug for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rights(\"{self}\")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_round_trip() {
        for right in Right::ALL {
            assert_eq!(Right::for_char(right.as_char()), Ok(right));
        }
    }

    #[test]
    fn unknown_letter_is_unsupported() {
        assert_eq!(Right::for_char('z'), Err(UnsupportedRightError('z')));
        assert_eq!("lrz".parse::<Rights>(), Err(UnsupportedRightError('z')));
    }

    #[test]
    fn rights_serialize_in_canonical_order() {
        let rights: Rights = "rla".parse().unwrap();
        assert_eq!(rights.to_string(), "alr");
        assert_eq!(serde_json::to_string(&rights).unwrap(), "\"alr\"");
        assert_eq!(Rights::all().to_string(), "aeiklprstwx");
    }

    #[test]
    fn set_operations() {
        let lr: Rights = "lr".parse().unwrap();
        let ra: Rights = "ra".parse().unwrap();
        assert_eq!(lr.union(ra).to_string(), "alr");
        assert_eq!(lr.except(ra).to_string(), "l");
        assert!(lr.except(lr).is_empty());
        assert!(lr.contains(Right::Lookup));
        assert!(!lr.contains(Right::Administer));
    }
}
