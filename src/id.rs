//! Content-addressed identifiers and their canonical string form.
//!
//! Everything on the ledger is addressed by a 32 byte digest plus the
//! [`IdKind`] it is addressed as. The canonical string form is a one
//! character kind prefix followed by the unpadded lowercase base32 of the
//! digest; the mapping is injective, so identifiers can be used as map and
//! set keys in either form interchangeably.

use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Length in bytes of an identifier digest.
pub const ID_LEN: usize = 32;

/// What kind of entity an [`Id`] addresses.
///
/// The ledger bakes the kind into the identifier itself, so the same digest
/// addressed as two different kinds is two different identifiers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
pub enum IdKind {
    /// An immutable entry, addressed by the hash of its content.
    #[display("entry")]
    Entry,
    /// A single committed action (write).
    #[display("action")]
    Action,
    /// A peer, addressed by its public key.
    #[display("agent")]
    Agent,
}

impl IdKind {
    /// One character prefix used in the canonical string form.
    const fn prefix(self) -> char {
        match self {
            IdKind::Entry => 'e',
            IdKind::Action => 'a',
            IdKind::Agent => 'p',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'e' => Some(IdKind::Entry),
            'a' => Some(IdKind::Action),
            'p' => Some(IdKind::Agent),
            _ => None,
        }
    }
}

/// A content-addressed identifier on the ledger.
///
/// Identifiers are produced remotely; this crate never computes a digest,
/// it only compares, re-addresses and encodes them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id {
    kind: IdKind,
    digest: [u8; ID_LEN],
}

/// An [`Id`] addressing an action.
pub type ActionId = Id;
/// An [`Id`] addressing an entry.
pub type EntryId = Id;
/// An [`Id`] addressing an agent.
pub type AgentId = Id;

impl Id {
    /// Creates an identifier from a kind and a raw digest.
    pub const fn new(kind: IdKind, digest: [u8; ID_LEN]) -> Self {
        Self { kind, digest }
    }

    /// The kind this identifier addresses.
    pub const fn kind(&self) -> IdKind {
        self.kind
    }

    /// The raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.digest
    }

    /// Re-addresses the same digest as a different kind.
    pub const fn retype(self, kind: IdKind) -> Self {
        Self {
            kind,
            digest: self.digest,
        }
    }

    /// Short display form: the kind prefix plus the base32 of the first
    /// 10 digest bytes.
    pub fn fmt_short(&self) -> String {
        let mut out = String::with_capacity(17);
        out.push(self.kind.prefix());
        append_base32(&self.digest[..10], &mut out);
        out
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // one prefix char + 52 base32 chars
        let mut out = String::with_capacity(53);
        out.push(self.kind.prefix());
        append_base32(&self.digest, &mut out);
        f.write_str(&out)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

/// Error parsing the canonical string form of an [`Id`].
#[derive(Debug, thiserror::Error)]
pub enum ParseIdError {
    /// The string was empty.
    #[error("empty identifier")]
    Empty,
    /// The kind prefix was not recognized.
    #[error("unknown identifier kind prefix {0:?}")]
    UnknownKind(char),
    /// The digest part was not valid base32.
    #[error("invalid base32: {0}")]
    Base32(#[from] data_encoding::DecodeError),
    /// The digest had the wrong length.
    #[error("expected a 32 byte digest")]
    InvalidLength,
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefix = s.chars().next().ok_or(ParseIdError::Empty)?;
        let kind = IdKind::from_prefix(prefix).ok_or(ParseIdError::UnknownKind(prefix))?;
        let rest = &s[prefix.len_utf8()..];
        let bytes = data_encoding::BASE32_NOPAD.decode(rest.to_ascii_uppercase().as_bytes())?;
        let digest: [u8; ID_LEN] = bytes.try_into().map_err(|_| ParseIdError::InvalidLength)?;
        Ok(Id::new(kind, digest))
    }
}

fn append_base32(bytes: &[u8], out: &mut String) {
    let start = out.len();
    data_encoding::BASE32_NOPAD.encode_append(bytes, out);
    let end = out.len();
    // Safety of the lowercase transform: base32 output is pure ASCII.
    out[start..end].make_ascii_lowercase();
}

/// Deduplicates identifiers, keeping the first occurrence of each.
pub fn uniquify(ids: impl IntoIterator<Item = Id>) -> Vec<Id> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
