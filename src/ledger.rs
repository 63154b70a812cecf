//! The ledger data model as seen by a client.
//!
//! The ledger is append-only: records and links are only ever created, and
//! deleting one is itself a new immutable action referencing the action it
//! deletes. Everything here is a plain value; views recompute pointers like
//! "the latest revision" instead of mutating anything.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::id::{ActionId, AgentId, Id};

/// Microseconds since the unix epoch.
///
/// Actions are stamped with the author's clock; views only ever compare
/// timestamps, they never read the local clock.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from microseconds since the unix epoch.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Microseconds since the unix epoch.
    pub const fn as_micros(&self) -> u64 {
        self.0
    }
}

/// Declared name of a link type.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct LinkType(String);

impl LinkType {
    /// Creates a link type from its declared name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The declared name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LinkType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// The set of declared names a concrete link type satisfies.
///
/// A signal names every declared type its link satisfies; a view declares a
/// single [`LinkType`] and matches with [`LinkTypeSet::contains`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTypeSet(Vec<LinkType>);

impl LinkTypeSet {
    /// Whether `link_type` is among the satisfied declared names.
    pub fn contains(&self, link_type: &LinkType) -> bool {
        self.0.contains(link_type)
    }

    /// Iterates over the declared names.
    pub fn iter(&self) -> impl Iterator<Item = &LinkType> {
        self.0.iter()
    }
}

impl From<LinkType> for LinkTypeSet {
    fn from(link_type: LinkType) -> Self {
        Self(vec![link_type])
    }
}

impl From<&str> for LinkTypeSet {
    fn from(name: &str) -> Self {
        LinkType::from(name).into()
    }
}

impl FromIterator<LinkType> for LinkTypeSet {
    fn from_iter<I: IntoIterator<Item = LinkType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A typed, directed relationship from a base identifier to a target
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Hash of the action that created this link; identifies the link.
    pub create_action: ActionId,
    /// Where the link hangs off.
    pub base: Id,
    /// What the link points at.
    pub target: Id,
    /// Optional opaque tag payload.
    pub tag: Option<Bytes>,
    /// When the link was created.
    pub timestamp: Timestamp,
    /// Who created the link.
    pub author: AgentId,
}

/// A delete action against a [`Link`].
///
/// Several agents may delete the same link; every delete is a distinct
/// action and all of them are retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDelete {
    /// Hash of this delete action.
    pub action: ActionId,
    /// The create-link action this delete refers to.
    pub deletes: ActionId,
    /// When the delete was committed.
    pub timestamp: Timestamp,
    /// Who deleted the link.
    pub author: AgentId,
}

/// A delete action against a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDelete {
    /// Hash of this delete action.
    pub action: ActionId,
    /// The original create action this delete refers to.
    pub deletes: ActionId,
    /// When the delete was committed.
    pub timestamp: Timestamp,
    /// Who deleted the record.
    pub author: AgentId,
}

/// An immutable record on the ledger.
///
/// A chain of records linked by [`Record::original`] references forms a
/// revision history; "the latest revision" is a pointer views recompute,
/// never a mutation of any record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Hash of the action that wrote this record.
    pub action: ActionId,
    /// For updates, the action of the revision this one supersedes.
    pub original: Option<ActionId>,
    /// Who wrote the record.
    pub author: AgentId,
    /// When the record was committed.
    pub timestamp: Timestamp,
    /// Opaque encoded content.
    pub content: Bytes,
}

/// A link paired with every delete action observed against it.
pub type DeletedLink = (Link, Vec<LinkDelete>);
