//! Core record types for patient merge detection.
//!
//! A [`Record`] is the minimal projection of a patient resource that the
//! merge export needs: its identifier and its typed links to other records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relationship kind carried by a patient link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    /// This record was superseded by the linked one.
    ReplacedBy,
    /// This record supersedes the linked one.
    Replaces,
    Refer,
    #[serde(rename = "seealso")]
    SeeAlso,
    /// Any code outside the known value set.
    #[serde(other)]
    Unknown,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::ReplacedBy => "replaced-by",
            LinkType::Replaces => "replaces",
            LinkType::Refer => "refer",
            LinkType::SeeAlso => "seealso",
            LinkType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed link from one record to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub link_type: LinkType,
    /// Free-form reference such as `Patient/123`; may be empty.
    pub target_reference: String,
}

impl Link {
    pub fn new(link_type: LinkType, target_reference: impl Into<String>) -> Self {
        Self {
            link_type,
            target_reference: target_reference.into(),
        }
    }

    pub fn replaced_by(target_reference: impl Into<String>) -> Self {
        Self::new(LinkType::ReplacedBy, target_reference)
    }
}

/// A patient-like record with an opaque identifier and ordered links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub links: Vec<Link>,
}

impl Record {
    pub fn new(id: impl Into<String>, links: Vec<Link>) -> Self {
        Self {
            id: id.into(),
            links,
        }
    }

    /// Links of type `replaced-by`, in their original order.
    pub fn replaced_by_links(&self) -> impl Iterator<Item = &Link> {
        self.links
            .iter()
            .filter(|link| link.link_type == LinkType::ReplacedBy)
    }
}

/// Directed merge relationship: `source_id` was replaced by `target_id`.
///
/// Ordering is lexicographic on (source, target), which is what the sorted
/// export relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MergePair {
    pub source_id: String,
    pub target_id: String,
}

impl MergePair {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }

    pub fn is_self_link(&self) -> bool {
        self.source_id == self.target_id
    }
}

impl fmt::Display for MergePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_id, self.target_id)
    }
}
