//! Stable ID newtypes for repository entities.
//!
//! A resource has two identities: a [`StructureId`] naming one slot in the
//! tree and a [`ContentId`] shared by every sibling that points at the same
//! content record. Both are distinct newtype wrappers over `Uuid` so one can
//! never be used where the other is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one path position in the resource tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StructureId(pub Uuid);

/// Identity of a content record, shared by all siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId(pub Uuid);

/// A user acting on the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

/// A project: the scope of in-progress edits.
///
/// The nil UUID is reserved for the read-only Online project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

/// Identity of one publish job (and of the publish list it executes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublishJobId(pub Uuid);

/// Monotonic counter stamped on every history entry written by one publish
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublishTag(pub u64);

impl StructureId {
    pub fn new() -> Self {
        StructureId(Uuid::new_v4())
    }
}

impl Default for StructureId {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentId {
    pub fn new() -> Self {
        ContentId(Uuid::new_v4())
    }
}

impl Default for ContentId {
    fn default() -> Self {
        Self::new()
    }
}

impl UserId {
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectId {
    /// The distinguished Online project, target of every publish.
    pub const ONLINE: ProjectId = ProjectId(Uuid::nil());

    pub fn new() -> Self {
        ProjectId(Uuid::new_v4())
    }

    pub fn is_online(&self) -> bool {
        *self == Self::ONLINE
    }
}

impl PublishJobId {
    pub fn new() -> Self {
        PublishJobId(Uuid::new_v4())
    }
}

impl Default for PublishJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishTag {
    /// Tag value before the first publish ever ran.
    pub const ZERO: PublishTag = PublishTag(0);

    pub fn next(self) -> PublishTag {
        PublishTag(self.0 + 1)
    }
}

// Display implementations -- just print the inner value.

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_online() {
            write!(f, "Online")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for PublishJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PublishTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_project_is_nil() {
        assert!(ProjectId::ONLINE.is_online());
        assert!(!ProjectId::new().is_online());
        assert_eq!(format!("{}", ProjectId::ONLINE), "Online");
    }

    #[test]
    fn test_publish_tag_ordering() {
        let first = PublishTag::ZERO.next();
        let second = first.next();
        assert!(second > first);
        assert_eq!(second, PublishTag(2));
    }

    #[test]
    fn test_structure_and_content_ids_are_fresh() {
        assert_ne!(StructureId::new(), StructureId::new());
        assert_ne!(ContentId::new(), ContentId::new());
    }

    #[test]
    fn serde_roundtrip() {
        let id = StructureId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: StructureId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
