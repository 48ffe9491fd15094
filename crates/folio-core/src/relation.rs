//! Directed relations between resources.
//!
//! A relation is created from the links found in a resource's content. Its
//! target may not exist yet; such a relation is [`RelationTarget::Unresolved`]
//! and becomes resolved as soon as a resource appears at the target path.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::StructureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationType {
    Hyperlink,
    EmbeddedImage,
    EmbeddedObject,
    /// Does not make the source wait for the target when publishing.
    WeakReference,
}

impl RelationType {
    /// Strong relations order link targets before their sources when
    /// publishing.
    pub fn is_strong(self) -> bool {
        self != RelationType::WeakReference
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationType::Hyperlink => "HYPERLINK",
            RelationType::EmbeddedImage => "EMBEDDED_IMAGE",
            RelationType::EmbeddedObject => "EMBEDDED_OBJECT",
            RelationType::WeakReference => "WEAK_REFERENCE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationTarget {
    Resolved { id: StructureId, path: String },
    Unresolved { path: String },
}

impl RelationTarget {
    pub fn path(&self) -> &str {
        match self {
            RelationTarget::Resolved { path, .. } | RelationTarget::Unresolved { path } => path,
        }
    }

    pub fn id(&self) -> Option<StructureId> {
        match self {
            RelationTarget::Resolved { id, .. } => Some(*id),
            RelationTarget::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, RelationTarget::Resolved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: StructureId,
    pub source_path: String,
    pub target: RelationTarget,
    pub relation_type: RelationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationDirection {
    /// Relations whose source is the resource.
    Outgoing,
    /// Relations whose target is the resource.
    Incoming,
}

/// A relation whose target would not exist online after a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenRelation {
    pub source_path: String,
    pub target_path: String,
    pub relation_type: RelationType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_accessors() {
        let id = StructureId::new();
        let resolved = RelationTarget::Resolved {
            id,
            path: "/a/b".into(),
        };
        assert_eq!(resolved.id(), Some(id));
        assert_eq!(resolved.path(), "/a/b");
        let broken = RelationTarget::Unresolved { path: "/c".into() };
        assert!(!broken.is_resolved());
        assert_eq!(broken.id(), None);
    }

    #[test]
    fn test_weak_references_are_not_strong() {
        assert!(RelationType::Hyperlink.is_strong());
        assert!(!RelationType::WeakReference.is_strong());
    }
}
