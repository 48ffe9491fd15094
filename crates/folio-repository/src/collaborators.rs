//! Narrow interfaces to the collaborators the repository consumes:
//! permission evaluation and link extraction from resource bytes.

use folio_core::{RelationType, Resource, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Publish,
}

/// Decides whether a user may perform an operation on a resource.
pub trait PermissionHandler: Send + Sync {
    fn has_permission(&self, user: UserId, resource: &Resource, permission: Permission) -> bool;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionHandler for AllowAll {
    fn has_permission(&self, _user: UserId, _resource: &Resource, _permission: Permission) -> bool {
        true
    }
}

impl<F> PermissionHandler for F
where
    F: Fn(UserId, &Resource, Permission) -> bool + Send + Sync,
{
    fn has_permission(&self, user: UserId, resource: &Resource, permission: Permission) -> bool {
        self(user, resource, permission)
    }
}

/// A link found inside a resource's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedLink {
    /// Absolute path, or a path relative to the resource's folder.
    pub target: String,
    pub relation_type: RelationType,
}

impl ExtractedLink {
    pub fn new(target: impl Into<String>, relation_type: RelationType) -> Self {
        ExtractedLink {
            target: target.into(),
            relation_type,
        }
    }
}

/// Parses resource bytes for links. Called on every content write.
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, resource: &Resource, contents: &[u8]) -> Vec<ExtractedLink>;
}

/// Finds no links.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLinks;

impl LinkExtractor for NoLinks {
    fn extract_links(&self, _resource: &Resource, _contents: &[u8]) -> Vec<ExtractedLink> {
        Vec::new()
    }
}

impl<F> LinkExtractor for F
where
    F: Fn(&Resource, &[u8]) -> Vec<ExtractedLink> + Send + Sync,
{
    fn extract_links(&self, resource: &Resource, contents: &[u8]) -> Vec<ExtractedLink> {
        self(resource, contents)
    }
}
