//! Per-request context: who is acting, in which project.

use folio_core::{ProjectId, UserId};
use folio_storage::View;

/// Passed to every repository operation.
///
/// Operations in the Online project read the published view and may not
/// write; every other project reads and writes the offline view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestContext {
    pub user: UserId,
    pub project: ProjectId,
}

impl RequestContext {
    pub fn new(user: UserId, project: ProjectId) -> Self {
        RequestContext { user, project }
    }

    /// A context reading the published tree.
    pub fn online(user: UserId) -> Self {
        RequestContext {
            user,
            project: ProjectId::ONLINE,
        }
    }

    pub fn is_online(&self) -> bool {
        self.project.is_online()
    }

    pub fn view(&self) -> View {
        if self.is_online() {
            View::Online
        } else {
            View::Offline
        }
    }
}
