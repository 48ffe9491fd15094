//! Projects: named scopes of in-progress edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ProjectId, UserId};

pub const ONLINE_PROJECT_NAME: &str = "Online";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub owner: UserId,
    pub date_created: DateTime<Utc>,
}

impl Project {
    /// The read-only project through which the published tree is read.
    pub fn online(owner: UserId, date_created: DateTime<Utc>) -> Self {
        Project {
            id: ProjectId::ONLINE,
            name: ONLINE_PROJECT_NAME.to_string(),
            description: "The published view".to_string(),
            owner,
            date_created,
        }
    }

    pub fn is_online(&self) -> bool {
        self.id.is_online()
    }
}
