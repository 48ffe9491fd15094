//! Storage-layer types.

use std::fmt;

use serde::{Deserialize, Serialize};

use folio_core::{PublishJobId, PublishJobState};

/// Which copy of the tree a call addresses.
///
/// The offline view is the shared working copy every project edits; the
/// online view holds what was last published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum View {
    Offline,
    Online,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::Offline => "offline",
            View::Online => "online",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted publish job.
///
/// The payload is opaque to storage; the publish engine serializes its
/// list and report into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishJobRecord {
    pub id: PublishJobId,
    /// Submission order, used to re-enqueue jobs after a restart.
    pub sequence: u64,
    pub state: PublishJobState,
    pub payload: serde_json::Value,
}

/// Name of the counter holding the last reserved publish tag.
pub const PUBLISH_TAG_COUNTER: &str = "publish_tag";
/// Name of the counter holding the last publish job sequence number.
pub const PUBLISH_SEQUENCE_COUNTER: &str = "publish_sequence";
