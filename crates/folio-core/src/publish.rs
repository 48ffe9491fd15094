//! Publish job states, shared by the queue and the persisted job records.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishOutcome {
    /// Every resource of the job was published.
    Success,
    /// At least one resource failed and was left unpublished.
    PartialFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishJobState {
    Queued,
    Running,
    Finished(PublishOutcome),
}

impl PublishJobState {
    pub fn is_finished(self) -> bool {
        matches!(self, PublishJobState::Finished(_))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PublishJobState::Queued => "QUEUED",
            PublishJobState::Running => "RUNNING",
            PublishJobState::Finished(PublishOutcome::Success) => "FINISHED",
            PublishJobState::Finished(PublishOutcome::PartialFailure) => "FINISHED_WITH_ERRORS",
        }
    }

    pub fn parse(value: &str) -> Option<PublishJobState> {
        match value {
            "QUEUED" => Some(PublishJobState::Queued),
            "RUNNING" => Some(PublishJobState::Running),
            "FINISHED" => Some(PublishJobState::Finished(PublishOutcome::Success)),
            "FINISHED_WITH_ERRORS" => {
                Some(PublishJobState::Finished(PublishOutcome::PartialFailure))
            }
            _ => None,
        }
    }
}

impl fmt::Display for PublishJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_roundtrip() {
        for state in [
            PublishJobState::Queued,
            PublishJobState::Running,
            PublishJobState::Finished(PublishOutcome::Success),
            PublishJobState::Finished(PublishOutcome::PartialFailure),
        ] {
            assert_eq!(PublishJobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PublishJobState::parse("bogus"), None);
    }
}
