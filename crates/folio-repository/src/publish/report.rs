//! Per-job publish reports.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use folio_core::{PublishJobId, PublishTag};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceOutcome {
    Published,
    Deleted,
    /// Nothing to do, e.g. the resource was published by an earlier job.
    Skipped(String),
    /// Left unpublished; the reason is the error that stopped it.
    Failed(String),
}

impl ResourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ResourceOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    pub path: String,
    pub outcome: ResourceOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub job: PublishJobId,
    pub tag: Option<PublishTag>,
    pub lines: Vec<ReportLine>,
}

impl PublishReport {
    pub fn new(job: PublishJobId, tag: Option<PublishTag>) -> Self {
        PublishReport {
            job,
            tag,
            lines: Vec::new(),
        }
    }

    pub fn record(&mut self, path: impl Into<String>, outcome: ResourceOutcome) {
        self.lines.push(ReportLine {
            path: path.into(),
            outcome,
        });
    }

    pub fn published(&self) -> usize {
        self.count(|o| matches!(o, ResourceOutcome::Published))
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, ResourceOutcome::Deleted))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ResourceOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(ResourceOutcome::is_failure)
    }

    pub fn has_errors(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, predicate: impl Fn(&ResourceOutcome) -> bool) -> usize {
        self.lines.iter().filter(|l| predicate(&l.outcome)).count()
    }

    /// Plain-text rendering, one line per resource plus a summary.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        match self.tag {
            Some(tag) => {
                let _ = writeln!(out, "Publish job {} (tag {})", self.job, tag.0);
            }
            None => {
                let _ = writeln!(out, "Publish job {}", self.job);
            }
        }
        for line in &self.lines {
            let _ = match &line.outcome {
                ResourceOutcome::Published => writeln!(out, "  published  {}", line.path),
                ResourceOutcome::Deleted => writeln!(out, "  deleted    {}", line.path),
                ResourceOutcome::Skipped(reason) => {
                    writeln!(out, "  skipped    {} ({})", line.path, reason)
                }
                ResourceOutcome::Failed(reason) => {
                    writeln!(out, "  FAILED     {}: {}", line.path, reason)
                }
            };
        }
        let _ = write!(
            out,
            "{} published, {} deleted, {} skipped, {} failed",
            self.published(),
            self.deleted(),
            self.skipped(),
            self.failed()
        );
        out
    }
}
