//! Publishing: list building, the FIFO job queue, the engine that moves
//! resources online, and per-job reports.

pub(crate) mod engine;
pub mod list;
pub mod queue;
pub mod report;

pub use list::{PublishList, PublishListEntry, PublishOptions};
pub use queue::{PublishExecutor, PublishJob, PublishQueue};
pub use report::{PublishReport, ReportLine, ResourceOutcome};
