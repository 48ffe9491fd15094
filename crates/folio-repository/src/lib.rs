//! The folio resource repository engine.
//!
//! A [`Repository`] manages a tree of versioned resources kept in two
//! views: the offline working copy that projects edit, and the online tree
//! that publishing moves changes into. It owns the lock table, the history
//! ledger and a single publish worker draining a FIFO job queue.
//!
//! # Modules
//!
//! - [`repository`]: the Repository state object and every operation
//! - [`concurrency`]: the lock manager and its derived lock types
//! - [`ledger`]: version counters, version listing and history pruning
//! - [`publish`]: publish lists, the job queue and the publish engine
//! - [`collaborators`]: permission and link-extraction interfaces
//! - [`config`]: RepositoryConfig and its environment overlay
//! - [`error`]: RepositoryError and the ErrorKind taxonomy

pub mod collaborators;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod publish;
pub(crate) mod relations;
pub mod repository;

pub use collaborators::{ExtractedLink, LinkExtractor, Permission, PermissionHandler};
pub use concurrency::{Lock, LockRecord, LockType};
pub use config::{HistoryConfig, PublishConfig, RepositoryConfig, StorageBackend};
pub use context::RequestContext;
pub use error::{ErrorKind, RepositoryError};
pub use ledger::{PruneLimits, PruneStats};
pub use publish::{
    PublishJob, PublishList, PublishListEntry, PublishOptions, PublishReport, ResourceOutcome,
};
pub use repository::history::HistoricalFile;
pub use repository::resources::{CopyMode, SiblingMode};
pub use repository::{Repository, RepositoryBuilder, ResourceFilter};
