//! Storage abstraction for the folio resource repository.
//!
//! Provides the [`ResourceStore`] trait that every backend implements, plus
//! [`InMemoryStore`] and [`SqliteStore`] as first-class backends.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: View, PublishJobRecord and counter names
//! - [`traits`]: ResourceStore trait definition
//! - [`hash`]: blake3 addressing of history blobs
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup for SQLite
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use hash::content_hash;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{PropertyMap, ResourceStore};
pub use types::{PublishJobRecord, View, PUBLISH_SEQUENCE_COUNTER, PUBLISH_TAG_COUNTER};
