//! Concurrency control: the resource lock table.

pub mod lock_manager;

pub use lock_manager::{Lock, LockError, LockKind, LockManager, LockRecord, LockTarget, LockType};
