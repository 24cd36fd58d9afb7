//! Storage layer error types.

use thiserror::Error;

use crate::page::PageId;

/// Errors that can occur in the storage layer.
///
/// Configuration and invariant violations are not represented here; those
/// panic at construction time since they indicate programmer error rather
/// than runtime conditions.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The page has no image on the device yet. Callers treat this as "new
    /// page" and zero-initialize instead of failing.
    #[error("page {0} does not exist on disk")]
    PageNotOnDisk(PageId),

    #[error("failed to serialize page {page}: {reason}")]
    Serialization { page: PageId, reason: String },

    /// A page image read from the device could not be interpreted.
    #[error("corrupted page image: {reason}")]
    Corrupted { reason: String },

    /// The disk scheduler worker is no longer accepting requests.
    #[error("disk scheduler is not running")]
    SchedulerStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
