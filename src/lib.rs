//! Buffer-management core of a page-based storage engine.
//!
//! This crate decides which logical pages live in memory, which must be read
//! from or flushed to a block device, and how page memory is physically laid
//! out. Key components:
//!
//! - **Buffer**: fixed-size page memory partitioned into a typed header and
//!   a content area, reinterpretable in place when a page changes kind
//! - **Cache**: in-memory pool of frames with LRU-K eviction and a
//!   correlated reference period, pinning and dirty tracking
//! - **DiskScheduler**: dedicated worker thread that batches and reorders
//!   device I/O, answering each request through its own result channel
//! - **Pager**: allocates and recycles page numbers and orchestrates the
//!   cache and the scheduler, writing dirty frames back before eviction
//!
//! Higher layers (B-trees, logging, recovery) build on the page residency
//! guarantees provided here.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod disk;
pub mod error;
pub mod page;
pub mod pager;

pub use buffer::Buffer;
pub use cache::{Cache, FrameId};
pub use config::{CacheConfig, PagerConfig, SchedulerConfig};
pub use disk::{BlockStorage, DiskScheduler, FileDevice, MemDevice};
pub use error::{StorageError, StorageResult};
pub use page::{MemPage, PageId, PageKind};
pub use pager::Pager;
