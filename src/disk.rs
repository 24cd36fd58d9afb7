//! Disk layer: block devices and the batching scheduler that owns them.

pub mod device;
pub mod scheduler;

pub use device::{BlockStorage, FileDevice, MemDevice};
pub use scheduler::{DiskResult, DiskScheduler, ResultHandle};
