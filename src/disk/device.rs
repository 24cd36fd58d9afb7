//! Block device abstractions.
//!
//! A device stores one page-sized, page-aligned region per page number at
//! byte offset `page_number × page_size`. The scheduler is the only
//! component that talks to a device; everything else goes through it.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::page::PageId;

/// Narrow capability contract for persistent page storage.
///
/// Reads take `&self` so the scheduler can serve them under a shared lock;
/// writes and syncs require exclusive access.
pub trait BlockStorage: Send {
    /// Size in bytes of every page on this device.
    fn page_size(&self) -> usize;

    /// Reads the page's image into `buf` (which must be page-sized).
    ///
    /// Reading a page that has never been written reports
    /// [`StorageError::PageNotOnDisk`], recognizably distinct from an I/O
    /// failure.
    fn read(&self, page_number: PageId, buf: &mut [u8]) -> StorageResult<()>;

    /// Writes a page-sized image, extending the device if needed.
    fn write(&mut self, page_number: PageId, data: &[u8]) -> StorageResult<()>;

    /// Durably flushes previous writes.
    fn sync(&mut self) -> StorageResult<()>;
}

fn page_offset(page_number: PageId, page_size: usize) -> u64 {
    page_number.0 as u64 * page_size as u64
}

/// File-backed block device.
pub struct FileDevice {
    file: File,
    page_size: usize,
}

impl FileDevice {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(FileDevice { file, page_size })
    }

    /// Opens an existing file at `path`.
    pub fn open(path: &Path, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(FileDevice { file, page_size })
    }
}

impl BlockStorage for FileDevice {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read(&self, page_number: PageId, buf: &mut [u8]) -> StorageResult<()> {
        assert_eq!(buf.len(), self.page_size, "read buffer must be page-sized");

        let offset = page_offset(page_number, self.page_size);
        if offset >= self.file.metadata()?.len() {
            return Err(StorageError::PageNotOnDisk(page_number));
        }

        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write(&mut self, page_number: PageId, data: &[u8]) -> StorageResult<()> {
        assert_eq!(data.len(), self.page_size, "write data must be page-sized");

        let offset = page_offset(page_number, self.page_size);
        let end = offset + self.page_size as u64;
        if end > self.file.metadata()?.len() {
            self.file.set_len(end)?;
        }

        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory block device for tests and ephemeral databases.
pub struct MemDevice {
    // Interior lock so reads can go through `&self` like the file device's
    // positional reads.
    data: RwLock<Vec<u8>>,
    page_size: usize,
}

impl MemDevice {
    pub fn new(page_size: usize) -> Self {
        MemDevice {
            data: RwLock::new(Vec::new()),
            page_size,
        }
    }
}

impl BlockStorage for MemDevice {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read(&self, page_number: PageId, buf: &mut [u8]) -> StorageResult<()> {
        assert_eq!(buf.len(), self.page_size, "read buffer must be page-sized");

        let data = self.data.read();
        let offset = page_offset(page_number, self.page_size) as usize;
        if offset >= data.len() {
            return Err(StorageError::PageNotOnDisk(page_number));
        }

        buf.copy_from_slice(&data[offset..offset + self.page_size]);
        Ok(())
    }

    fn write(&mut self, page_number: PageId, data: &[u8]) -> StorageResult<()> {
        assert_eq!(data.len(), self.page_size, "write data must be page-sized");

        let storage = self.data.get_mut();
        let offset = page_offset(page_number, self.page_size) as usize;
        let end = offset + self.page_size;
        if end > storage.len() {
            storage.resize(end, 0);
        }

        storage[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
