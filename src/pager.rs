//! Page-number lifecycle and cache/disk orchestration.
//!
//! The pager is the synchronization boundary for the whole layer: it owns
//! the only [`Cache`] value, so every cache operation is serialized through
//! `&mut Pager` by the borrow checker, and it keeps the page-number
//! allocation state behind its own lock so numbers can be handed out from
//! shared references. Disk traffic goes exclusively through the
//! [`DiskScheduler`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::cache::{Cache, FrameId};
use crate::config::PagerConfig;
use crate::disk::{BlockStorage, DiskScheduler};
use crate::error::{StorageError, StorageResult};
use crate::page::{MemPage, PageId};

/// Page-number allocation state: recycled numbers first, then a monotonic
/// counter.
struct PageAllocator {
    free_pages: BinaryHeap<Reverse<u32>>,
    next_page_number: u32,
}

pub struct Pager {
    cache: Cache,
    scheduler: DiskScheduler,
    alloc: Mutex<PageAllocator>,
}

impl Pager {
    /// Takes ownership of `device` and starts the disk worker.
    ///
    /// Panics if the configuration is invalid or if the device's page size
    /// disagrees with the cache's.
    pub fn new(device: Box<dyn BlockStorage>, config: PagerConfig) -> Self {
        assert_eq!(
            device.page_size(),
            config.cache.page_size,
            "device page size {} does not match configured page size {}",
            device.page_size(),
            config.cache.page_size
        );

        Pager {
            cache: Cache::new(config.cache),
            scheduler: DiskScheduler::new(device, config.scheduler),
            alloc: Mutex::new(PageAllocator {
                free_pages: BinaryHeap::new(),
                next_page_number: 0,
            }),
        }
    }

    /// Hands out a page number: the smallest recycled one if any, otherwise
    /// the next fresh number.
    pub fn allocate_page(&self) -> PageId {
        let mut alloc = self.alloc.lock();

        if let Some(Reverse(page_number)) = alloc.free_pages.pop() {
            return PageId(page_number);
        }

        let page_number = alloc.next_page_number;
        alloc.next_page_number += 1;
        PageId(page_number)
    }

    /// Allocates a page number and materializes a zero-initialized page for
    /// it. New pages are always marked dirty since they have no on-disk
    /// image yet.
    pub fn get_new_page(&mut self, pin: bool) -> StorageResult<(PageId, &mut MemPage)> {
        let page_number = self.allocate_page();
        let frame_id = self.fetch(page_number, pin)?;
        self.cache.mark_dirty(page_number);

        Ok((page_number, self.cache[frame_id].page_mut()))
    }

    /// Resolves `page_number` through the cache, reading from disk on a
    /// miss. A page with no on-disk image yet resolves to a zeroed page of
    /// the configured size.
    pub fn get_page(&mut self, page_number: PageId, pin: bool) -> StorageResult<&mut MemPage> {
        let frame_id = self.fetch(page_number, pin)?;
        Ok(self.cache[frame_id].page_mut())
    }

    fn fetch(&mut self, page_number: PageId, pin: bool) -> StorageResult<FrameId> {
        if let Some(frame_id) = self.cache.get(page_number) {
            if pin {
                self.cache.pin(page_number);
            }
            return Ok(frame_id);
        }

        trace!("cache miss for page {page_number}");

        // Eviction of a dirty frame is never silent data loss: persist the
        // victim before its slot is reused.
        if self.cache.must_evict_dirty_page() {
            let victim = self.cache.peek_victim();
            let (victim_number, payload) = {
                let frame = &self.cache[victim];
                (frame.page_number(), frame.page().clone())
            };

            debug!("writing back dirty page {victim_number} before eviction");
            self.scheduler.write(victim_number, payload).wait()?;
            self.cache.mark_clean(victim_number);
        }

        let frame_id = self.cache.map(page_number);

        match self.scheduler.read(page_number).wait() {
            Ok(Some(page)) => {
                *self.cache[frame_id].page_mut() = page;
            }
            Ok(None) => unreachable!("reads always resolve to a payload"),
            Err(StorageError::PageNotOnDisk(_)) => {
                trace!("page {page_number} not on disk yet, zero-initializing");
                *self.cache[frame_id].page_mut() = MemPage::alloc(self.cache.page_size());
            }
            Err(e) => return Err(e),
        }

        if pin {
            self.cache.pin(page_number);
        }

        Ok(frame_id)
    }

    /// Unpins a page previously obtained with `pin = true`.
    pub fn release_page(&mut self, page_number: PageId) {
        self.cache.unpin(page_number);
    }

    /// Drops the page from the cache and recycles its number through the
    /// free list. The next allocation reuses the smallest freed number.
    pub fn free_page(&mut self, page_number: PageId) {
        self.cache.invalidate(page_number);
        self.alloc.lock().free_pages.push(Reverse(page_number.0));
    }

    /// Writes every dirty resident page back to the device and syncs it.
    pub fn flush(&mut self) -> StorageResult<()> {
        let dirty = self.cache.dirty_pages();
        debug!("flushing {} dirty pages", dirty.len());

        let handles: Vec<_> = dirty
            .into_iter()
            .map(|(page_number, payload)| {
                (page_number, self.scheduler.write(page_number, payload))
            })
            .collect();

        for (page_number, handle) in handles {
            handle.wait()?;
            self.cache.mark_clean(page_number);
        }

        self.scheduler.sync().wait()?;
        Ok(())
    }

    /// Stops the disk scheduler, blocking until in-flight batches complete.
    /// Dirty pages still resident are not written back; call [`Pager::flush`]
    /// first for durability.
    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    /// Read access to the underlying cache.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;

    use super::*;
    use crate::config::{CacheConfig, SchedulerConfig};
    use crate::disk::MemDevice;
    use crate::page::PageKind;

    const PAGE_SIZE: usize = 512;

    fn pager(max_size: usize) -> Pager {
        let config = PagerConfig {
            cache: CacheConfig {
                max_size,
                page_size: PAGE_SIZE,
                pin_percentage_limit: 100.0,
                k: 2,
                crp: 0,
            },
            scheduler: SchedulerConfig {
                batch_size: 1,
                batch_timeout: Duration::from_millis(1),
            },
        };

        Pager::new(Box::new(MemDevice::new(PAGE_SIZE)), config)
    }

    #[test]
    fn new_pages_get_sequential_numbers() -> Result<()> {
        let mut pager = pager(4);

        let (first, _) = pager.get_new_page(false)?;
        let (second, _) = pager.get_new_page(false)?;
        assert_eq!(first, PageId(0));
        assert_eq!(second, PageId(1));

        Ok(())
    }

    #[test]
    fn new_pages_are_dirty_and_zero_initialized() -> Result<()> {
        let mut pager = pager(4);

        let (page_number, page) = pager.get_new_page(false)?;
        assert_eq!(page.kind(), PageKind::Tree);

        assert!(pager.cache().contains(page_number));
        let dirty: Vec<PageId> = pager
            .cache()
            .dirty_pages()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(dirty, vec![page_number]);

        Ok(())
    }

    #[test]
    fn get_page_round_trips_through_the_cache() -> Result<()> {
        let mut pager = pager(4);

        let (page_number, page) = pager.get_new_page(false)?;
        if let MemPage::Tree(tree) = page {
            tree.content_mut()[0] = 42;
        }

        let page = pager.get_page(page_number, false)?;
        if let MemPage::Tree(tree) = page {
            assert_eq!(tree.content()[0], 42);
        } else {
            panic!("expected a tree page");
        }

        Ok(())
    }

    #[test]
    fn missing_pages_resolve_to_zeroed_pages() -> Result<()> {
        let mut pager = pager(4);

        // Never allocated or written; the device has no image for it.
        let page = pager.get_page(PageId(9), false)?;
        assert_eq!(page.kind(), PageKind::Tree);
        if let MemPage::Tree(tree) = page {
            assert_eq!(tree.header().num_slots, 0);
            assert!(tree.content().iter().all(|&b| b == 0));
        }

        Ok(())
    }

    #[test]
    fn eviction_writes_dirty_pages_back() -> Result<()> {
        let mut pager = pager(2);

        // Fill the pool with dirty pages carrying distinct markers, then
        // overflow it so every early page must survive eviction on disk.
        for n in 0..4u8 {
            let (page_number, page) = pager.get_new_page(false)?;
            assert_eq!(page_number, PageId(n as u32));
            if let MemPage::Tree(tree) = page {
                tree.content_mut()[0] = n;
            }
        }

        for n in 0..4u8 {
            let page = pager.get_page(PageId(n as u32), false)?;
            if let MemPage::Tree(tree) = page {
                assert_eq!(tree.content()[0], n, "page {n} lost its content");
            } else {
                panic!("expected a tree page");
            }
        }

        Ok(())
    }

    #[test]
    fn released_pages_become_evictable_again() -> Result<()> {
        let mut pager = pager(2);

        let (first, _) = pager.get_new_page(true)?;
        let (second, _) = pager.get_new_page(true)?;

        pager.release_page(first);
        pager.release_page(second);

        // Both frames must be reusable now.
        pager.get_new_page(true)?;
        pager.get_new_page(true)?;

        Ok(())
    }

    #[test]
    fn freed_numbers_are_recycled_smallest_first() -> Result<()> {
        let mut pager = pager(4);

        for _ in 0..3 {
            pager.get_new_page(false)?;
        }

        pager.free_page(PageId(2));
        pager.free_page(PageId(0));

        assert_eq!(pager.allocate_page(), PageId(0));
        assert_eq!(pager.allocate_page(), PageId(2));
        assert_eq!(pager.allocate_page(), PageId(3));

        Ok(())
    }

    #[test]
    fn freed_pages_leave_the_cache() -> Result<()> {
        let mut pager = pager(4);

        let (page_number, _) = pager.get_new_page(false)?;
        assert!(pager.cache().contains(page_number));

        pager.free_page(page_number);
        assert!(!pager.cache().contains(page_number));

        Ok(())
    }

    #[test]
    fn flush_cleans_every_dirty_page() -> Result<()> {
        let mut pager = pager(4);

        for _ in 0..3 {
            pager.get_new_page(false)?;
        }

        pager.flush()?;
        assert!(pager.cache().dirty_pages().is_empty());

        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let mut pager = pager(2);

        pager.get_new_page(false)?;
        pager.stop();
        pager.stop();

        Ok(())
    }
}
