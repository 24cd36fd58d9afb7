//! Buffer pool with LRU-K eviction and a correlated reference period.
//!
//! The cache owns an array of [`Frame`]s and a page table mapping page
//! numbers to frame slots. Frames are allocated until the pool reaches its
//! configured capacity; after that every new mapping evicts a victim chosen
//! by LRU-K: the unpinned, non-overflow frame with the oldest K-th most
//! recent distinct reference. Accesses that land within the correlated
//! reference period of the previous one are treated as part of the same
//! logical reference, so a tight burst of touches does not make a page look
//! hot for the wrong reason.
//!
//! The cache performs no disk I/O and is not internally synchronized. The
//! [`crate::Pager`] owns the only mutable handle and serializes every
//! operation; see the pager docs for the locking story.

pub mod frame;

use std::collections::HashMap;
use std::mem;
use std::ops::{Index, IndexMut};

use log::debug;

use crate::config::CacheConfig;
use crate::page::{MemPage, PageId};
use frame::{Frame, DIRTY_FLAG, PINNED_FLAG};

/// Frames are identified by their index in the pool's frame array.
pub type FrameId = usize;

pub struct Cache {
    /// Frame array. Grows up to `max_size`, then slots are reused.
    buffer: Vec<Frame>,
    /// Page table: which frame currently holds which page.
    pages: HashMap<PageId, FrameId>,
    max_size: usize,
    page_size: usize,
    pin_percentage_limit: f32,
    /// Number of currently pinned frames.
    pinned_pages: usize,
    /// LRU-K order.
    k: usize,
    /// Correlated reference period in logical clock ticks.
    crp: u64,
    /// Logical clock, incremented once per recorded access.
    current_time: u64,
}

impl Cache {
    /// Builds a cache from a validated configuration. Panics on invalid
    /// configuration; see [`CacheConfig::validate`].
    pub fn new(config: CacheConfig) -> Self {
        config.validate();

        Cache {
            buffer: Vec::with_capacity(config.max_size),
            pages: HashMap::with_capacity(config.max_size),
            max_size: config.max_size,
            page_size: config.page_size,
            pin_percentage_limit: config.pin_percentage_limit,
            pinned_pages: 0,
            k: config.k,
            crp: config.crp,
            current_time: 0,
        }
    }

    /// Cache with default configuration except for the pool size.
    pub fn with_max_size(max_size: usize) -> Self {
        Self::new(CacheConfig {
            max_size,
            ..Default::default()
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of currently pinned frames.
    pub fn pinned_pages(&self) -> usize {
        self.pinned_pages
    }

    pub fn contains(&self, page_number: PageId) -> bool {
        self.pages.contains_key(&page_number)
    }

    /// Returns the frame holding `page_number`, recording an access, or
    /// `None` if the page is not resident. Never allocates or evicts.
    pub fn get(&mut self, page_number: PageId) -> Option<FrameId> {
        let frame_id = *self.pages.get(&page_number)?;
        self.record_access(frame_id);
        Some(frame_id)
    }

    /// Maps `page_number` to a frame, allocating a new frame while the pool
    /// is below capacity and evicting a victim otherwise. Records an access
    /// in every case.
    ///
    /// Panics if eviction is required and no frame is evictable; that is a
    /// capacity or pinning misconfiguration, not a runtime condition.
    pub fn map(&mut self, page_number: PageId) -> FrameId {
        if let Some(&frame_id) = self.pages.get(&page_number) {
            self.record_access(frame_id);
            return frame_id;
        }

        let frame_id = if self.buffer.len() < self.max_size {
            let frame_id = self.buffer.len();
            self.buffer
                .push(Frame::new(page_number, MemPage::alloc(self.page_size)));
            frame_id
        } else {
            let victim = self.find_victim();
            let frame = &mut self.buffer[victim];
            debug!(
                "evicting page {} from frame {victim} for page {page_number}",
                frame.page_number
            );

            // The old mapping may already be gone if the previous tenant was
            // invalidated; only remove it if it still points at this frame.
            if self.pages.get(&frame.page_number) == Some(&victim) {
                self.pages.remove(&frame.page_number);
            }

            frame.page_number = page_number;
            frame.flags = 0;
            // The new tenant has never been accessed.
            frame.history.clear();
            frame.last = 0;
            victim
        };

        self.record_access(frame_id);
        self.pages.insert(page_number, frame_id);

        frame_id
    }

    /// Maps `page_number` (allocating or evicting as needed), swaps `page`
    /// into its frame and returns the payload that previously occupied it.
    /// Callers that must persist the displaced content do so themselves.
    pub fn load(&mut self, page_number: PageId, page: MemPage) -> MemPage {
        let frame_id = self.map(page_number);
        mem::replace(&mut self.buffer[frame_id].page, page)
    }

    /// Advances the logical clock and folds the access into the frame's
    /// LRU-K history.
    ///
    /// An access within `crp` ticks of the previous one is correlated: it
    /// refreshes `last` but does not enter the K-window. Once the gap
    /// exceeds `crp` the window shifts, aging every retained reference by
    /// the length of the burst it concluded.
    fn record_access(&mut self, frame_id: FrameId) {
        self.current_time += 1;
        let t = self.current_time;
        let (k, crp) = (self.k, self.crp);

        let frame = &mut self.buffer[frame_id];

        if frame.history.is_empty() {
            frame.history = vec![0; k];
            frame.history[0] = t;
            frame.last = t;
            return;
        }

        if t - frame.last > crp {
            let correlation_period = frame.last - frame.history[0];
            for i in (1..k).rev() {
                frame.history[i] = frame.history[i - 1] + correlation_period;
            }
            frame.history[0] = t;
        }

        frame.last = t;
    }

    /// Selects the eviction victim. Only meaningful when the pool is full.
    ///
    /// Two passes: first over candidates whose last access is older than the
    /// correlated reference period, then, if a burst has every candidate
    /// looking recent, over all candidates. Within a pass the victim is the
    /// frame with the smallest K-th most recent reference timestamp, ties
    /// broken by scan order.
    fn find_victim(&self) -> FrameId {
        let t = self.current_time;

        let mut victim = None;
        let mut min_backward = u64::MAX;

        for (frame_id, frame) in self.buffer.iter().enumerate() {
            if t - frame.last <= self.crp {
                continue;
            }
            if !self.is_evictable(frame_id) {
                continue;
            }

            let backward = self.backward_distance(frame);
            if backward < min_backward {
                min_backward = backward;
                victim = Some(frame_id);
            }
        }

        if let Some(frame_id) = victim {
            return frame_id;
        }

        // Every candidate was referenced within the correlated period; fall
        // back to the same selection without the recency filter.
        min_backward = u64::MAX;
        for (frame_id, frame) in self.buffer.iter().enumerate() {
            if !self.is_evictable(frame_id) {
                continue;
            }

            let backward = self.backward_distance(frame);
            if backward < min_backward {
                min_backward = backward;
                victim = Some(frame_id);
            }
        }

        victim.unwrap_or_else(|| {
            panic!(
                "no evictable frame in a full pool of {} frames ({} pinned)",
                self.max_size, self.pinned_pages
            )
        })
    }

    /// K-th most recent reference timestamp. Frames with no recorded history
    /// (an invalidated tenant) rank as the oldest possible reference.
    fn backward_distance(&self, frame: &Frame) -> u64 {
        frame.history.get(self.k - 1).copied().unwrap_or(0)
    }

    fn is_evictable(&self, frame_id: FrameId) -> bool {
        let frame = &self.buffer[frame_id];
        !frame.is_set(PINNED_FLAG) && !frame.is_overflow()
    }

    /// Whether mapping a non-resident page right now would evict a dirty
    /// frame. Callers use this to schedule a write-back before the frame is
    /// reused.
    pub fn must_evict_dirty_page(&self) -> bool {
        if self.buffer.len() < self.max_size {
            return false;
        }

        self.buffer[self.find_victim()].is_set(DIRTY_FLAG)
    }

    /// The frame the next eviction would reuse. Only valid while the pool is
    /// full; panics if nothing is evictable.
    pub(crate) fn peek_victim(&self) -> FrameId {
        self.find_victim()
    }

    fn set_flags(&mut self, page_number: PageId, flags: u8) -> bool {
        match self.pages.get(&page_number) {
            Some(&frame_id) => {
                self.buffer[frame_id].set(flags);
                true
            }
            None => false,
        }
    }

    fn unset_flags(&mut self, page_number: PageId, flags: u8) -> bool {
        match self.pages.get(&page_number) {
            Some(&frame_id) => {
                self.buffer[frame_id].unset(flags);
                true
            }
            None => false,
        }
    }

    /// Marks a resident page dirty. Returns `false` if not resident.
    pub fn mark_dirty(&mut self, page_number: PageId) -> bool {
        self.set_flags(page_number, DIRTY_FLAG)
    }

    /// Marks a resident page clean. Returns `false` if not resident.
    pub fn mark_clean(&mut self, page_number: PageId) -> bool {
        self.unset_flags(page_number, DIRTY_FLAG)
    }

    /// Pins a resident page, excluding it from eviction.
    ///
    /// Fails without side effects if the page is not resident or if pinning
    /// it would push the pinned share of the pool past the percentage limit.
    /// Pinning an already pinned page succeeds without consuming more of the
    /// limit.
    pub fn pin(&mut self, page_number: PageId) -> bool {
        let Some(&frame_id) = self.pages.get(&page_number) else {
            return false;
        };

        if self.buffer[frame_id].is_set(PINNED_FLAG) {
            return true;
        }

        let pinned_percentage = (self.pinned_pages + 1) as f32 / self.max_size as f32 * 100.0;
        if pinned_percentage > self.pin_percentage_limit {
            return false;
        }

        self.buffer[frame_id].set(PINNED_FLAG);
        self.pinned_pages += 1;

        true
    }

    /// Unpins a resident page, making it evictable again. Returns `false`
    /// (and changes nothing) if the page is not resident. The pinned count
    /// only decreases if the page was actually pinned.
    pub fn unpin(&mut self, page_number: PageId) -> bool {
        let Some(&frame_id) = self.pages.get(&page_number) else {
            return false;
        };

        if self.buffer[frame_id].is_set(PINNED_FLAG) {
            self.buffer[frame_id].unset(PINNED_FLAG);
            self.pinned_pages -= 1;
        }

        true
    }

    /// Drops the mapping for `page_number` and resets its frame's flags and
    /// history. The frame itself stays in the pool and ranks as the best
    /// possible eviction candidate.
    ///
    /// Invalidating a pinned page releases its share of the pin budget.
    pub fn invalidate(&mut self, page_number: PageId) {
        if let Some(frame_id) = self.pages.remove(&page_number) {
            let frame = &mut self.buffer[frame_id];
            if frame.is_set(PINNED_FLAG) {
                self.pinned_pages -= 1;
            }
            frame.flags = 0;
            frame.history.clear();
            frame.last = 0;
        }
    }

    /// Clones of every resident dirty page, for write-back.
    pub fn dirty_pages(&self) -> Vec<(PageId, MemPage)> {
        self.pages
            .values()
            .map(|&frame_id| &self.buffer[frame_id])
            .filter(|frame| frame.is_set(DIRTY_FLAG))
            .map(|frame| (frame.page_number, frame.page.clone()))
            .collect()
    }
}

/// Direct, non-validating access to a frame by slot.
impl Index<FrameId> for Cache {
    type Output = Frame;

    fn index(&self, frame_id: FrameId) -> &Self::Output {
        &self.buffer[frame_id]
    }
}

impl IndexMut<FrameId> for Cache {
    fn index_mut(&mut self, frame_id: FrameId) -> &mut Self::Output {
        &mut self.buffer[frame_id]
    }
}
