//! Page allocation and recycling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;

use crate::page::Page;

/// Hands out zeroed pages and takes them back once their last record has
/// been consumed. Shared by every partition of a job.
pub trait PageAllocator: Send + Sync {
    /// Allocate a page with at least `min_capacity` bytes, and at least the
    /// allocator's page size.
    fn allocate(&self, min_capacity: usize) -> Page;

    /// Return a page whose records are no longer needed.
    fn release(&self, page: Page);

    /// Standard page capacity.
    fn page_size(&self) -> usize;
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStats {
    pub allocated: u64,
    pub reused: u64,
    pub released: u64,
}

/// Allocator keeping a bounded pool of standard-size buffers.
///
/// Oversized pages (a single record larger than the page size) are
/// allocated on demand and dropped on release.
#[derive(Debug)]
pub struct PooledPageAllocator {
    page_size: usize,
    max_pooled: usize,
    pool: Mutex<Vec<BytesMut>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
}

impl PooledPageAllocator {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self::with_pool_limit(page_size, 64)
    }

    #[must_use]
    pub fn with_pool_limit(page_size: usize, max_pooled: usize) -> Self {
        Self {
            page_size,
            max_pooled,
            pool: Mutex::new(Vec::new()),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn pooled(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for PooledPageAllocator {
    fn default() -> Self {
        Self::new(crate::DEFAULT_PAGE_SIZE)
    }
}

impl PageAllocator for PooledPageAllocator {
    fn allocate(&self, min_capacity: usize) -> Page {
        if min_capacity <= self.page_size {
            let recycled = self
                .pool
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop();
            if let Some(buf) = recycled {
                self.reused.fetch_add(1, Ordering::Relaxed);
                return Page::from_buffer(buf);
            }
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Page::with_capacity(min_capacity.max(self.page_size))
    }

    fn release(&self, page: Page) {
        self.released.fetch_add(1, Ordering::Relaxed);
        if page.capacity() != self.page_size {
            return;
        }
        let buf = page.into_buffer();
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < self.max_pooled {
            pool.push(buf);
        }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_page_is_recycled_zeroed() {
        let alloc = PooledPageAllocator::new(64);
        let mut page = alloc.allocate(16);
        page.set_i64(0, 42);
        page.set_length(8);
        page.add_string_reference("x");
        alloc.release(page);
        assert_eq!(alloc.pooled(), 1);

        let page = alloc.allocate(16);
        assert_eq!(page.capacity(), 64);
        assert_eq!(page.get_i64(0), 0);
        assert_eq!(page.length(), 0);
        assert_eq!(
            alloc.stats(),
            AllocatorStats { allocated: 1, reused: 1, released: 1 }
        );
    }

    #[test]
    fn oversized_pages_bypass_pool() {
        let alloc = PooledPageAllocator::new(32);
        let page = alloc.allocate(100);
        assert_eq!(page.capacity(), 100);
        alloc.release(page);
        assert_eq!(alloc.pooled(), 0);
    }

    #[test]
    fn pool_is_bounded() {
        let alloc = PooledPageAllocator::with_pool_limit(16, 2);
        let pages: Vec<Page> = (0..4).map(|_| alloc.allocate(1)).collect();
        for page in pages {
            alloc.release(page);
        }
        assert_eq!(alloc.pooled(), 2);
    }
}
