//! CPU-visible descriptor allocation.
//!
//! Descriptors are handed out as contiguous ranges from fixed-size heap pages.
//! Each page keeps a free list of `offset -> count` ranges. A dropped
//! [`DescriptorAllocation`] does not go straight back on the free list: the
//! GPU may still read the descriptors through work recorded this frame, so
//! the range is parked as stale, tagged with the current frame, and returned
//! by [`DescriptorAllocator::release_stale_descriptors`] once that frame is
//! known to be complete.
//!
//! Handles store `(page, generation, offset)` and a weak reference to the
//! page table. [`DescriptorAllocator::reset`] bumps every page generation, so
//! handles issued before it are ignored when they are dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::gpu::{DescriptorHeap, DescriptorHeapFactory, DescriptorKind};
use crate::{FrameError, FrameResult};

struct DescriptorPage {
    cpu_start: usize,
    increment: usize,
    generation: u64,
    /// offset -> count, non-overlapping and never adjacent.
    free_ranges: BTreeMap<u32, u32>,
    free_count: u32,
}

impl DescriptorPage {
    fn new(cpu_start: usize, increment: usize, count: u32) -> Self {
        Self {
            cpu_start,
            increment,
            generation: 0,
            free_ranges: BTreeMap::from([(0, count)]),
            free_count: count,
        }
    }

    fn take(&mut self, count: u32) -> Option<u32> {
        if self.free_count < count {
            return None;
        }

        let (&offset, &len) = self.free_ranges.iter().find(|&(_, &len)| len >= count)?;
        self.free_ranges.remove(&offset);
        if len > count {
            self.free_ranges.insert(offset + count, len - count);
        }
        self.free_count -= count;
        Some(offset)
    }

    fn give_back(&mut self, mut offset: u32, mut count: u32) {
        self.free_count += count;

        if let Some((&prev_offset, &prev_len)) = self.free_ranges.range(..offset).next_back() {
            if prev_offset + prev_len == offset {
                self.free_ranges.remove(&prev_offset);
                offset = prev_offset;
                count += prev_len;
            }
        }
        if let Some(next_len) = self.free_ranges.remove(&(offset + count)) {
            count += next_len;
        }

        self.free_ranges.insert(offset, count);
    }
}

struct StaleRange {
    page: usize,
    generation: u64,
    offset: u32,
    count: u32,
    frame: u64,
}

#[derive(Default)]
struct PageTable {
    pages: Vec<DescriptorPage>,
    stale: Vec<StaleRange>,
    current_frame: u64,
}

impl PageTable {
    fn free(&mut self, page: usize, generation: u64, offset: u32, count: u32) {
        let Some(entry) = self.pages.get(page) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        self.stale.push(StaleRange {
            page,
            generation,
            offset,
            count,
            frame: self.current_frame,
        });
    }
}

/// A contiguous range of descriptors.
///
/// Move-only. Dropping it (or calling [`DescriptorAllocation::release`])
/// queues the range for reuse exactly once. The default value is the null
/// allocation, whose drop does nothing.
#[derive(Default)]
pub struct DescriptorAllocation {
    table: Weak<Mutex<PageTable>>,
    page: usize,
    generation: u64,
    offset: u32,
    count: u32,
    cpu_base: usize,
    increment: usize,
}

impl DescriptorAllocation {
    #[inline]
    pub fn is_null(&self) -> bool {
        self.count == 0
    }

    /// CPU handle of descriptor `offset` within the range.
    pub fn cpu_handle(&self, offset: u32) -> usize {
        debug_assert!(offset < self.count, "descriptor {offset} out of {}", self.count);
        self.cpu_base + offset as usize * self.increment
    }

    #[inline]
    pub fn handle_count(&self) -> u32 {
        self.count
    }

    /// Queues the range as stale and nulls the handle. No-op when already
    /// null.
    pub fn release(&mut self) {
        let count = std::mem::replace(&mut self.count, 0);
        if count == 0 {
            return;
        }
        let table = std::mem::take(&mut self.table);
        if let Some(table) = table.upgrade() {
            table.lock().free(self.page, self.generation, self.offset, count);
        }
        self.cpu_base = 0;
    }
}

impl Drop for DescriptorAllocation {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DescriptorAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorAllocation")
            .field("page", &self.page)
            .field("offset", &self.offset)
            .field("count", &self.count)
            .finish()
    }
}

pub struct DescriptorAllocator<F: DescriptorHeapFactory> {
    factory: F,
    kind: DescriptorKind,
    descriptors_per_heap: u32,
    heaps: Mutex<Vec<F::Heap>>,
    table: Arc<Mutex<PageTable>>,
}

impl<F: DescriptorHeapFactory> DescriptorAllocator<F> {
    pub fn new(factory: F, kind: DescriptorKind, descriptors_per_heap: u32) -> Self {
        Self {
            factory,
            kind,
            descriptors_per_heap,
            heaps: Mutex::new(Vec::new()),
            table: Arc::new(Mutex::new(PageTable::default())),
        }
    }

    /// Allocates `count` contiguous descriptors. `count == 0` yields the null
    /// allocation.
    pub fn allocate(&self, count: u32) -> FrameResult<DescriptorAllocation> {
        if count == 0 {
            return Ok(DescriptorAllocation::default());
        }
        if count > self.descriptors_per_heap {
            return Err(FrameError::DescriptorHeapExhausted {
                requested: count,
                per_heap: self.descriptors_per_heap,
            });
        }

        let mut table = self.table.lock();

        let found = table
            .pages
            .iter_mut()
            .enumerate()
            .find_map(|(index, page)| page.take(count).map(|offset| (index, offset)));

        let (page, offset) = match found {
            Some(found) => found,
            None => {
                let heap = self
                    .factory
                    .create_descriptor_heap(self.kind, self.descriptors_per_heap)?;
                let mut page = DescriptorPage::new(
                    heap.cpu_start(),
                    heap.increment_size(),
                    self.descriptors_per_heap,
                );
                self.heaps.lock().push(heap);

                let offset = page.take(count).ok_or_else(|| {
                    FrameError::device("fresh descriptor heap cannot satisfy request")
                })?;
                table.pages.push(page);
                debug!(
                    "Created {:?} descriptor heap #{} ({} descriptors)",
                    self.kind,
                    table.pages.len(),
                    self.descriptors_per_heap
                );
                (table.pages.len() - 1, offset)
            }
        };

        let entry = &table.pages[page];
        Ok(DescriptorAllocation {
            table: Arc::downgrade(&self.table),
            page,
            generation: entry.generation,
            offset,
            count,
            cpu_base: entry.cpu_start + offset as usize * entry.increment,
            increment: entry.increment,
        })
    }

    /// Tags frees from now on with `frame`.
    pub fn set_current_frame(&self, frame: u64) {
        self.table.lock().current_frame = frame;
    }

    /// Returns every stale range freed at or before `completed_frame` to its
    /// page.
    pub fn release_stale_descriptors(&self, completed_frame: u64) {
        let mut table = self.table.lock();
        let PageTable { pages, stale, .. } = &mut *table;

        let before = stale.len();
        stale.retain(|range| {
            if range.frame > completed_frame {
                return true;
            }
            if let Some(page) = pages.get_mut(range.page) {
                if page.generation == range.generation {
                    page.give_back(range.offset, range.count);
                }
            }
            false
        });

        let released = before - stale.len();
        if released > 0 {
            debug!("Released {released} stale {:?} descriptor ranges", self.kind);
        }
    }

    /// Marks every descriptor free and invalidates outstanding handles.
    /// Nothing may still reference the descriptors.
    pub fn reset(&self) {
        let mut table = self.table.lock();
        let count = self.descriptors_per_heap;
        for page in &mut table.pages {
            page.generation += 1;
            page.free_ranges = BTreeMap::from([(0, count)]);
            page.free_count = count;
        }
        table.stale.clear();
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn page_count(&self) -> usize {
        self.table.lock().pages.len()
    }

    pub fn free_descriptor_count(&self) -> u32 {
        self.table.lock().pages.iter().map(|page| page.free_count).sum()
    }

    pub fn stale_range_count(&self) -> usize {
        self.table.lock().stale.len()
    }

    /// The heap backing page `index`.
    pub fn with_heap<R>(&self, index: usize, f: impl FnOnce(&F::Heap) -> R) -> Option<R> {
        self.heaps.lock().get(index).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEvent, MockGpu};

    fn allocator(per_heap: u32) -> (MockGpu, DescriptorAllocator<MockGpu>) {
        let gpu = MockGpu::new();
        let allocator = DescriptorAllocator::new(gpu.clone(), DescriptorKind::Rtv, per_heap);
        (gpu, allocator)
    }

    #[test]
    fn test_handles_are_contiguous() {
        let (gpu, allocator) = allocator(8);

        let a = allocator.allocate(3).unwrap();
        let b = allocator.allocate(2).unwrap();

        assert_eq!(a.handle_count(), 3);
        assert_eq!(a.cpu_handle(1) - a.cpu_handle(0), 32);
        assert_eq!(b.cpu_handle(0), a.cpu_handle(0) + 3 * 32);
        assert_eq!(allocator.free_descriptor_count(), 3);
        assert_eq!(
            gpu.events(),
            vec![MockEvent::HeapCreated {
                kind: DescriptorKind::Rtv,
                count: 8,
            }]
        );
    }

    #[test]
    fn test_oversized_request_fails() {
        let (_gpu, allocator) = allocator(8);
        assert!(matches!(
            allocator.allocate(9),
            Err(FrameError::DescriptorHeapExhausted {
                requested: 9,
                per_heap: 8,
            })
        ));
        assert_eq!(allocator.page_count(), 0);
    }

    #[test]
    fn test_zero_count_is_null() {
        let (_gpu, allocator) = allocator(8);
        let null = allocator.allocate(0).unwrap();
        assert!(null.is_null());
        drop(null);
        assert_eq!(allocator.stale_range_count(), 0);
        assert_eq!(allocator.page_count(), 0);
    }

    #[test]
    fn test_full_page_spills_to_new_heap() {
        let (_gpu, allocator) = allocator(4);

        let a = allocator.allocate(3).unwrap();
        let b = allocator.allocate(2).unwrap();

        assert_eq!(allocator.page_count(), 2);
        assert_ne!(a.cpu_handle(0) + 3 * 32, b.cpu_handle(0));
        assert_eq!(allocator.free_descriptor_count(), 1 + 2);
    }

    #[test]
    fn test_free_is_deferred_until_frame_completes() {
        let (_gpu, allocator) = allocator(4);

        allocator.set_current_frame(5);
        let a = allocator.allocate(4).unwrap();
        drop(a);
        assert_eq!(allocator.stale_range_count(), 1);
        assert_eq!(allocator.free_descriptor_count(), 0);

        allocator.release_stale_descriptors(4);
        assert_eq!(allocator.free_descriptor_count(), 0);

        allocator.release_stale_descriptors(5);
        assert_eq!(allocator.free_descriptor_count(), 4);
        assert_eq!(allocator.stale_range_count(), 0);

        let again = allocator.allocate(4).unwrap();
        assert_eq!(allocator.page_count(), 1);
        assert!(!again.is_null());
    }

    #[test]
    fn test_adjacent_ranges_coalesce() {
        let (_gpu, allocator) = allocator(6);

        let a = allocator.allocate(2).unwrap();
        let b = allocator.allocate(2).unwrap();
        let c = allocator.allocate(2).unwrap();
        let base = a.cpu_handle(0);

        drop(a);
        drop(c);
        drop(b);
        allocator.release_stale_descriptors(0);

        let whole = allocator.allocate(6).unwrap();
        assert_eq!(whole.cpu_handle(0), base);
        assert_eq!(allocator.page_count(), 1);
    }

    #[test]
    fn test_release_is_exactly_once() {
        let (_gpu, allocator) = allocator(4);

        let mut a = allocator.allocate(2).unwrap();
        a.release();
        a.release();
        assert!(a.is_null());
        drop(a);

        assert_eq!(allocator.stale_range_count(), 1);
    }

    #[test]
    fn test_overwriting_a_handle_frees_the_old_range() {
        let (_gpu, allocator) = allocator(4);

        allocator.set_current_frame(1);
        let mut dsv = allocator.allocate(1).unwrap();
        let first = dsv.cpu_handle(0);
        dsv = allocator.allocate(1).unwrap();
        assert_ne!(dsv.cpu_handle(0), first);
        assert_eq!(allocator.stale_range_count(), 1);

        allocator.release_stale_descriptors(1);
        assert_eq!(allocator.free_descriptor_count(), 3);

        dsv.release();
        assert!(dsv.is_null());
        assert_eq!(dsv.handle_count(), 0);
        drop(dsv);
        assert_eq!(allocator.stale_range_count(), 1);
    }

    #[test]
    fn test_reset_invalidates_outstanding_handles() {
        let (_gpu, allocator) = allocator(4);

        let stale = allocator.allocate(2).unwrap();
        allocator.reset();
        assert_eq!(allocator.free_descriptor_count(), 4);

        let fresh = allocator.allocate(4).unwrap();
        drop(stale);
        assert_eq!(allocator.stale_range_count(), 0);
        drop(fresh);
        assert_eq!(allocator.stale_range_count(), 1);
    }

    #[test]
    fn test_handles_outliving_allocator_drop_quietly() {
        let (_gpu, allocator) = allocator(4);
        let a = allocator.allocate(1).unwrap();
        drop(allocator);
        drop(a);
    }

    #[test]
    fn test_shared_across_threads() {
        let (_gpu, allocator) = allocator(4);
        let allocator = Arc::new(allocator);
        let handles: Vec<_> = (0..4).map(|_| allocator.allocate(1).unwrap()).collect();

        let worker = std::thread::spawn(move || drop(handles));
        worker.join().unwrap();

        assert_eq!(allocator.stale_range_count(), 4);
    }
}
