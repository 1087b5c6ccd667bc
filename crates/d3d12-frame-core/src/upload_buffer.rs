//! Linear allocator over persistently mapped upload pages.
//!
//! Each page is a fixed-size committed resource in an upload heap, mapped once
//! when it is created and unmapped when it is dropped. Allocations bump an
//! offset inside the current page; when the current page cannot fit a request
//! the next free page (or a new one) becomes current and the old page stays
//! held until [`UploadBuffer::reset`].
//!
//! Nothing here tracks GPU progress. Reset only once the GPU has finished
//! reading everything allocated since the last reset, typically by keeping
//! one buffer per back buffer and resetting it after the slot's fence wait.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;

use tracing::debug;

use crate::config::{DEFAULT_ALIGNMENT, FrameConfig};
use crate::gpu::{MappedPage, UploadHeap};
use crate::{FrameError, FrameResult, align};

/// A sub-range of an upload page.
///
/// Holds a reference to its page, so the mapping stays valid for as long as
/// the allocation exists. The contents are only meaningful until the owning
/// buffer is reset.
#[derive(Clone)]
pub struct Allocation {
    page: Rc<dyn MappedPage>,
    offset: usize,
    size: usize,
}

impl Allocation {
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        // SAFETY: offset + size never exceeds the page size.
        unsafe { self.page.cpu_ptr().add(self.offset) }
    }

    pub fn gpu_address(&self) -> u64 {
        self.page.gpu_address() + self.offset as u64
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Copies `bytes` to the start of the allocation.
    pub fn write_bytes(&self, bytes: &[u8]) -> FrameResult<()> {
        if bytes.len() > self.size {
            return Err(FrameError::AllocationTooLarge {
                requested: bytes.len(),
                page_size: self.size,
            });
        }

        // SAFETY: the destination lies inside the mapped page and cannot
        // overlap a CPU-side slice.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.cpu_ptr().as_ptr(), bytes.len());
        }
        Ok(())
    }

    /// Copies a plain-data slice to the start of the allocation.
    pub fn write<T: Copy>(&self, data: &[T]) -> FrameResult<()> {
        let len = std::mem::size_of_val(data);
        // SAFETY: T is Copy and the byte view does not outlive `data`.
        let bytes = unsafe { std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), len) };
        self.write_bytes(bytes)
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("gpu_address", &format_args!("{:#x}", self.gpu_address()))
            .field("size", &self.size)
            .finish()
    }
}

struct PageSlot<P> {
    memory: Rc<P>,
    offset: usize,
}

impl<P: MappedPage> PageSlot<P> {
    fn fits(&self, size: usize, alignment: usize) -> bool {
        align(self.offset, alignment) + align(size, alignment) <= self.memory.size()
    }
}

pub struct UploadBuffer<H: UploadHeap> {
    heap: H,
    page_size: usize,
    default_alignment: usize,
    /// Every page ever created; only grows until the buffer is dropped.
    pages: Vec<PageSlot<H::Page>>,
    free_pages: VecDeque<usize>,
    current: Option<usize>,
}

impl<H: UploadHeap> UploadBuffer<H> {
    pub fn new(heap: H, page_size: usize) -> Self {
        Self {
            heap,
            page_size,
            default_alignment: DEFAULT_ALIGNMENT,
            pages: Vec::new(),
            free_pages: VecDeque::new(),
            current: None,
        }
    }

    /// Page size and default alignment taken from `config`.
    pub fn from_config(heap: H, config: &FrameConfig) -> Self {
        Self::new(heap, config.upload_page_size).with_alignment(config.default_alignment)
    }

    /// Sets the alignment used by [`UploadBuffer::allocate_default`].
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.default_alignment = alignment;
        self
    }

    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// Fails with [`FrameError::AllocationTooLarge`] if the request cannot fit
    /// in a single page; the buffer is left untouched in that case.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> FrameResult<Allocation> {
        if !alignment.is_power_of_two() {
            return Err(FrameError::InvalidAlignment(alignment));
        }
        if size > self.page_size || align(size, alignment) > self.page_size {
            return Err(FrameError::AllocationTooLarge {
                requested: size,
                page_size: self.page_size,
            });
        }

        let index = match self.current {
            Some(index) if self.pages[index].fits(size, alignment) => index,
            _ => {
                let index = self.request_page()?;
                self.current = Some(index);
                index
            }
        };

        let slot = &mut self.pages[index];
        let offset = align(slot.offset, alignment);
        slot.offset = offset + align(size, alignment);

        Ok(Allocation {
            page: slot.memory.clone(),
            offset,
            size,
        })
    }

    /// [`UploadBuffer::allocate`] with the buffer's default alignment, 256
    /// unless configured otherwise.
    pub fn allocate_default(&mut self, size: usize) -> FrameResult<Allocation> {
        self.allocate(size, self.default_alignment)
    }

    pub fn default_alignment(&self) -> usize {
        self.default_alignment
    }

    /// Returns every page to the free list. The GPU must be done with all
    /// allocations made since the previous reset.
    pub fn reset(&mut self) {
        self.current = None;
        self.free_pages.clear();
        for (index, slot) in self.pages.iter_mut().enumerate() {
            slot.offset = 0;
            self.free_pages.push_back(index);
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn free_page_count(&self) -> usize {
        self.free_pages.len()
    }

    fn request_page(&mut self) -> FrameResult<usize> {
        if let Some(index) = self.free_pages.pop_front() {
            return Ok(index);
        }

        let memory = self.heap.create_upload_page(self.page_size)?;
        self.pages.push(PageSlot {
            memory: Rc::new(memory),
            offset: 0,
        });
        debug!(
            "Created upload page #{} ({} bytes)",
            self.pages.len(),
            self.page_size
        );
        Ok(self.pages.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mib;
    use crate::mock::MockGpu;

    fn buffer() -> (MockGpu, UploadBuffer<MockGpu>) {
        let gpu = MockGpu::new();
        let buffer = UploadBuffer::new(gpu.clone(), mib(2));
        (gpu, buffer)
    }

    #[test]
    fn test_allocations_are_aligned() {
        let (_gpu, mut buffer) = buffer();

        let a = buffer.allocate(13, 256).unwrap();
        let b = buffer.allocate(100, 256).unwrap();
        let c = buffer.allocate(8, 16).unwrap();

        for allocation in [&a, &b] {
            assert_eq!(allocation.gpu_address() % 256, 0);
        }
        assert_eq!(c.gpu_address() % 16, 0);
        assert_eq!(b.gpu_address() - a.gpu_address(), 256);
        assert_eq!(c.gpu_address() - b.gpu_address(), 256);
        assert_eq!(buffer.page_count(), 1);
    }

    #[test]
    fn test_default_alignment_follows_config() {
        let gpu = MockGpu::new();
        let config = FrameConfig {
            default_alignment: 4096,
            ..FrameConfig::default()
        };
        let mut buffer = UploadBuffer::from_config(gpu.clone(), &config);
        assert_eq!(buffer.page_size(), mib(2));
        assert_eq!(buffer.default_alignment(), 4096);

        let a = buffer.allocate_default(16).unwrap();
        let b = buffer.allocate_default(16).unwrap();
        assert_eq!(b.gpu_address() - a.gpu_address(), 4096);
        assert_eq!(b.gpu_address() % 4096, 0);

        let (_gpu, mut plain) = self::buffer();
        let c = plain.allocate_default(16).unwrap();
        let d = plain.allocate_default(16).unwrap();
        assert_eq!(d.gpu_address() - c.gpu_address(), 256);
    }

    #[test]
    fn test_oversized_request_fails_without_side_effects() {
        let (gpu, mut buffer) = buffer();

        let err = buffer.allocate(3_000_000, 256).unwrap_err();
        assert!(matches!(
            err,
            FrameError::AllocationTooLarge {
                requested: 3_000_000,
                page_size: 2_097_152,
            }
        ));
        assert_eq!(buffer.page_count(), 0);
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_rejects_non_power_of_two_alignment() {
        let (_gpu, mut buffer) = buffer();
        assert!(matches!(
            buffer.allocate(16, 48),
            Err(FrameError::InvalidAlignment(48))
        ));
    }

    #[test]
    fn test_full_page_moves_to_next() {
        let (_gpu, mut buffer) = buffer();

        let first = buffer.allocate(mib(1), 256).unwrap();
        let second = buffer.allocate(mib(1), 256).unwrap();
        assert_eq!(buffer.page_count(), 1);

        let third = buffer.allocate(256, 256).unwrap();
        assert_eq!(buffer.page_count(), 2);
        assert_ne!(
            third.gpu_address() & !(mib(2) as u64 - 1),
            first.gpu_address() & !(mib(2) as u64 - 1)
        );
        assert_eq!(second.gpu_address() - first.gpu_address(), mib(1) as u64);
    }

    #[test]
    fn test_reset_reuses_pages_from_the_start() {
        let (_gpu, mut buffer) = buffer();

        let before = buffer.allocate(1024, 256).unwrap().gpu_address();
        buffer.allocate(mib(2), 256).unwrap();
        assert_eq!(buffer.page_count(), 2);

        buffer.reset();
        assert_eq!(buffer.free_page_count(), 2);

        let after = buffer.allocate(1024, 256).unwrap().gpu_address();
        assert_eq!(before, after);
        assert_eq!(buffer.page_count(), 2);
        assert_eq!(buffer.free_page_count(), 1);
    }

    #[test]
    fn test_write_copies_into_page() {
        let (_gpu, mut buffer) = buffer();

        let allocation = buffer.allocate_default(16).unwrap();
        allocation.write(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();

        let bytes = unsafe { std::slice::from_raw_parts(allocation.cpu_ptr().as_ptr(), 16) };
        assert_eq!(&bytes[4..8], &2.0f32.to_ne_bytes());
        assert!(allocation.write(&[0u8; 17]).is_err());
    }
}
