//! Fence-gated command allocator recycling.
//!
//! An allocator owns the memory its command lists were recorded into, so it
//! can only be reset once the GPU has finished executing them. Entries are
//! queued in submission order; because fence values are monotonic the front
//! entry always carries the smallest value, and if it is not complete nothing
//! behind it is either.

use std::collections::VecDeque;

use tracing::debug;

use crate::FrameResult;
use crate::fence::FenceTracker;
use crate::gpu::{CommandAllocator, Device, Fence, FenceValue};

struct AllocatorEntry<A> {
    fence_value: FenceValue,
    allocator: A,
}

pub struct CommandAllocatorPool<A> {
    entries: VecDeque<AllocatorEntry<A>>,
    created: usize,
}

impl<A: CommandAllocator> CommandAllocatorPool<A> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            created: 0,
        }
    }

    /// Returns a reset allocator, reusing the oldest one if its work is
    /// complete and creating a new one otherwise. Never blocks.
    pub fn acquire<D, F>(&mut self, device: &D, fence: &FenceTracker<F>) -> FrameResult<A>
    where
        D: Device<Allocator = A>,
        F: Fence,
    {
        let front_ready = self
            .entries
            .front()
            .is_some_and(|entry| fence.is_complete(entry.fence_value));

        if front_ready {
            if let Some(mut entry) = self.entries.pop_front() {
                entry.allocator.reset()?;
                debug!(
                    "Reusing command allocator (fence value {}, {} still queued)",
                    entry.fence_value,
                    self.entries.len()
                );
                return Ok(entry.allocator);
            }
        }

        let allocator = device.create_command_allocator()?;
        self.created += 1;
        debug!("Created command allocator #{}", self.created);
        Ok(allocator)
    }

    /// Queues `allocator` for reuse once `fence_value` completes.
    pub fn release(&mut self, allocator: A, fence_value: FenceValue) {
        debug_assert!(
            self.entries
                .back()
                .is_none_or(|entry| entry.fence_value <= fence_value),
            "allocators must be released in submission order"
        );
        self.entries.push_back(AllocatorEntry {
            fence_value,
            allocator,
        });
    }

    /// Allocators waiting in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocators created over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created
    }
}

impl<A: CommandAllocator> Default for CommandAllocatorPool<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SubmitQueue;
    use crate::mock::{MockAllocator, MockEvent, MockGpu};

    #[test]
    fn test_empty_pool_creates() {
        let gpu = MockGpu::new();
        let fence = FenceTracker::new(gpu.create_fence(0).unwrap());
        let mut pool = CommandAllocatorPool::<MockAllocator>::new();

        let a = pool.acquire(&gpu, &fence).unwrap();
        let b = pool.acquire(&gpu, &fence).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_incomplete_front_is_not_reused() {
        let gpu = MockGpu::new();
        let queue = gpu.create_command_queue().unwrap();
        let mut fence = FenceTracker::new(gpu.create_fence(0).unwrap());
        let mut pool = CommandAllocatorPool::new();

        let first = pool.acquire(&gpu, &fence).unwrap();
        let first_id = first.id();
        let value = fence.signal(&queue).unwrap();
        pool.release(first, value);

        let second = pool.acquire(&gpu, &fence).unwrap();
        assert_ne!(second.id(), first_id);
        assert_eq!(pool.len(), 1);
        assert!(!gpu.events().contains(&MockEvent::AllocatorReset(first_id)));

        gpu.complete_up_to(value);
        let third = pool.acquire(&gpu, &fence).unwrap();
        assert_eq!(third.id(), first_id);
        assert!(gpu.events().contains(&MockEvent::AllocatorReset(first_id)));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_only_front_entry_is_checked() {
        let gpu = MockGpu::new();
        let queue = gpu.create_command_queue().unwrap();
        let mut fence = FenceTracker::new(gpu.create_fence(0).unwrap());
        let mut pool = CommandAllocatorPool::new();

        let a = pool.acquire(&gpu, &fence).unwrap();
        let b = pool.acquire(&gpu, &fence).unwrap();
        let (a_id, b_id) = (a.id(), b.id());
        pool.release(a, fence.signal(&queue).unwrap());
        pool.release(b, fence.signal(&queue).unwrap());

        gpu.complete_up_to(2);
        assert_eq!(pool.acquire(&gpu, &fence).unwrap().id(), a_id);
        assert_eq!(pool.acquire(&gpu, &fence).unwrap().id(), b_id);
        assert_eq!(pool.created(), 2);
        assert_eq!(queue.executed_count(), 0);
    }
}
