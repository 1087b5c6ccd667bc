//! Command queue with fence tracking and command object recycling.
//!
//! # Overview
//!
//! ```text
//! get_command_list()         -> allocator from pool (if its fence is done)
//!                               list from pool, reset against the allocator
//! ... record ...
//! execute_command_list(list) -> close, submit, signal value V
//!                               allocator queued for reuse after V
//!                               list queued for reuse immediately
//! ```
//!
//! Submission order is call order. The queue is meant for a single calling
//! thread; the pools it owns take no locks.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::debug;

use crate::FrameResult;
use crate::command_allocator_pool::CommandAllocatorPool;
use crate::command_list_pool::CommandListPool;
use crate::fence::FenceTracker;
use crate::gpu::{CommandList, Device, FenceValue, SubmitQueue, WaitStatus};

/// A command list together with the allocator backing it.
///
/// Returned by [`CommandQueue::get_command_list`] and consumed by
/// [`CommandQueue::execute_command_list`], so a list cannot be submitted twice
/// and its allocator cannot be recycled while it is still recording.
pub struct RecordingList<D: Device> {
    list: D::List,
    allocator: D::Allocator,
}

impl<D: Device> RecordingList<D> {
    #[inline]
    pub fn list(&self) -> &D::List {
        &self.list
    }

    #[inline]
    pub fn list_mut(&mut self) -> &mut D::List {
        &mut self.list
    }

    #[inline]
    pub fn allocator(&self) -> &D::Allocator {
        &self.allocator
    }
}

impl<D: Device> Deref for RecordingList<D> {
    type Target = D::List;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl<D: Device> DerefMut for RecordingList<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

pub struct CommandQueue<D: Device> {
    device: D,
    queue: D::Queue,
    fence: FenceTracker<D::Fence>,
    allocators: CommandAllocatorPool<D::Allocator>,
    lists: CommandListPool<D::List>,
}

impl<D: Device + Clone> CommandQueue<D> {
    /// Creates the queue and its fence.
    pub fn new(device: &D) -> FrameResult<Self> {
        let queue = device.create_command_queue()?;
        let fence = FenceTracker::new(device.create_fence(0)?);
        debug!("Created command queue");

        Ok(Self {
            device: device.clone(),
            queue,
            fence,
            allocators: CommandAllocatorPool::new(),
            lists: CommandListPool::new(),
        })
    }
}

impl<D: Device> CommandQueue<D> {
    /// Returns a list open for recording. Never blocks.
    pub fn get_command_list(&mut self) -> FrameResult<RecordingList<D>> {
        let allocator = self.allocators.acquire(&self.device, &self.fence)?;
        let list = self.lists.acquire(&self.device, &allocator)?;
        Ok(RecordingList { list, allocator })
    }

    /// Closes and submits `recording`, returning the fence value that marks
    /// its completion.
    pub fn execute_command_list(&mut self, recording: RecordingList<D>) -> FrameResult<FenceValue> {
        let RecordingList {
            mut list,
            allocator,
        } = recording;

        list.close()?;
        self.queue.execute(&list)?;
        let fence_value = self.fence.signal(&self.queue)?;

        self.allocators.release(allocator, fence_value);
        self.lists.release(list);

        Ok(fence_value)
    }

    /// Closes `recording` without submitting it and hands the list and
    /// allocator back to their pools.
    ///
    /// The allocator is gated on the last signaled value, so it is recycled
    /// no sooner than an allocator from the most recent submission.
    pub fn discard_command_list(&mut self, recording: RecordingList<D>) -> FrameResult<()> {
        let RecordingList {
            mut list,
            allocator,
        } = recording;

        let closed = list.close();
        self.allocators.release(allocator, self.fence.last_signaled());
        self.lists.release(list);
        debug!("Discarded unsubmitted command list");
        closed
    }

    /// Signals the next fence value without submitting work.
    pub fn signal(&mut self) -> FrameResult<FenceValue> {
        self.fence.signal(&self.queue)
    }

    #[inline]
    pub fn is_fence_complete(&self, fence_value: FenceValue) -> bool {
        self.fence.is_complete(fence_value)
    }

    /// Blocks until `fence_value` is complete.
    pub fn wait_for_fence_value(&self, fence_value: FenceValue) -> FrameResult<()> {
        self.fence.wait_for(fence_value, None).map(|_| ())
    }

    /// Blocks until `fence_value` is complete or `timeout` elapses. A timeout
    /// does not cancel anything; the work is still in flight.
    pub fn wait_for_fence_value_timeout(
        &self,
        fence_value: FenceValue,
        timeout: Duration,
    ) -> FrameResult<WaitStatus> {
        self.fence.wait_for(fence_value, Some(timeout))
    }

    /// Blocks until every submitted command list has finished.
    pub fn flush(&mut self) -> FrameResult<FenceValue> {
        let fence_value = self.fence.flush(&self.queue)?;
        debug!("Flushed command queue at fence value {fence_value}");
        Ok(fence_value)
    }

    #[inline]
    pub fn last_signaled(&self) -> FenceValue {
        self.fence.last_signaled()
    }

    #[inline]
    pub fn completed_value(&self) -> FenceValue {
        self.fence.completed_value()
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The underlying submission point (e.g. for swap chain creation).
    #[inline]
    pub fn handle(&self) -> &D::Queue {
        &self.queue
    }

    pub fn allocator_pool(&self) -> &CommandAllocatorPool<D::Allocator> {
        &self.allocators
    }

    pub fn list_pool(&self) -> &CommandListPool<D::List> {
        &self.lists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEvent, MockGpu};

    #[test]
    fn test_execute_returns_increasing_values() {
        let gpu = MockGpu::new();
        let mut queue = CommandQueue::new(&gpu).unwrap();

        let mut last = 0;
        for _ in 0..6 {
            let list = queue.get_command_list().unwrap();
            let value = queue.execute_command_list(list).unwrap();
            assert!(value > last);
            last = value;
        }
        assert_eq!(queue.last_signaled(), 6);
        assert_eq!(queue.handle().executed_count(), 6);
    }

    #[test]
    fn test_list_is_reused_immediately_allocator_is_not() {
        let gpu = MockGpu::new();
        let mut queue = CommandQueue::new(&gpu).unwrap();

        let first = queue.get_command_list().unwrap();
        let (list_id, allocator_id) = (first.list().id(), first.allocator().id());
        queue.execute_command_list(first).unwrap();

        let second = queue.get_command_list().unwrap();
        assert_eq!(second.list().id(), list_id);
        assert_ne!(second.allocator().id(), allocator_id);
        assert_eq!(second.list().allocator_id(), second.allocator().id());
        queue.execute_command_list(second).unwrap();

        assert_eq!(queue.allocator_pool().created(), 2);
        assert_eq!(queue.list_pool().created(), 1);
    }

    #[test]
    fn test_pools_stabilise_once_work_completes() {
        let gpu = MockGpu::new();
        let mut queue = CommandQueue::new(&gpu).unwrap();

        for _ in 0..10 {
            let list = queue.get_command_list().unwrap();
            let value = queue.execute_command_list(list).unwrap();
            queue.wait_for_fence_value(value).unwrap();
        }

        assert_eq!(queue.allocator_pool().created(), 1);
        assert_eq!(queue.list_pool().created(), 1);
    }

    #[test]
    fn test_discarded_lists_return_to_the_pools() {
        let gpu = MockGpu::new();
        let mut queue = CommandQueue::new(&gpu).unwrap();

        for _ in 0..3 {
            let list = queue.get_command_list().unwrap();
            queue.discard_command_list(list).unwrap();
        }
        let list = queue.get_command_list().unwrap();
        queue.execute_command_list(list).unwrap();

        assert_eq!(queue.allocator_pool().created(), 1);
        assert_eq!(queue.list_pool().created(), 1);
        assert_eq!(queue.handle().executed_count(), 1);
    }

    #[test]
    fn test_flush_completes_everything() {
        let gpu = MockGpu::new();
        let mut queue = CommandQueue::new(&gpu).unwrap();

        let values: Vec<_> = (0..3)
            .map(|_| {
                let list = queue.get_command_list().unwrap();
                queue.execute_command_list(list).unwrap()
            })
            .collect();
        assert!(values.iter().all(|&v| !queue.is_fence_complete(v)));

        let flushed = queue.flush().unwrap();
        assert_eq!(flushed, 4);
        assert!(values.iter().all(|&v| queue.is_fence_complete(v)));
        assert_eq!(gpu.events().last(), Some(&MockEvent::Waited(4)));
    }

    #[test]
    fn test_wait_timeout_leaves_work_in_flight() {
        let gpu = MockGpu::new();
        let mut queue = CommandQueue::new(&gpu).unwrap();

        let list = queue.get_command_list().unwrap();
        let value = queue.execute_command_list(list).unwrap();
        gpu.set_stalled(true);

        let status = queue
            .wait_for_fence_value_timeout(value, Duration::from_millis(5))
            .unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(!queue.is_fence_complete(value));

        // Still gated: a new list must not recycle the in-flight allocator.
        let next = queue.get_command_list().unwrap();
        assert_eq!(queue.allocator_pool().created(), 2);
        drop(next);
    }
}
