//! Fence value tracking.
//!
//! A [`FenceTracker`] pairs a GPU fence with the last value the CPU asked the
//! queue to signal. Values are handed out strictly increasing and never
//! reused, so "is value V complete" is a single comparison against the
//! fence's completed value.

use std::time::Duration;

use tracing::{debug, warn};

use crate::FrameResult;
use crate::gpu::{Fence, FenceValue, SubmitQueue, WaitStatus};

pub struct FenceTracker<F> {
    fence: F,
    /// Last value enqueued for signalling.
    last_signaled: FenceValue,
}

impl<F: Fence> FenceTracker<F> {
    /// Wraps a fence created with an initial value of 0.
    pub fn new(fence: F) -> Self {
        Self {
            fence,
            last_signaled: 0,
        }
    }

    /// Enqueues a signal for the next value and returns it.
    ///
    /// The counter advances before submission so a value is never handed out
    /// twice, even if the submission fails.
    pub fn signal<Q>(&mut self, queue: &Q) -> FrameResult<FenceValue>
    where
        Q: SubmitQueue<Fence = F>,
    {
        self.last_signaled += 1;
        let value = self.last_signaled;
        queue.signal(&self.fence, value)?;
        Ok(value)
    }

    /// Non-blocking completion check.
    #[inline]
    pub fn is_complete(&self, value: FenceValue) -> bool {
        self.fence.completed_value() >= value
    }

    /// Blocks until `value` is complete or `timeout` elapses.
    pub fn wait_for(&self, value: FenceValue, timeout: Option<Duration>) -> FrameResult<WaitStatus> {
        if self.is_complete(value) {
            return Ok(WaitStatus::Complete);
        }

        debug!("Waiting for fence value {value}");
        let status = self.fence.wait_for_value(value, timeout)?;
        if status == WaitStatus::TimedOut {
            warn!(
                "Timed out after {:?} waiting for fence value {value} (completed: {})",
                timeout,
                self.fence.completed_value()
            );
        }
        Ok(status)
    }

    /// Signals a new value and waits for it: every previously submitted
    /// command has finished when this returns.
    pub fn flush<Q>(&mut self, queue: &Q) -> FrameResult<FenceValue>
    where
        Q: SubmitQueue<Fence = F>,
    {
        let value = self.signal(queue)?;
        self.wait_for(value, None)?;
        Ok(value)
    }

    #[inline]
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    #[inline]
    pub fn completed_value(&self) -> FenceValue {
        self.fence.completed_value()
    }

    #[inline]
    pub fn fence(&self) -> &F {
        &self.fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Device;
    use crate::mock::{MockEvent, MockGpu};

    fn tracker(gpu: &MockGpu) -> FenceTracker<crate::mock::MockFence> {
        FenceTracker::new(gpu.create_fence(0).unwrap())
    }

    #[test]
    fn test_signal_is_strictly_increasing() {
        let gpu = MockGpu::new();
        let queue = gpu.create_command_queue().unwrap();
        let mut fence = tracker(&gpu);

        let values: Vec<_> = (0..4).map(|_| fence.signal(&queue).unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert_eq!(fence.last_signaled(), 4);
    }

    #[test]
    fn test_wait_skips_completed_values() {
        let gpu = MockGpu::new();
        let queue = gpu.create_command_queue().unwrap();
        let mut fence = tracker(&gpu);

        let value = fence.signal(&queue).unwrap();
        gpu.complete_up_to(value);
        gpu.clear_events();

        assert_eq!(fence.wait_for(value, None).unwrap(), WaitStatus::Complete);
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_flush_blocks_until_complete() {
        let gpu = MockGpu::new();
        let queue = gpu.create_command_queue().unwrap();
        let mut fence = tracker(&gpu);

        fence.signal(&queue).unwrap();
        let value = fence.flush(&queue).unwrap();

        assert_eq!(value, 2);
        assert!(fence.is_complete(1));
        assert!(fence.is_complete(2));
        assert!(gpu.events().contains(&MockEvent::Waited(2)));
    }

    #[test]
    fn test_bounded_wait_on_stalled_gpu_times_out() {
        let gpu = MockGpu::new();
        let queue = gpu.create_command_queue().unwrap();
        let mut fence = tracker(&gpu);

        let value = fence.signal(&queue).unwrap();
        gpu.set_stalled(true);

        let status = fence
            .wait_for(value, Some(Duration::from_millis(16)))
            .unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(!fence.is_complete(value));
    }
}
