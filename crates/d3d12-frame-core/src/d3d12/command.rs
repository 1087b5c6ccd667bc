use std::mem::ManuallyDrop;
use std::time::{Duration, Instant};

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventA, INFINITE, WaitForSingleObjectEx};
use windows::core::Interface;

use crate::gpu::{CommandAllocator, CommandList, Fence, FenceValue, ResourceState, SubmitQueue, WaitStatus};
use crate::{FrameError, FrameResult};

/// Fence plus the auto-reset event used to block on it.
pub struct D3d12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
}

impl D3d12Fence {
    pub(super) fn new(fence: ID3D12Fence) -> FrameResult<Self> {
        let event = unsafe { CreateEventA(None, false, false, None)? };
        if event.is_invalid() {
            return Err(windows::core::Error::from_win32().into());
        }
        Ok(Self { fence, event })
    }

    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl Fence for D3d12Fence {
    fn completed_value(&self) -> FenceValue {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for_value(&self, value: FenceValue, timeout: Option<Duration>) -> FrameResult<WaitStatus> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let completed = self.completed_value();
            // A removed device reports every bit set.
            if completed == u64::MAX {
                return Err(FrameError::device("device removed while waiting on fence"));
            }
            if completed >= value {
                return Ok(WaitStatus::Complete);
            }

            let millis = match deadline {
                None => INFINITE,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    u32::try_from(remaining.as_millis()).unwrap_or(INFINITE - 1)
                }
            };

            unsafe { self.fence.SetEventOnCompletion(value, self.event)? };
            let result = unsafe { WaitForSingleObjectEx(self.event, millis, false) };

            if result == WAIT_TIMEOUT {
                if self.completed_value() >= value {
                    return Ok(WaitStatus::Complete);
                }
                return Ok(WaitStatus::TimedOut);
            }
            if result != WAIT_OBJECT_0 {
                return Err(windows::core::Error::from_win32().into());
            }
            // The event may have been left signaled by an earlier value;
            // loop and re-check.
        }
    }
}

impl Drop for D3d12Fence {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.event).ok() };
    }
}

pub struct D3d12Allocator {
    allocator: ID3D12CommandAllocator,
}

impl D3d12Allocator {
    pub(super) fn new(allocator: ID3D12CommandAllocator) -> Self {
        Self { allocator }
    }

    pub fn raw(&self) -> &ID3D12CommandAllocator {
        &self.allocator
    }
}

impl CommandAllocator for D3d12Allocator {
    fn reset(&mut self) -> FrameResult<()> {
        unsafe { self.allocator.Reset()? };
        Ok(())
    }
}

pub struct D3d12List {
    list: ID3D12GraphicsCommandList,
}

impl D3d12List {
    pub(super) fn new(list: ID3D12GraphicsCommandList) -> Self {
        Self { list }
    }

    /// The list for recording scene commands.
    pub fn raw(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
    }
}

pub fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: state_before,
                StateAfter: state_after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

impl CommandList for D3d12List {
    type Allocator = D3d12Allocator;
    type Resource = ID3D12Resource;

    fn reset(&mut self, allocator: &D3d12Allocator) -> FrameResult<()> {
        unsafe {
            self.list
                .Reset(&allocator.allocator, None::<&ID3D12PipelineState>)?
        };
        Ok(())
    }

    fn close(&mut self) -> FrameResult<()> {
        unsafe { self.list.Close()? };
        Ok(())
    }

    fn transition(&mut self, resource: &ID3D12Resource, before: ResourceState, after: ResourceState) {
        let barrier = transition_barrier(resource, resource_state(before), resource_state(after));
        unsafe { self.list.ResourceBarrier(&[barrier]) };
    }
}

pub struct D3d12Queue {
    queue: ID3D12CommandQueue,
}

impl D3d12Queue {
    pub(super) fn new(queue: ID3D12CommandQueue) -> Self {
        Self { queue }
    }

    pub fn raw(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

impl SubmitQueue for D3d12Queue {
    type Fence = D3d12Fence;
    type List = D3d12List;

    fn execute(&self, list: &D3d12List) -> FrameResult<()> {
        let list: ID3D12CommandList = list.list.cast()?;
        unsafe { self.queue.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn signal(&self, fence: &D3d12Fence, value: FenceValue) -> FrameResult<()> {
        unsafe { self.queue.Signal(&fence.fence, value)? };
        Ok(())
    }
}
