//! Backend traits the frame core is written against.
//!
//! Each trait mirrors the slice of the Direct3D 12 / DXGI object model the
//! core actually touches. [`crate::d3d12`] implements them over the real API,
//! `mock` (feature `mock`) over a simulated GPU timeline.

use std::ptr::NonNull;
use std::time::Duration;

use crate::FrameResult;

/// Monotonically increasing GPU progress marker.
pub type FenceValue = u64;

/// Outcome of a fence wait.
///
/// A timeout is not an error: the GPU work is still in flight and the caller
/// must not assume it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Complete,
    TimedOut,
}

/// Resource states the frame loop transitions back buffers between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Present,
    RenderTarget,
}

/// GPU fence plus the OS event used to block on it.
pub trait Fence {
    /// Highest value the GPU has reached.
    fn completed_value(&self) -> FenceValue;

    /// Blocks the calling thread until the GPU reaches `value`, or until
    /// `timeout` elapses. `None` waits forever.
    fn wait_for_value(&self, value: FenceValue, timeout: Option<Duration>)
    -> FrameResult<WaitStatus>;
}

/// Backing memory for recorded commands.
pub trait CommandAllocator {
    /// Reclaims the memory. Only legal once the GPU finished every list
    /// recorded from this allocator.
    fn reset(&mut self) -> FrameResult<()>;
}

/// A recording handle.
pub trait CommandList {
    type Allocator: CommandAllocator;
    type Resource;

    /// Reopens the list for recording into `allocator`.
    fn reset(&mut self, allocator: &Self::Allocator) -> FrameResult<()>;

    fn close(&mut self) -> FrameResult<()>;

    /// Records a state transition barrier.
    fn transition(&mut self, resource: &Self::Resource, before: ResourceState, after: ResourceState);
}

/// The GPU submission point.
pub trait SubmitQueue {
    type Fence: Fence;
    type List: CommandList;

    /// Submits a closed list. Work executes in submission order.
    fn execute(&self, list: &Self::List) -> FrameResult<()>;

    /// Enqueues a GPU-side write of `value` into `fence`.
    fn signal(&self, fence: &Self::Fence, value: FenceValue) -> FrameResult<()>;
}

/// Creates the command objects for a single direct queue.
pub trait Device {
    type Resource;
    type Fence: Fence;
    type Allocator: CommandAllocator;
    type List: CommandList<Allocator = Self::Allocator, Resource = Self::Resource>;
    type Queue: SubmitQueue<Fence = Self::Fence, List = Self::List>;

    fn create_command_queue(&self) -> FrameResult<Self::Queue>;
    fn create_fence(&self, initial_value: FenceValue) -> FrameResult<Self::Fence>;
    fn create_command_allocator(&self) -> FrameResult<Self::Allocator>;

    /// Creates a list that is open for recording into `allocator`.
    fn create_command_list(&self, allocator: &Self::Allocator) -> FrameResult<Self::List>;
}

/// A persistently mapped, CPU-writable and GPU-readable memory region.
///
/// The mapping lives as long as the value; dropping it unmaps.
pub trait MappedPage {
    fn cpu_ptr(&self) -> NonNull<u8>;
    fn gpu_address(&self) -> u64;
    fn size(&self) -> usize;
}

/// Source of upload-heap pages.
pub trait UploadHeap {
    type Page: MappedPage + 'static;

    fn create_upload_page(&self, size: usize) -> FrameResult<Self::Page>;
}

/// The presentation engine side of a swap chain.
pub trait PresentSurface {
    type BackBuffer;

    /// Index of the buffer the next frame renders into. Authoritative; the
    /// frame manager never tracks it on its own.
    fn current_back_buffer_index(&self) -> usize;

    /// Acquires buffer `index` and builds whatever views it needs.
    fn back_buffer(&mut self, index: usize) -> FrameResult<Self::BackBuffer>;

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> FrameResult<()>;

    /// Every back buffer reference must be released before calling this.
    fn resize_buffers(&mut self, buffer_count: usize, width: u32, height: u32) -> FrameResult<()>;
}

/// Window rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl WindowRect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Window operations needed for borderless fullscreen.
pub trait FullscreenWindow {
    fn window_rect(&self) -> FrameResult<WindowRect>;

    /// Removes decorations and covers the nearest monitor.
    fn enter_borderless(&mut self) -> FrameResult<()>;

    /// Restores decorations and the given rectangle.
    fn restore_windowed(&mut self, rect: WindowRect) -> FrameResult<()>;
}

/// Descriptor heap types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

/// A CPU-visible descriptor heap.
pub trait DescriptorHeap {
    /// CPU handle of descriptor 0.
    fn cpu_start(&self) -> usize;

    /// Distance in bytes between consecutive descriptors.
    fn increment_size(&self) -> usize;
}

pub trait DescriptorHeapFactory {
    type Heap: DescriptorHeap;

    fn create_descriptor_heap(&self, kind: DescriptorKind, count: u32) -> FrameResult<Self::Heap>;
}
