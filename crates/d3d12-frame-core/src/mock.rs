//! Simulated GPU backend.
//!
//! [`MockGpu`] implements every trait in [`crate::gpu`] over a single fence
//! timeline that only advances when told to: by [`MockGpu::complete_up_to`],
//! or by a blocking wait on a non-stalled GPU (the wait "runs" the GPU up to
//! the requested value). Everything observable is appended to an event log
//! so tests can assert on ordering.
//!
//! The mock also enforces the rules a debug layer would catch: resetting an
//! allocator whose work is in flight, executing an open list, resetting an
//! open list, and waiting on a value that was never signaled are errors.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Duration;

use crate::gpu::{
    CommandAllocator, CommandList, DescriptorHeap, DescriptorHeapFactory, DescriptorKind, Device,
    Fence, FenceValue, FullscreenWindow, MappedPage, PresentSurface, ResourceState, SubmitQueue,
    UploadHeap, WaitStatus, WindowRect,
};
use crate::{BACK_BUFFER_COUNT, FrameError, FrameResult, align, kib};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    AllocatorCreated(usize),
    AllocatorReset(usize),
    ListCreated { list: usize, allocator: usize },
    ListReset { list: usize, allocator: usize },
    ListClosed(usize),
    Executed { list: usize, allocator: usize },
    Signaled(FenceValue),
    Waited(FenceValue),
    WaitTimedOut(FenceValue),
    Transition {
        resource: usize,
        before: ResourceState,
        after: ResourceState,
    },
    Present { sync_interval: u32, allow_tearing: bool },
    BackBufferAcquired { index: usize, resource: usize },
    BackBufferReleased { index: usize, resource: usize },
    ResizeBuffers { count: usize, width: u32, height: u32 },
    PageCreated { size: usize, gpu_address: u64 },
    PageUnmapped { gpu_address: u64 },
    HeapCreated { kind: DescriptorKind, count: u32 },
    WindowBorderless,
    WindowRestored(WindowRect),
}

struct MockState {
    events: Vec<MockEvent>,
    next_id: usize,
    completed: FenceValue,
    last_signaled: FenceValue,
    stalled: bool,
    /// allocator id -> fence value of the last signal after it was executed
    in_flight: HashMap<usize, FenceValue>,
    /// allocators executed since the last signal
    unsignaled: Vec<usize>,
    next_gpu_address: u64,
    next_heap_start: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
            completed: 0,
            last_signaled: 0,
            stalled: false,
            in_flight: HashMap::new(),
            unsignaled: Vec::new(),
            next_gpu_address: 0x1000_0000,
            next_heap_start: 0x10_0000,
        }
    }
}

/// Cheap to clone; clones share one timeline and one event log.
#[derive(Clone, Default)]
pub struct MockGpu {
    state: Rc<RefCell<MockState>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every signaled value up to `value` as complete.
    pub fn complete_up_to(&self, value: FenceValue) {
        let mut state = self.state.borrow_mut();
        let value = value.min(state.last_signaled);
        state.completed = state.completed.max(value);
    }

    pub fn complete_all(&self) {
        let mut state = self.state.borrow_mut();
        state.completed = state.last_signaled;
    }

    /// A stalled GPU makes no progress on waits: bounded waits time out and
    /// unbounded waits fail.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    pub fn completed_value(&self) -> FenceValue {
        self.state.borrow().completed
    }

    pub fn last_signaled(&self) -> FenceValue {
        self.state.borrow().last_signaled
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// A three-buffer 1280x720 surface.
    pub fn create_surface(&self) -> MockSurface {
        MockSurface {
            gpu: self.clone(),
            index: 0,
            buffer_count: BACK_BUFFER_COUNT,
            width: 1280,
            height: 720,
        }
    }

    /// A window on a 1920x1080 monitor.
    pub fn create_window(&self, rect: WindowRect) -> MockWindow {
        MockWindow {
            gpu: self.clone(),
            rect,
            monitor: WindowRect {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080,
            },
            borderless: false,
        }
    }

    fn log(&self, event: MockEvent) {
        self.state.borrow_mut().events.push(event);
    }

    fn next_id(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        id
    }
}

pub struct MockFence {
    gpu: MockGpu,
}

impl Fence for MockFence {
    fn completed_value(&self) -> FenceValue {
        self.gpu.completed_value()
    }

    fn wait_for_value(&self, value: FenceValue, timeout: Option<Duration>) -> FrameResult<WaitStatus> {
        let mut state = self.gpu.state.borrow_mut();
        if state.completed >= value {
            return Ok(WaitStatus::Complete);
        }
        if value > state.last_signaled {
            return Err(FrameError::device(format!(
                "waiting for fence value {value} which was never signaled"
            )));
        }

        if state.stalled {
            return match timeout {
                Some(_) => {
                    state.events.push(MockEvent::WaitTimedOut(value));
                    Ok(WaitStatus::TimedOut)
                }
                None => Err(FrameError::device(format!(
                    "unbounded wait for fence value {value} on a stalled GPU"
                ))),
            };
        }

        state.completed = value;
        state.events.push(MockEvent::Waited(value));
        Ok(WaitStatus::Complete)
    }
}

pub struct MockAllocator {
    id: usize,
    gpu: MockGpu,
}

impl MockAllocator {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl CommandAllocator for MockAllocator {
    fn reset(&mut self) -> FrameResult<()> {
        let mut state = self.gpu.state.borrow_mut();
        if let Some(&value) = state.in_flight.get(&self.id) {
            if value > state.completed {
                return Err(FrameError::device(format!(
                    "allocator {} reset while fence value {value} is in flight",
                    self.id
                )));
            }
            state.in_flight.remove(&self.id);
        }
        if state.unsignaled.contains(&self.id) {
            return Err(FrameError::device(format!(
                "allocator {} reset before its work was signaled",
                self.id
            )));
        }
        state.events.push(MockEvent::AllocatorReset(self.id));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockResource {
    id: usize,
}

impl MockResource {
    pub fn id(&self) -> usize {
        self.id
    }
}

pub struct MockList {
    id: usize,
    allocator_id: usize,
    open: bool,
    gpu: MockGpu,
}

impl MockList {
    pub fn id(&self) -> usize {
        self.id
    }

    /// The allocator the list was last reset against.
    pub fn allocator_id(&self) -> usize {
        self.allocator_id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl CommandList for MockList {
    type Allocator = MockAllocator;
    type Resource = MockResource;

    fn reset(&mut self, allocator: &MockAllocator) -> FrameResult<()> {
        if self.open {
            return Err(FrameError::device(format!("list {} reset while open", self.id)));
        }
        self.allocator_id = allocator.id;
        self.open = true;
        self.gpu.log(MockEvent::ListReset {
            list: self.id,
            allocator: allocator.id,
        });
        Ok(())
    }

    fn close(&mut self) -> FrameResult<()> {
        if !self.open {
            return Err(FrameError::device(format!("list {} closed twice", self.id)));
        }
        self.open = false;
        self.gpu.log(MockEvent::ListClosed(self.id));
        Ok(())
    }

    fn transition(&mut self, resource: &MockResource, before: ResourceState, after: ResourceState) {
        debug_assert!(self.open, "recording into a closed list");
        self.gpu.log(MockEvent::Transition {
            resource: resource.id,
            before,
            after,
        });
    }
}

pub struct MockQueue {
    gpu: MockGpu,
    executed: Cell<usize>,
}

impl MockQueue {
    /// Lists submitted through this queue.
    pub fn executed_count(&self) -> usize {
        self.executed.get()
    }
}

impl SubmitQueue for MockQueue {
    type Fence = MockFence;
    type List = MockList;

    fn execute(&self, list: &MockList) -> FrameResult<()> {
        if list.open {
            return Err(FrameError::device(format!("list {} executed while open", list.id)));
        }

        let mut state = self.gpu.state.borrow_mut();
        state.unsignaled.push(list.allocator_id);
        state.events.push(MockEvent::Executed {
            list: list.id,
            allocator: list.allocator_id,
        });
        self.executed.set(self.executed.get() + 1);
        Ok(())
    }

    fn signal(&self, _fence: &MockFence, value: FenceValue) -> FrameResult<()> {
        let mut state = self.gpu.state.borrow_mut();
        if value <= state.last_signaled {
            return Err(FrameError::device(format!(
                "fence value {value} signaled after {}",
                state.last_signaled
            )));
        }

        state.last_signaled = value;
        for allocator in std::mem::take(&mut state.unsignaled) {
            state.in_flight.insert(allocator, value);
        }
        state.events.push(MockEvent::Signaled(value));
        Ok(())
    }
}

impl Device for MockGpu {
    type Resource = MockResource;
    type Fence = MockFence;
    type Allocator = MockAllocator;
    type List = MockList;
    type Queue = MockQueue;

    fn create_command_queue(&self) -> FrameResult<MockQueue> {
        Ok(MockQueue {
            gpu: self.clone(),
            executed: Cell::new(0),
        })
    }

    fn create_fence(&self, initial_value: FenceValue) -> FrameResult<MockFence> {
        let mut state = self.state.borrow_mut();
        state.completed = state.completed.max(initial_value);
        state.last_signaled = state.last_signaled.max(initial_value);
        Ok(MockFence { gpu: self.clone() })
    }

    fn create_command_allocator(&self) -> FrameResult<MockAllocator> {
        let id = self.next_id();
        self.log(MockEvent::AllocatorCreated(id));
        Ok(MockAllocator {
            id,
            gpu: self.clone(),
        })
    }

    fn create_command_list(&self, allocator: &MockAllocator) -> FrameResult<MockList> {
        let id = self.next_id();
        self.log(MockEvent::ListCreated {
            list: id,
            allocator: allocator.id,
        });
        Ok(MockList {
            id,
            allocator_id: allocator.id,
            open: true,
            gpu: self.clone(),
        })
    }
}

/// Host memory standing in for a mapped upload resource.
pub struct MockPage {
    ptr: NonNull<u8>,
    size: usize,
    gpu_address: u64,
    gpu: MockGpu,
}

impl MappedPage for MockPage {
    fn cpu_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MockPage {
    fn drop(&mut self) {
        // SAFETY: ptr and size come from the boxed slice leaked in
        // `create_upload_page`, and this is the only place it is freed.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.size,
            )));
        }
        self.gpu.log(MockEvent::PageUnmapped {
            gpu_address: self.gpu_address,
        });
    }
}

impl UploadHeap for MockGpu {
    type Page = MockPage;

    fn create_upload_page(&self, size: usize) -> FrameResult<MockPage> {
        let memory: &mut [u8] = Box::leak(vec![0u8; size].into_boxed_slice());
        let ptr = NonNull::from(memory).cast::<u8>();

        let gpu_address = {
            let mut state = self.state.borrow_mut();
            let address = state.next_gpu_address;
            state.next_gpu_address += align(size.max(1), kib(64)) as u64;
            address
        };
        self.log(MockEvent::PageCreated { size, gpu_address });

        Ok(MockPage {
            ptr,
            size,
            gpu_address,
            gpu: self.clone(),
        })
    }
}

pub struct MockHeap {
    cpu_start: usize,
}

impl DescriptorHeap for MockHeap {
    fn cpu_start(&self) -> usize {
        self.cpu_start
    }

    fn increment_size(&self) -> usize {
        32
    }
}

impl DescriptorHeapFactory for MockGpu {
    type Heap = MockHeap;

    fn create_descriptor_heap(&self, kind: DescriptorKind, count: u32) -> FrameResult<MockHeap> {
        let cpu_start = {
            let mut state = self.state.borrow_mut();
            let start = state.next_heap_start;
            state.next_heap_start += 0x10_0000;
            start
        };
        self.log(MockEvent::HeapCreated { kind, count });
        Ok(MockHeap { cpu_start })
    }
}

pub struct MockBackBuffer {
    index: usize,
    resource: MockResource,
    gpu: MockGpu,
}

impl MockBackBuffer {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn resource_id(&self) -> usize {
        self.resource.id
    }
}

impl AsRef<MockResource> for MockBackBuffer {
    fn as_ref(&self) -> &MockResource {
        &self.resource
    }
}

impl Drop for MockBackBuffer {
    fn drop(&mut self) {
        self.gpu.log(MockEvent::BackBufferReleased {
            index: self.index,
            resource: self.resource.id,
        });
    }
}

/// Presentation engine that rotates through its buffers in order.
pub struct MockSurface {
    gpu: MockGpu,
    index: usize,
    buffer_count: usize,
    width: u32,
    height: u32,
}

impl MockSurface {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl PresentSurface for MockSurface {
    type BackBuffer = MockBackBuffer;

    fn current_back_buffer_index(&self) -> usize {
        self.index
    }

    fn back_buffer(&mut self, index: usize) -> FrameResult<MockBackBuffer> {
        if index >= self.buffer_count {
            return Err(FrameError::MissingBackBuffer(index));
        }
        let resource = MockResource {
            id: self.gpu.next_id(),
        };
        self.gpu.log(MockEvent::BackBufferAcquired {
            index,
            resource: resource.id,
        });
        Ok(MockBackBuffer {
            index,
            resource,
            gpu: self.gpu.clone(),
        })
    }

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> FrameResult<()> {
        self.gpu.log(MockEvent::Present {
            sync_interval,
            allow_tearing,
        });
        self.index = (self.index + 1) % self.buffer_count;
        Ok(())
    }

    fn resize_buffers(&mut self, buffer_count: usize, width: u32, height: u32) -> FrameResult<()> {
        self.gpu.log(MockEvent::ResizeBuffers {
            count: buffer_count,
            width,
            height,
        });
        self.buffer_count = buffer_count;
        self.width = width;
        self.height = height;
        self.index = 0;
        Ok(())
    }
}

pub struct MockWindow {
    gpu: MockGpu,
    rect: WindowRect,
    monitor: WindowRect,
    borderless: bool,
}

impl MockWindow {
    pub fn rect(&self) -> WindowRect {
        self.rect
    }

    pub fn is_borderless(&self) -> bool {
        self.borderless
    }
}

impl FullscreenWindow for MockWindow {
    fn window_rect(&self) -> FrameResult<WindowRect> {
        Ok(self.rect)
    }

    fn enter_borderless(&mut self) -> FrameResult<()> {
        self.rect = self.monitor;
        self.borderless = true;
        self.gpu.log(MockEvent::WindowBorderless);
        Ok(())
    }

    fn restore_windowed(&mut self, rect: WindowRect) -> FrameResult<()> {
        self.rect = rect;
        self.borderless = false;
        self.gpu.log(MockEvent::WindowRestored(rect));
        Ok(())
    }
}
