//! Back buffer ownership, frame pacing and resize.
//!
//! ```text
//! acquire     index = surface.current_back_buffer_index()
//! record      PRESENT -> RENDER_TARGET, scene, RENDER_TARGET -> PRESENT
//! submit      fence value V = execute_command_list(..)
//! present     present(sync_interval, allow_tearing); slot[index] = V
//! throttle    index = surface.current_back_buffer_index()
//!             wait for slot[index]
//! ```
//!
//! The throttle step is what keeps the CPU at most [`BACK_BUFFER_COUNT`]
//! frames ahead: a slot is only recorded into again once the work that last
//! used it has completed.

use tracing::{debug, info};

use crate::command_queue::CommandQueue;
use crate::config::FrameConfig;
use crate::gpu::{CommandList, Device, FenceValue, FullscreenWindow, PresentSurface, ResourceState, WindowRect};
use crate::{BACK_BUFFER_COUNT, FrameError, FrameResult};

pub struct FrameManager<S: PresentSurface> {
    surface: S,
    back_buffers: [Option<S::BackBuffer>; BACK_BUFFER_COUNT],
    /// Fence value of the last frame submitted against each slot.
    frame_fence_values: [FenceValue; BACK_BUFFER_COUNT],
    current_index: usize,
    width: u32,
    height: u32,
    vsync: bool,
    tearing_supported: bool,
    fullscreen: bool,
    saved_window_rect: Option<WindowRect>,
    frame_count: u64,
}

impl<S: PresentSurface> FrameManager<S> {
    /// Takes ownership of `surface` and acquires every back buffer.
    pub fn new(mut surface: S, width: u32, height: u32, config: &FrameConfig) -> FrameResult<Self> {
        let back_buffers = array_init::try_array_init(|index| surface.back_buffer(index).map(Some))?;
        let current_index = surface.current_back_buffer_index();

        info!(
            "Frame manager ready: {BACK_BUFFER_COUNT} back buffers, {width}x{height}, vsync {}, tearing {}",
            config.vsync, config.tearing_supported
        );

        Ok(Self {
            surface,
            back_buffers,
            frame_fence_values: [0; BACK_BUFFER_COUNT],
            current_index,
            width: width.max(1),
            height: height.max(1),
            vsync: config.vsync,
            tearing_supported: config.tearing_supported,
            fullscreen: false,
            saved_window_rect: None,
            frame_count: 0,
        })
    }

    /// Re-queries the current slot and waits until it is free.
    pub fn begin_frame<D: Device>(&mut self, queue: &CommandQueue<D>) -> FrameResult<usize> {
        self.current_index = self.surface.current_back_buffer_index();
        queue.wait_for_fence_value(self.frame_fence_values[self.current_index])?;
        Ok(self.current_index)
    }

    /// Runs one whole frame: acquire, record, submit, present, throttle.
    ///
    /// `record` receives the open command list with the back buffer already
    /// in the render target state, plus the slot index.
    pub fn render_frame<D, R>(&mut self, queue: &mut CommandQueue<D>, record: R) -> FrameResult<FenceValue>
    where
        D: Device,
        S::BackBuffer: AsRef<D::Resource>,
        R: FnOnce(&mut D::List, &S::BackBuffer, usize) -> FrameResult<()>,
    {
        let index = self.begin_frame(queue)?;
        let back_buffer = self.back_buffers[index]
            .as_ref()
            .ok_or(FrameError::MissingBackBuffer(index))?;

        let mut recording = queue.get_command_list()?;
        recording.transition(
            back_buffer.as_ref(),
            ResourceState::Present,
            ResourceState::RenderTarget,
        );
        if let Err(e) = record(recording.list_mut(), back_buffer, index) {
            queue.discard_command_list(recording)?;
            return Err(e);
        }
        recording.transition(
            back_buffer.as_ref(),
            ResourceState::RenderTarget,
            ResourceState::Present,
        );

        let fence_value = queue.execute_command_list(recording)?;
        self.present(queue, fence_value)?;
        Ok(fence_value)
    }

    /// Presents the current slot, records `fence_value` against it and waits
    /// for the slot that comes next.
    pub fn present<D: Device>(&mut self, queue: &CommandQueue<D>, fence_value: FenceValue) -> FrameResult<()> {
        let (sync_interval, allow_tearing) = self.present_flags();
        self.surface.present(sync_interval, allow_tearing)?;

        self.frame_fence_values[self.current_index] = fence_value;
        self.current_index = self.surface.current_back_buffer_index();
        queue.wait_for_fence_value(self.frame_fence_values[self.current_index])?;

        self.frame_count += 1;
        Ok(())
    }

    /// Resizes the back buffers. Returns `false` if the size did not change.
    ///
    /// Flushes the queue first: no back buffer may be referenced by queued
    /// GPU work when it is released.
    pub fn resize<D: Device>(&mut self, queue: &mut CommandQueue<D>, width: u32, height: u32) -> FrameResult<bool> {
        let (width, height) = (width.max(1), height.max(1));
        if width == self.width && height == self.height {
            return Ok(false);
        }

        queue.flush()?;

        for back_buffer in &mut self.back_buffers {
            back_buffer.take();
        }
        let current = self.frame_fence_values[self.current_index];
        self.frame_fence_values = [current; BACK_BUFFER_COUNT];

        self.surface.resize_buffers(BACK_BUFFER_COUNT, width, height)?;
        self.current_index = self.surface.current_back_buffer_index();
        for (index, slot) in self.back_buffers.iter_mut().enumerate() {
            *slot = Some(self.surface.back_buffer(index)?);
        }

        info!(
            "Resized back buffers {}x{} -> {width}x{height}",
            self.width, self.height
        );
        self.width = width;
        self.height = height;
        Ok(true)
    }

    /// Switches between windowed and borderless fullscreen.
    ///
    /// Only touches the window; the resulting size change arrives through the
    /// normal resize path.
    pub fn set_fullscreen<W: FullscreenWindow>(&mut self, window: &mut W, fullscreen: bool) -> FrameResult<()> {
        if self.fullscreen == fullscreen {
            return Ok(());
        }

        if fullscreen {
            self.saved_window_rect = Some(window.window_rect()?);
            window.enter_borderless()?;
        } else {
            let rect = match self.saved_window_rect.take() {
                Some(rect) => rect,
                None => window.window_rect()?,
            };
            window.restore_windowed(rect)?;
        }

        self.fullscreen = fullscreen;
        info!("Fullscreen: {fullscreen}");
        Ok(())
    }

    pub fn toggle_fullscreen<W: FullscreenWindow>(&mut self, window: &mut W) -> FrameResult<()> {
        self.set_fullscreen(window, !self.fullscreen)
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            debug!("VSync: {vsync}");
        }
        self.vsync = vsync;
    }

    /// Returns the new setting.
    pub fn toggle_vsync(&mut self) -> bool {
        self.set_vsync(!self.vsync);
        self.vsync
    }

    /// `(sync_interval, allow_tearing)` for the next present.
    pub fn present_flags(&self) -> (u32, bool) {
        let sync_interval = if self.vsync { 1 } else { 0 };
        (sync_interval, self.tearing_supported && !self.vsync)
    }

    /// Waits for all submitted work. Call before dropping GPU resources.
    pub fn shutdown<D: Device>(&mut self, queue: &mut CommandQueue<D>) -> FrameResult<FenceValue> {
        let fence_value = queue.flush()?;
        info!("Frame manager shut down after {} frames", self.frame_count);
        Ok(fence_value)
    }

    #[inline]
    pub fn current_back_buffer_index(&self) -> usize {
        self.current_index
    }

    pub fn back_buffer(&self, index: usize) -> Option<&S::BackBuffer> {
        self.back_buffers.get(index).and_then(Option::as_ref)
    }

    /// Fence value of the last frame submitted against slot `index`.
    pub fn frame_fence_value(&self, index: usize) -> Option<FenceValue> {
        self.frame_fence_values.get(index).copied()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEvent, MockGpu, MockSurface};

    fn setup(config: &FrameConfig) -> (MockGpu, CommandQueue<MockGpu>, FrameManager<MockSurface>) {
        let gpu = MockGpu::new();
        let queue = CommandQueue::new(&gpu).unwrap();
        let frames = FrameManager::new(gpu.create_surface(), 1280, 720, config).unwrap();
        gpu.clear_events();
        (gpu, queue, frames)
    }

    #[test]
    fn test_present_flags() {
        let (_gpu, _queue, mut frames) = setup(&FrameConfig {
            tearing_supported: true,
            ..FrameConfig::default()
        });
        assert_eq!(frames.present_flags(), (1, false));

        assert!(!frames.toggle_vsync());
        assert_eq!(frames.present_flags(), (0, true));

        let (_gpu, _queue, mut frames) = setup(&FrameConfig::default());
        frames.set_vsync(false);
        assert_eq!(frames.present_flags(), (0, false));
    }

    #[test]
    fn test_render_frame_wraps_scene_in_transitions() {
        let (gpu, mut queue, mut frames) = setup(&FrameConfig::default());

        let value = frames
            .render_frame(&mut queue, |_list, _back_buffer, index| {
                assert_eq!(index, 0);
                Ok(())
            })
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(frames.frame_fence_value(0), Some(1));
        assert_eq!(frames.frame_fence_value(BACK_BUFFER_COUNT), None);
        assert_eq!(frames.current_back_buffer_index(), 1);

        let events = gpu.events();
        let resource = frames.back_buffer(0).unwrap().resource_id();
        let to_rt = MockEvent::Transition {
            resource,
            before: ResourceState::Present,
            after: ResourceState::RenderTarget,
        };
        let to_present = MockEvent::Transition {
            resource,
            before: ResourceState::RenderTarget,
            after: ResourceState::Present,
        };
        let position = |event: &MockEvent| events.iter().position(|e| e == event).unwrap();
        assert!(position(&to_rt) < position(&to_present));
        assert!(
            position(&to_present)
                < position(&MockEvent::Present {
                    sync_interval: 1,
                    allow_tearing: false,
                })
        );
    }

    #[test]
    fn test_record_error_is_surfaced() {
        let (_gpu, mut queue, mut frames) = setup(&FrameConfig::default());

        let result = frames.render_frame(&mut queue, |_, _, _| Err(FrameError::device("lost")));
        assert!(matches!(result, Err(FrameError::Device { .. })));
        assert_eq!(frames.frame_count(), 0);
    }

    #[test]
    fn test_failed_recordings_do_not_leak_pool_entries() {
        let (_gpu, mut queue, mut frames) = setup(&FrameConfig::default());

        for _ in 0..3 {
            let result = frames.render_frame(&mut queue, |_, _, _| {
                Err(FrameError::AllocationTooLarge {
                    requested: 3_000_000,
                    page_size: 2 * 1024 * 1024,
                })
            });
            assert!(matches!(result, Err(FrameError::AllocationTooLarge { .. })));
        }
        frames.render_frame(&mut queue, |_, _, _| Ok(())).unwrap();

        assert_eq!(queue.allocator_pool().created(), 1);
        assert_eq!(queue.list_pool().created(), 1);
        assert_eq!(queue.list_pool().len(), 1);
        assert_eq!(queue.last_signaled(), 1);
        assert_eq!(frames.frame_count(), 1);
    }

    #[test]
    fn test_resize_unchanged_is_noop() {
        let (gpu, mut queue, mut frames) = setup(&FrameConfig::default());

        assert!(!frames.resize(&mut queue, 1280, 720).unwrap());
        assert!(gpu.events().is_empty());
        assert_eq!(queue.last_signaled(), 0);
    }

    #[test]
    fn test_resize_clamps_to_one() {
        let (gpu, mut queue, mut frames) = setup(&FrameConfig::default());

        assert!(frames.resize(&mut queue, 0, 0).unwrap());
        assert_eq!(frames.size(), (1, 1));
        assert!(gpu.events().contains(&MockEvent::ResizeBuffers {
            count: BACK_BUFFER_COUNT,
            width: 1,
            height: 1,
        }));

        gpu.clear_events();
        assert!(!frames.resize(&mut queue, 0, 1).unwrap());
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_fullscreen_round_trip_restores_rect() {
        let (gpu, _queue, mut frames) = setup(&FrameConfig::default());
        let rect = WindowRect {
            left: 100,
            top: 50,
            right: 1380,
            bottom: 770,
        };
        let mut window = gpu.create_window(rect);

        frames.toggle_fullscreen(&mut window).unwrap();
        assert!(frames.is_fullscreen());
        assert_ne!(window.rect(), rect);

        frames.toggle_fullscreen(&mut window).unwrap();
        assert!(!frames.is_fullscreen());
        assert_eq!(window.rect(), rect);

        assert!(
            !gpu.events()
                .iter()
                .any(|e| matches!(e, MockEvent::Signaled(_) | MockEvent::Waited(_)))
        );
    }
}
