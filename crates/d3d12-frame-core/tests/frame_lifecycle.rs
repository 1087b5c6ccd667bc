//! End-to-end frame loop tests against the simulated GPU.

use d3d12_frame_core::command_queue::CommandQueue;
use d3d12_frame_core::config::FrameConfig;
use d3d12_frame_core::descriptor_allocator::DescriptorAllocator;
use d3d12_frame_core::gpu::{DescriptorKind, WindowRect};
use d3d12_frame_core::mock::{MockEvent, MockGpu, MockSurface};
use d3d12_frame_core::swap_chain::FrameManager;
use d3d12_frame_core::upload_buffer::UploadBuffer;
use d3d12_frame_core::{BACK_BUFFER_COUNT, FrameError, mib};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn setup() -> (MockGpu, CommandQueue<MockGpu>, FrameManager<MockSurface>) {
    init_logging();
    let gpu = MockGpu::new();
    let queue = CommandQueue::new(&gpu).unwrap();
    let frames = FrameManager::new(gpu.create_surface(), 1280, 720, &FrameConfig::default()).unwrap();
    gpu.clear_events();
    (gpu, queue, frames)
}

fn position(events: &[MockEvent], event: &MockEvent) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("{event:?} not in {events:?}"))
}

#[test]
fn test_five_frames_throttle_on_slot_reuse() {
    let (gpu, mut queue, mut frames) = setup();

    let mut values = Vec::new();
    for frame in 1..=5u64 {
        let value = frames
            .render_frame(&mut queue, |_list, _back_buffer, index| {
                assert_eq!(index, ((frame - 1) as usize) % BACK_BUFFER_COUNT);
                if frame == 4 {
                    // Slot 0 is reused: frame 1's work must be known complete.
                    assert!(gpu.events().contains(&MockEvent::Waited(1)));
                    assert!(gpu.completed_value() >= 1);
                }
                if frame <= 3 {
                    assert!(!gpu.events().iter().any(|e| matches!(e, MockEvent::Waited(_))));
                }
                Ok(())
            })
            .unwrap();
        values.push(value);
    }

    assert_eq!(values, vec![1, 2, 3, 4, 5]);
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(frames.frame_count(), 5);

    // Three frames in flight at most: the allocator pool tops out at three.
    assert_eq!(queue.allocator_pool().created(), 3);
    assert_eq!(queue.list_pool().created(), 1);

    let events = gpu.events();
    assert!(position(&events, &MockEvent::Signaled(3)) < position(&events, &MockEvent::Waited(1)));
    assert!(position(&events, &MockEvent::Waited(1)) < position(&events, &MockEvent::Signaled(4)));
}

#[test]
fn test_oversized_upload_leaves_pool_untouched() {
    init_logging();
    let gpu = MockGpu::new();
    let mut upload = UploadBuffer::new(gpu.clone(), mib(2));

    upload.allocate_default(1024).unwrap();
    gpu.clear_events();

    let err = upload.allocate(3_000_000, 256).unwrap_err();
    assert!(matches!(
        err,
        FrameError::AllocationTooLarge {
            requested: 3_000_000,
            page_size: 2_097_152,
        }
    ));
    assert!(!err.is_fatal());
    assert_eq!(upload.page_count(), 1);
    assert!(gpu.events().is_empty());

    // The current page keeps its offset.
    let next = upload.allocate_default(256).unwrap();
    assert_eq!(next.gpu_address() % 256, 0);
    assert_eq!(upload.page_count(), 1);
}

#[test]
fn test_per_slot_upload_buffers_recycle_pages() {
    let (gpu, mut queue, mut frames) = setup();
    let mut uploads: Vec<_> = (0..BACK_BUFFER_COUNT)
        .map(|_| UploadBuffer::new(gpu.clone(), mib(2)))
        .collect();
    let mut addresses = vec![Vec::new(); BACK_BUFFER_COUNT];

    for _ in 0..(BACK_BUFFER_COUNT * 3) {
        frames
            .render_frame(&mut queue, |_list, _back_buffer, index| {
                let upload = &mut uploads[index];
                upload.reset();
                let constants = upload.allocate_default(64)?;
                constants.write(&[0.5f32; 16])?;
                addresses[index].push(constants.gpu_address());
                Ok(())
            })
            .unwrap();
    }

    for (slot, upload) in uploads.iter().enumerate() {
        assert_eq!(upload.page_count(), 1, "slot {slot}");
        assert!(addresses[slot].iter().all(|&a| a == addresses[slot][0]));
    }
}

#[test]
fn test_resize_flushes_before_releasing_buffers() {
    let (gpu, mut queue, mut frames) = setup();

    for _ in 0..2 {
        frames.render_frame(&mut queue, |_, _, _| Ok(())).unwrap();
    }
    let current_value = frames
        .frame_fence_value(frames.current_back_buffer_index())
        .unwrap();
    gpu.clear_events();

    assert!(frames.resize(&mut queue, 1920, 1080).unwrap());
    assert_eq!(frames.size(), (1920, 1080));
    assert_eq!(frames.surface().size(), (1920, 1080));

    let events = gpu.events();
    let waited = position(&events, &MockEvent::Waited(3));
    let first_release = events
        .iter()
        .position(|e| matches!(e, MockEvent::BackBufferReleased { .. }))
        .unwrap();
    let resize = position(
        &events,
        &MockEvent::ResizeBuffers {
            count: BACK_BUFFER_COUNT,
            width: 1920,
            height: 1080,
        },
    );
    let first_acquire = events
        .iter()
        .position(|e| matches!(e, MockEvent::BackBufferAcquired { .. }))
        .unwrap();
    assert!(waited < first_release);
    assert!(first_release < resize);
    assert!(resize < first_acquire);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, MockEvent::BackBufferReleased { .. }))
            .count(),
        BACK_BUFFER_COUNT
    );

    for slot in 0..BACK_BUFFER_COUNT {
        assert_eq!(frames.frame_fence_value(slot), Some(current_value));
        assert!(frames.back_buffer(slot).is_some());
    }

    // Rendering continues from the surface's new index.
    let value = frames.render_frame(&mut queue, |_, _, index| {
        assert_eq!(index, 0);
        Ok(())
    });
    assert_eq!(value.unwrap(), 4);
}

#[test]
fn test_resize_to_same_size_is_noop() {
    let (gpu, mut queue, mut frames) = setup();
    frames.render_frame(&mut queue, |_, _, _| Ok(())).unwrap();
    gpu.clear_events();

    assert!(!frames.resize(&mut queue, 1280, 720).unwrap());
    assert!(gpu.events().is_empty());
    assert_eq!(queue.last_signaled(), 1);
}

#[test]
fn test_fullscreen_toggle_does_not_flush() {
    let (gpu, mut queue, mut frames) = setup();
    let windowed = WindowRect {
        left: 320,
        top: 180,
        right: 1600,
        bottom: 900,
    };
    let mut window = gpu.create_window(windowed);

    frames.render_frame(&mut queue, |_, _, _| Ok(())).unwrap();
    let in_flight = queue.last_signaled();
    gpu.clear_events();

    frames.set_fullscreen(&mut window, true).unwrap();
    frames.set_fullscreen(&mut window, true).unwrap();
    assert!(window.is_borderless());
    frames.set_fullscreen(&mut window, false).unwrap();

    assert_eq!(window.rect(), windowed);
    assert_eq!(queue.last_signaled(), in_flight);
    assert!(!queue.is_fence_complete(in_flight));
    assert_eq!(
        gpu.events(),
        vec![MockEvent::WindowBorderless, MockEvent::WindowRestored(windowed)]
    );
}

#[test]
fn test_stalled_gpu_surfaces_error_instead_of_hanging() {
    let (gpu, mut queue, mut frames) = setup();
    gpu.set_stalled(true);

    for _ in 0..(BACK_BUFFER_COUNT - 1) {
        frames.render_frame(&mut queue, |_, _, _| Ok(())).unwrap();
    }
    // Presenting the third frame has to wait on the first.
    let err = frames
        .render_frame(&mut queue, |_, _, _| Ok(()))
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_descriptors_follow_completed_frames() {
    let (gpu, mut queue, mut frames) = setup();
    let rtvs = DescriptorAllocator::new(gpu.clone(), DescriptorKind::Rtv, 4);

    let mut held = Vec::new();
    for _ in 0..BACK_BUFFER_COUNT {
        held.push(rtvs.allocate(1).unwrap());
    }
    let base = held[0].cpu_handle(0);

    // Free everything while frame 1 is being recorded.
    rtvs.set_current_frame(queue.last_signaled() + 1);
    frames
        .render_frame(&mut queue, |_, _, _| {
            held.clear();
            Ok(())
        })
        .unwrap();
    assert_eq!(rtvs.stale_range_count(), BACK_BUFFER_COUNT);

    rtvs.release_stale_descriptors(queue.completed_value());
    assert_eq!(rtvs.stale_range_count(), BACK_BUFFER_COUNT);

    queue.flush().unwrap();
    rtvs.release_stale_descriptors(queue.completed_value());
    assert_eq!(rtvs.stale_range_count(), 0);

    let whole = rtvs.allocate(4).unwrap();
    assert_eq!(whole.cpu_handle(0), base);
    assert_eq!(rtvs.page_count(), 1);
}

#[test]
fn test_shutdown_flushes_everything() {
    let (_gpu, mut queue, mut frames) = setup();
    for _ in 0..4 {
        frames.render_frame(&mut queue, |_, _, _| Ok(())).unwrap();
    }

    let value = frames.shutdown(&mut queue).unwrap();
    assert_eq!(value, 5);
    assert!(queue.is_fence_complete(4));
    assert_eq!(queue.completed_value(), 5);
}
