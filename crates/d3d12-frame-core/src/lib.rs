//! Frame-lifecycle core for a Direct3D 12 renderer.
//!
//! This crate owns everything between "record some GPU commands" and "the GPU
//! is done with them":
//! - [`fence::FenceTracker`] - monotonically increasing fence values
//! - [`command_allocator_pool::CommandAllocatorPool`] and
//!   [`command_list_pool::CommandListPool`] - fence-gated recycling
//! - [`command_queue::CommandQueue`] - submission, signalling and flushing
//! - [`upload_buffer::UploadBuffer`] - linear allocator over upload pages
//! - [`swap_chain::FrameManager`] - back buffers, throttling, resize
//! - [`descriptor_allocator::DescriptorAllocator`] - CPU descriptor heaps
//!
//! The GPU is reached through the traits in [`gpu`]. [`d3d12`] implements them
//! with the `windows` crate; `mock` (behind the `mock` feature) implements
//! them with a simulated GPU timeline so the frame logic can be exercised
//! without a device.

mod error;

pub mod command_allocator_pool;
pub mod command_list_pool;
pub mod command_queue;
pub mod config;
#[cfg(windows)]
pub mod d3d12;
pub mod descriptor_allocator;
pub mod fence;
pub mod gpu;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod swap_chain;
pub mod upload_buffer;

pub use error::{FrameError, FrameResult};

/// Number of swap-chain back buffers.
pub const BACK_BUFFER_COUNT: usize = 3;

/// Returns `size` rounded up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
#[inline]
pub const fn align(size: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Kibibytes to bytes.
#[inline]
pub const fn kib(value: usize) -> usize {
    value * 1024
}

/// Mebibytes to bytes.
#[inline]
pub const fn mib(value: usize) -> usize {
    value * 1024 * 1024
}
