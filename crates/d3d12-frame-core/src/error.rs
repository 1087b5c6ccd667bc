//! Frame-core error types.

use thiserror::Error;

/// Errors raised by the frame-lifecycle core.
///
/// Device failures are fatal: they are surfaced, never retried. Capacity
/// failures mean the caller asked for something the configuration cannot
/// hold and can be handled by asking differently.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Device, queue or resource call failed
    #[error("Device error: {message}")]
    Device {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// Upload allocation cannot fit in a single page
    #[error("Allocation of {requested} bytes does not fit in a {page_size} byte upload page")]
    AllocationTooLarge { requested: usize, page_size: usize },

    /// Alignment is not a power of two
    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// Descriptor request larger than a whole heap
    #[error("Requested {requested} descriptors but heaps only hold {per_heap}")]
    DescriptorHeapExhausted { requested: u32, per_heap: u32 },

    /// Back buffer slot is empty (released and not rebuilt)
    #[error("Back buffer {0} is not available")]
    MissingBackBuffer(usize),

    /// Bad configuration or command line
    #[error("Config error: {0}")]
    Config(String),
}

impl FrameError {
    /// Whether this error invalidates the device and all state built on it.
    pub fn is_fatal(&self) -> bool {
        match self {
            FrameError::Device { .. } | FrameError::MissingBackBuffer(_) => true,
            FrameError::AllocationTooLarge { .. }
            | FrameError::InvalidAlignment(_)
            | FrameError::DescriptorHeapExhausted { .. }
            | FrameError::Config(_) => false,
        }
    }

    /// Device error without an underlying OS error.
    pub fn device(message: impl Into<String>) -> Self {
        FrameError::Device {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for FrameError {
    fn from(error: windows::core::Error) -> Self {
        FrameError::Device {
            message: error.message(),
            source: Some(Box::new(error)),
        }
    }
}

/// Result type alias for frame-core operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;
