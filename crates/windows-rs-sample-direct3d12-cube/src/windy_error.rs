use d3d12_frame_core::FrameError;

pub type SampleResult<T, E = SampleReport> = core::result::Result<T, E>;

/// Error type of the sample binary: an `eyre::Report` that the Windows and
/// frame-core error types convert into with `?`.
pub struct SampleReport {
    inner: eyre::Report,
}

impl From<eyre::Report> for SampleReport {
    fn from(report: eyre::Report) -> Self {
        Self { inner: report }
    }
}

impl From<FrameError> for SampleReport {
    fn from(error: FrameError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl std::fmt::Display for SampleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::fmt::Debug for SampleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for SampleReport {
    fn from(error: windows::core::Error) -> Self {
        Self {
            inner: eyre::Report::new(WrappedWindowsError::from(error)),
        }
    }
}

/// `windows::core::Error` with a one-line `Debug`, so reports stay readable.
#[cfg(windows)]
pub struct WrappedWindowsError {
    inner: windows::core::Error,
}

#[cfg(windows)]
impl From<windows::core::Error> for WrappedWindowsError {
    fn from(error: windows::core::Error) -> Self {
        Self { inner: error }
    }
}

#[cfg(windows)]
impl std::error::Error for WrappedWindowsError {}

#[cfg(windows)]
impl std::fmt::Display for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[cfg(windows)]
impl std::fmt::Debug for WrappedWindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_keeps_message() {
        let report = SampleReport::from(FrameError::AllocationTooLarge {
            requested: 3_000_000,
            page_size: 2_097_152,
        });
        assert!(report.to_string().contains("3000000 bytes"));
    }
}
