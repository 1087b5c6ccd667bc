//! Frame configuration and command-line parsing.

use crate::{FrameError, FrameResult, mib};

/// Size of one upload page in bytes.
pub const DEFAULT_UPLOAD_PAGE_SIZE: usize = mib(2);

/// Default upload allocation alignment (constant buffer placement alignment).
pub const DEFAULT_ALIGNMENT: usize = 256;

/// Descriptors in each CPU descriptor heap page.
pub const DEFAULT_DESCRIPTORS_PER_HEAP: u32 = 256;

/// Knobs recognised by the frame core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    pub upload_page_size: usize,
    pub default_alignment: usize,
    pub vsync: bool,
    /// Probed once at startup from DXGI.
    pub tearing_supported: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            upload_page_size: DEFAULT_UPLOAD_PAGE_SIZE,
            default_alignment: DEFAULT_ALIGNMENT,
            vsync: true,
            tearing_supported: false,
        }
    }
}

/// Command line arguments for sample initialization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleCommandLine {
    pub use_warp_device: bool,
    pub disable_vsync: bool,
    pub upload_page_size: Option<usize>,
}

impl SampleCommandLine {
    /// Builds the frame configuration, given the probed tearing support.
    pub fn frame_config(&self, tearing_supported: bool) -> FrameConfig {
        FrameConfig {
            upload_page_size: self.upload_page_size.unwrap_or(DEFAULT_UPLOAD_PAGE_SIZE),
            vsync: !self.disable_vsync,
            tearing_supported,
            ..FrameConfig::default()
        }
    }
}

/// Builds a SampleCommandLine from the process arguments
pub fn build_command_line() -> FrameResult<SampleCommandLine> {
    parse_command_line(std::env::args().skip(1))
}

/// Parses `-warp`, `-novsync` and `-page-size <bytes>`; `/` prefixes work too.
/// Unrecognised arguments are ignored.
pub fn parse_command_line<I, S>(args: I) -> FrameResult<SampleCommandLine>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut command_line = SampleCommandLine::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        let Some(name) = arg.strip_prefix('-').or_else(|| arg.strip_prefix('/')) else {
            continue;
        };

        if name.eq_ignore_ascii_case("warp") {
            command_line.use_warp_device = true;
        } else if name.eq_ignore_ascii_case("novsync") {
            command_line.disable_vsync = true;
        } else if name.eq_ignore_ascii_case("page-size") {
            let value = args
                .next()
                .ok_or_else(|| FrameError::Config("-page-size expects a byte count".into()))?;
            let value = value.as_ref();
            let size = value
                .parse::<usize>()
                .map_err(|e| FrameError::Config(format!("invalid page size {value:?}: {e}")))?;
            if size == 0 {
                return Err(FrameError::Config("page size must be non-zero".into()));
            }
            command_line.upload_page_size = Some(size);
        }
    }

    Ok(command_line)
}
