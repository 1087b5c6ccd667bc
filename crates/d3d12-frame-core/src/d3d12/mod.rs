//! Direct3D 12 / DXGI backend.

mod command;
mod descriptor;
mod device;
mod swap_chain;
mod upload;
mod window;

pub use command::{D3d12Allocator, D3d12Fence, D3d12List, D3d12Queue, transition_barrier};
pub use descriptor::D3d12DescriptorHeap;
pub use device::{D3d12Device, check_tearing_support, create_device, get_hardware_adapter};
pub use swap_chain::{BACK_BUFFER_FORMAT, D3d12BackBuffer, D3d12SwapChain};
pub use upload::D3d12UploadPage;
pub use window::Win32Window;
