use tracing::{debug, info, warn};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::Interface;

use super::command::{D3d12Allocator, D3d12Fence, D3d12List, D3d12Queue};
use crate::FrameResult;
use crate::gpu::{Device, FenceValue};

/// Cheap to clone; clones share the COM device.
#[derive(Clone)]
pub struct D3d12Device {
    device: ID3D12Device,
}

impl D3d12Device {
    pub fn new(device: ID3D12Device) -> Self {
        Self { device }
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }
}

/// Creates the DXGI factory and a device on the first hardware adapter (or
/// WARP). Enables the debug layer in debug builds.
pub fn create_device(use_warp_device: bool) -> FrameResult<(IDXGIFactory4, D3d12Device)> {
    let mut debug_flags = DXGI_CREATE_FACTORY_FLAGS(0);
    if cfg!(debug_assertions) {
        unsafe {
            let mut debug: Option<ID3D12Debug> = None;
            if let Some(debug) = D3D12GetDebugInterface(&mut debug).ok().and(debug) {
                debug.EnableDebugLayer();
                debug_flags |= DXGI_CREATE_FACTORY_DEBUG;
                info!("D3D12 Debug Layer Enabled");
            } else {
                warn!("D3D12 Debug Layer unavailable.");
            }
        }
    }

    let dxgi_factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(debug_flags) }?;

    let adapter = if use_warp_device {
        info!("Using WARP adapter.");
        unsafe { dxgi_factory.EnumWarpAdapter()? }
    } else {
        get_hardware_adapter(&dxgi_factory)?
    };

    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }?;
    let device = device.ok_or_else(|| crate::FrameError::device("D3D12CreateDevice returned no device"))?;

    Ok((dxgi_factory, D3d12Device::new(device)))
}

/// First adapter that is not a software adapter and supports feature level
/// 11.0.
pub fn get_hardware_adapter(factory: &IDXGIFactory4) -> FrameResult<IDXGIAdapter1> {
    for i in 0.. {
        let adapter = match unsafe { factory.EnumAdapters1(i) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(e.into()),
        };
        let desc = unsafe { adapter.GetDesc1()? };
        let name = String::from_utf16_lossy(&desc.Description);

        if (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE)
            != DXGI_ADAPTER_FLAG_NONE
        {
            debug!("Skipping software adapter {}", name.trim_end_matches('\0'));
            continue;
        }

        if unsafe {
            D3D12CreateDevice(
                &adapter,
                D3D_FEATURE_LEVEL_11_0,
                std::ptr::null_mut::<Option<ID3D12Device>>(),
            )
        }
        .is_ok()
        {
            info!("Using hardware adapter: {}", name.trim_end_matches('\0'));
            return Ok(adapter);
        }
    }

    Err(crate::FrameError::device("No suitable hardware adapter found."))
}

/// Whether the display path supports `DXGI_PRESENT_ALLOW_TEARING`.
pub fn check_tearing_support(factory: &IDXGIFactory4) -> bool {
    let Ok(factory) = factory.cast::<IDXGIFactory5>() else {
        return false;
    };

    let mut allow_tearing = 0i32;
    let supported = unsafe {
        factory.CheckFeatureSupport(
            DXGI_FEATURE_PRESENT_ALLOW_TEARING,
            &mut allow_tearing as *mut i32 as *mut _,
            std::mem::size_of::<i32>() as u32,
        )
    }
    .is_ok()
        && allow_tearing != 0;

    info!("Tearing supported: {supported}");
    supported
}

impl Device for D3d12Device {
    type Resource = ID3D12Resource;
    type Fence = D3d12Fence;
    type Allocator = D3d12Allocator;
    type List = D3d12List;
    type Queue = D3d12Queue;

    fn create_command_queue(&self) -> FrameResult<D3d12Queue> {
        let queue: ID3D12CommandQueue = unsafe {
            self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })?
        };
        Ok(D3d12Queue::new(queue))
    }

    fn create_fence(&self, initial_value: FenceValue) -> FrameResult<D3d12Fence> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)? };
        D3d12Fence::new(fence)
    }

    fn create_command_allocator(&self) -> FrameResult<D3d12Allocator> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)? };
        Ok(D3d12Allocator::new(allocator))
    }

    fn create_command_list(&self, allocator: &D3d12Allocator) -> FrameResult<D3d12List> {
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                allocator.raw(),
                None::<&ID3D12PipelineState>,
            )?
        };
        Ok(D3d12List::new(list))
    }
}
