use tracing::debug;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::Interface;

use super::command::D3d12Queue;
use super::device::D3d12Device;
use crate::config::DEFAULT_DESCRIPTORS_PER_HEAP;
use crate::descriptor_allocator::{DescriptorAllocation, DescriptorAllocator};
use crate::gpu::{DescriptorKind, PresentSurface};
use crate::{BACK_BUFFER_COUNT, FrameResult};

pub const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

/// A swap chain buffer and its render target view.
pub struct D3d12BackBuffer {
    resource: ID3D12Resource,
    rtv: DescriptorAllocation,
}

impl D3d12BackBuffer {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn rtv(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.rtv.cpu_handle(0),
        }
    }
}

impl AsRef<ID3D12Resource> for D3d12BackBuffer {
    fn as_ref(&self) -> &ID3D12Resource {
        &self.resource
    }
}

pub struct D3d12SwapChain {
    swap_chain: IDXGISwapChain3,
    device: D3d12Device,
    rtv_allocator: DescriptorAllocator<D3d12Device>,
    flags: DXGI_SWAP_CHAIN_FLAG,
}

impl D3d12SwapChain {
    /// Creates a flip-model swap chain for `hwnd` with [`BACK_BUFFER_COUNT`]
    /// buffers. Alt+Enter is left to the application.
    pub fn new(
        dxgi_factory: &IDXGIFactory4,
        device: &D3d12Device,
        queue: &D3d12Queue,
        hwnd: HWND,
        (width, height): (u32, u32),
        tearing_supported: bool,
    ) -> FrameResult<Self> {
        let flags = if tearing_supported {
            DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING
        } else {
            DXGI_SWAP_CHAIN_FLAG(0)
        };

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: BACK_BUFFER_COUNT as u32,
            Width: width,
            Height: height,
            Format: BACK_BUFFER_FORMAT,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            Flags: flags.0 as u32,
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain1 =
            unsafe { dxgi_factory.CreateSwapChainForHwnd(queue.raw(), hwnd, &swap_chain_desc, None, None)? };
        let swap_chain: IDXGISwapChain3 = swap_chain.cast()?;

        unsafe { dxgi_factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)? };

        Ok(Self {
            swap_chain,
            device: device.clone(),
            rtv_allocator: DescriptorAllocator::new(
                device.clone(),
                DescriptorKind::Rtv,
                DEFAULT_DESCRIPTORS_PER_HEAP,
            ),
            flags,
        })
    }

    pub fn raw(&self) -> &IDXGISwapChain3 {
        &self.swap_chain
    }
}

impl PresentSurface for D3d12SwapChain {
    type BackBuffer = D3d12BackBuffer;

    fn current_back_buffer_index(&self) -> usize {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() as usize }
    }

    fn back_buffer(&mut self, index: usize) -> FrameResult<D3d12BackBuffer> {
        let resource: ID3D12Resource = unsafe { self.swap_chain.GetBuffer(index as u32)? };
        let rtv = self.rtv_allocator.allocate(1)?;
        unsafe {
            self.device.raw().CreateRenderTargetView(
                &resource,
                None,
                D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: rtv.cpu_handle(0),
                },
            );
        }
        Ok(D3d12BackBuffer { resource, rtv })
    }

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> FrameResult<()> {
        let flags = if allow_tearing {
            DXGI_PRESENT_ALLOW_TEARING
        } else {
            DXGI_PRESENT(0)
        };
        unsafe { self.swap_chain.Present(sync_interval, flags) }.ok()?;
        Ok(())
    }

    fn resize_buffers(&mut self, buffer_count: usize, width: u32, height: u32) -> FrameResult<()> {
        unsafe {
            self.swap_chain.ResizeBuffers(
                buffer_count as u32,
                width,
                height,
                BACK_BUFFER_FORMAT,
                self.flags,
            )?
        };
        // The queue was flushed before the old views were released.
        self.rtv_allocator.release_stale_descriptors(u64::MAX);
        debug!("ResizeBuffers({buffer_count}, {width}, {height})");
        Ok(())
    }
}
