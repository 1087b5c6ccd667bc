use std::ptr::NonNull;

use tracing::trace;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC};

use super::device::D3d12Device;
use crate::gpu::{MappedPage, UploadHeap};
use crate::{FrameError, FrameResult};

/// A committed upload-heap buffer, mapped for its whole lifetime.
pub struct D3d12UploadPage {
    resource: ID3D12Resource,
    cpu_ptr: NonNull<u8>,
    gpu_address: u64,
    size: usize,
}

impl D3d12UploadPage {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl MappedPage for D3d12UploadPage {
    fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu_ptr
    }

    fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for D3d12UploadPage {
    fn drop(&mut self) {
        unsafe { self.resource.Unmap(0, None) };
        trace!("Unmapped upload page at {:#x}", self.gpu_address);
    }
}

impl UploadHeap for D3d12Device {
    type Page = D3d12UploadPage;

    fn create_upload_page(&self, size: usize) -> FrameResult<D3d12UploadPage> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size as u64,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.raw().CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )?
        };
        let resource = resource.ok_or_else(|| FrameError::device("CreateCommittedResource returned no resource"))?;

        // The CPU never reads upload pages.
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        let mut data_ptr = std::ptr::null_mut();
        unsafe { resource.Map(0, Some(&read_range), Some(&mut data_ptr))? };
        let cpu_ptr = NonNull::new(data_ptr.cast::<u8>())
            .ok_or_else(|| FrameError::device("Map returned a null pointer"))?;
        let gpu_address = unsafe { resource.GetGPUVirtualAddress() };

        Ok(D3d12UploadPage {
            resource,
            cpu_ptr,
            gpu_address,
            size,
        })
    }
}
