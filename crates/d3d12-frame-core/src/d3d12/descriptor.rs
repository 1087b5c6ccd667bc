use windows::Win32::Graphics::Direct3D12::*;

use super::device::D3d12Device;
use crate::FrameResult;
use crate::gpu::{DescriptorHeap, DescriptorHeapFactory, DescriptorKind};

/// A non-shader-visible descriptor heap.
pub struct D3d12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    increment: usize,
}

impl D3d12DescriptorHeap {
    pub fn raw(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }
}

impl DescriptorHeap for D3d12DescriptorHeap {
    fn cpu_start(&self) -> usize {
        unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() }.ptr
    }

    fn increment_size(&self) -> usize {
        self.increment
    }
}

fn heap_type(kind: DescriptorKind) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        DescriptorKind::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorKind::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorKind::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorKind::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

impl DescriptorHeapFactory for D3d12Device {
    type Heap = D3d12DescriptorHeap;

    fn create_descriptor_heap(&self, kind: DescriptorKind, count: u32) -> FrameResult<D3d12DescriptorHeap> {
        let heap_type = heap_type(kind);
        let heap: ID3D12DescriptorHeap = unsafe {
            self.raw().CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: count,
                Type: heap_type,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            })?
        };
        let increment = unsafe { self.raw().GetDescriptorHandleIncrementSize(heap_type) } as usize;

        Ok(D3d12DescriptorHeap { heap, increment })
    }
}
