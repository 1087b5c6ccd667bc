use std::time::{Duration, Instant};

use bevy_math::{Mat4, Vec3};
use tracing::info;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIFactory4;

use d3d12_frame_core::BACK_BUFFER_COUNT;
use d3d12_frame_core::command_queue::CommandQueue;
use d3d12_frame_core::config::{DEFAULT_DESCRIPTORS_PER_HEAP, FrameConfig};
use d3d12_frame_core::d3d12::{D3d12Device, D3d12SwapChain, Win32Window};
use d3d12_frame_core::descriptor_allocator::{DescriptorAllocation, DescriptorAllocator};
use d3d12_frame_core::gpu::DescriptorKind;
use d3d12_frame_core::swap_chain::FrameManager;
use d3d12_frame_core::upload_buffer::{Allocation, UploadBuffer};

use crate::pipeline::{DEPTH_FORMAT, Pipeline};
use crate::windy_error::SampleResult;

const CLEAR_COLOR: [f32; 4] = [0.4, 0.6, 0.9, 1.0];

#[repr(C)]
#[derive(Clone, Copy)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

const fn vertex(position: [f32; 3], rgb: [f32; 3]) -> Vertex {
    Vertex {
        position,
        color: [rgb[0], rgb[1], rgb[2], 1.0],
    }
}

const VERTICES: [Vertex; 8] = [
    vertex([-1.0, -1.0, -1.0], [0.0, 0.0, 0.0]),
    vertex([-1.0, 1.0, -1.0], [0.0, 1.0, 0.0]),
    vertex([1.0, 1.0, -1.0], [1.0, 1.0, 0.0]),
    vertex([1.0, -1.0, -1.0], [1.0, 0.0, 0.0]),
    vertex([-1.0, -1.0, 1.0], [0.0, 0.0, 1.0]),
    vertex([-1.0, 1.0, 1.0], [0.0, 1.0, 1.0]),
    vertex([1.0, 1.0, 1.0], [1.0, 1.0, 1.0]),
    vertex([1.0, -1.0, 1.0], [1.0, 0.0, 1.0]),
];

#[rustfmt::skip]
const INDICES: [u16; 36] = [
    0, 1, 2, 0, 2, 3,
    4, 6, 5, 4, 7, 6,
    4, 5, 1, 4, 1, 0,
    3, 2, 6, 3, 6, 7,
    1, 5, 6, 1, 6, 2,
    4, 0, 3, 4, 3, 7,
];

/// Static cube geometry. The allocations keep their upload page mapped.
struct Geometry {
    _vertices: Allocation,
    _indices: Allocation,
    vbv: D3D12_VERTEX_BUFFER_VIEW,
    ibv: D3D12_INDEX_BUFFER_VIEW,
}

impl Geometry {
    fn new(upload: &mut UploadBuffer<D3d12Device>) -> SampleResult<Self> {
        let vertices = upload.allocate_default(std::mem::size_of_val(&VERTICES))?;
        vertices.write(&VERTICES)?;
        let indices = upload.allocate_default(std::mem::size_of_val(&INDICES))?;
        indices.write(&INDICES)?;

        let vbv = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: vertices.gpu_address(),
            StrideInBytes: std::mem::size_of::<Vertex>() as u32,
            SizeInBytes: vertices.size() as u32,
        };
        let ibv = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: indices.gpu_address(),
            SizeInBytes: indices.size() as u32,
            Format: DXGI_FORMAT_R16_UINT,
        };

        Ok(Self {
            _vertices: vertices,
            _indices: indices,
            vbv,
            ibv,
        })
    }
}

struct DepthBuffer {
    _resource: ID3D12Resource,
    dsv: DescriptorAllocation,
}

impl DepthBuffer {
    fn new(
        device: &D3d12Device,
        allocator: &DescriptorAllocator<D3d12Device>,
        (width, height): (u32, u32),
    ) -> SampleResult<Self> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: width as u64,
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DEPTH_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
        };
        let clear_value = D3D12_CLEAR_VALUE {
            Format: DEPTH_FORMAT,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: 1.0,
                    Stencil: 0,
                },
            },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            device.raw().CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_DEPTH_WRITE,
                Some(&clear_value),
                &mut resource,
            )?
        };
        let resource = resource.ok_or_else(|| eyre::eyre!("CreateCommittedResource returned no depth buffer"))?;

        let dsv = allocator.allocate(1)?;
        unsafe {
            device.raw().CreateDepthStencilView(
                &resource,
                None,
                D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: dsv.cpu_handle(0),
                },
            )
        };

        Ok(Self {
            _resource: resource,
            dsv,
        })
    }

    fn dsv(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.dsv.cpu_handle(0),
        }
    }
}

struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.since.elapsed();
        if elapsed >= Duration::from_secs(1) {
            info!("FPS: {:.1}", self.frames as f64 / elapsed.as_secs_f64());
            self.frames = 0;
            self.since = Instant::now();
        }
    }
}

/// A vertex-coloured cube spinning about (0, 1, 1).
pub struct CubeSample {
    queue: CommandQueue<D3d12Device>,
    frames: FrameManager<D3d12SwapChain>,
    window: Win32Window,
    pipeline: Pipeline,
    geometry: Geometry,
    /// One per back buffer; reset when its slot comes around again.
    frame_uploads: [UploadBuffer<D3d12Device>; BACK_BUFFER_COUNT],
    dsv_allocator: DescriptorAllocator<D3d12Device>,
    depth: DepthBuffer,
    started: Instant,
    fps: FpsCounter,
}

impl CubeSample {
    pub fn new(
        dxgi_factory: &IDXGIFactory4,
        device: D3d12Device,
        hwnd: HWND,
        window_size: (u32, u32),
        config: &FrameConfig,
    ) -> SampleResult<Self> {
        let queue = CommandQueue::new(&device)?;
        let swap_chain = D3d12SwapChain::new(
            dxgi_factory,
            &device,
            queue.handle(),
            hwnd,
            window_size,
            config.tearing_supported,
        )?;
        let frames = FrameManager::new(swap_chain, window_size.0, window_size.1, config)?;

        let pipeline = Pipeline::new(device.raw())?;
        let mut static_upload = UploadBuffer::from_config(device.clone(), config);
        let geometry = Geometry::new(&mut static_upload)?;
        let frame_uploads =
            array_init::array_init(|_| UploadBuffer::from_config(device.clone(), config));

        let dsv_allocator =
            DescriptorAllocator::new(device.clone(), DescriptorKind::Dsv, DEFAULT_DESCRIPTORS_PER_HEAP);
        let depth = DepthBuffer::new(&device, &dsv_allocator, frames.size())?;

        Ok(Self {
            queue,
            frames,
            window: Win32Window::new(hwnd),
            pipeline,
            geometry,
            frame_uploads,
            dsv_allocator,
            depth,
            started: Instant::now(),
            fps: FpsCounter {
                frames: 0,
                since: Instant::now(),
            },
        })
    }

    fn model_view_projection(&self) -> Mat4 {
        let (width, height) = self.frames.size();
        let angle = self.started.elapsed().as_secs_f32() * 90f32.to_radians();

        let model = Mat4::from_axis_angle(Vec3::new(0.0, 1.0, 1.0).normalize(), angle);
        let view = Mat4::look_at_lh(Vec3::new(0.0, 0.0, -10.0), Vec3::ZERO, Vec3::Y);
        let projection =
            Mat4::perspective_lh(45f32.to_radians(), width as f32 / height as f32, 0.1, 100.0);
        projection * view * model
    }

    pub fn render(&mut self) -> SampleResult<()> {
        let mvp = self.model_view_projection().to_cols_array();
        let (width, height) = self.frames.size();
        let viewport = D3D12_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: width as f32,
            Height: height as f32,
            MinDepth: D3D12_MIN_DEPTH,
            MaxDepth: D3D12_MAX_DEPTH,
        };
        let scissor_rect = RECT {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        };

        let Self {
            queue,
            frames,
            pipeline,
            geometry,
            frame_uploads,
            depth,
            ..
        } = self;

        frames.render_frame(queue, |list, back_buffer, index| {
            let upload = &mut frame_uploads[index];
            // The slot's previous frame has completed by the time it is handed out.
            upload.reset();
            let constants = upload.allocate_default(std::mem::size_of_val(&mvp))?;
            constants.write(&mvp)?;

            let list = list.raw();
            let rtv = back_buffer.rtv();
            let dsv = depth.dsv();
            unsafe {
                list.SetPipelineState(&pipeline.pso);
                list.SetGraphicsRootSignature(&pipeline.root_signature);
                list.SetGraphicsRootConstantBufferView(0, constants.gpu_address());
                list.RSSetViewports(&[viewport]);
                list.RSSetScissorRects(&[scissor_rect]);
                list.OMSetRenderTargets(1, Some(&rtv), false, Some(&dsv));

                list.ClearRenderTargetView(rtv, &CLEAR_COLOR, None);
                list.ClearDepthStencilView(dsv, D3D12_CLEAR_FLAG_DEPTH, 1.0, 0, None);

                list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
                list.IASetVertexBuffers(0, Some(&[geometry.vbv]));
                list.IASetIndexBuffer(Some(&geometry.ibv));
                list.DrawIndexedInstanced(INDICES.len() as u32, 1, 0, 0, 0);
            }
            Ok(())
        })?;

        self.fps.tick();
        Ok(())
    }

    /// Resizes the swap chain and recreates the depth buffer to match.
    pub fn resize(&mut self, width: u32, height: u32) -> SampleResult<()> {
        if !self.frames.resize(&mut self.queue, width, height)? {
            return Ok(());
        }

        self.dsv_allocator.set_current_frame(self.queue.last_signaled());
        self.depth = DepthBuffer::new(self.queue.device(), &self.dsv_allocator, self.frames.size())?;
        self.dsv_allocator
            .release_stale_descriptors(self.queue.completed_value());
        Ok(())
    }

    pub fn toggle_fullscreen(&mut self) -> SampleResult<()> {
        self.frames.toggle_fullscreen(&mut self.window)?;
        Ok(())
    }

    pub fn toggle_vsync(&mut self) {
        let vsync = self.frames.toggle_vsync();
        info!("VSync {}", if vsync { "on" } else { "off" });
    }

    /// Waits for the GPU before anything is released.
    pub fn shutdown(&mut self) -> SampleResult<()> {
        self.frames.shutdown(&mut self.queue)?;
        Ok(())
    }
}
