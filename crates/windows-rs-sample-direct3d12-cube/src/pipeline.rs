use tracing::error;
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::core::{PCSTR, s};

use d3d12_frame_core::d3d12::BACK_BUFFER_FORMAT;

use crate::windy_error::SampleResult;

pub const DEPTH_FORMAT: DXGI_FORMAT = DXGI_FORMAT_D32_FLOAT;

const SHADER_SOURCE: &str = include_str!("shaders.hlsl");

pub struct Pipeline {
    pub root_signature: ID3D12RootSignature,
    pub pso: ID3D12PipelineState,
}

impl Pipeline {
    pub fn new(device: &ID3D12Device) -> SampleResult<Self> {
        let root_signature = create_root_signature(device)?;
        let pso = create_pipeline_state(device, &root_signature)?;
        Ok(Self { root_signature, pso })
    }
}

fn blob_text(blob: &ID3DBlob) -> String {
    unsafe {
        String::from_utf8_lossy(std::slice::from_raw_parts(
            blob.GetBufferPointer() as *const u8,
            blob.GetBufferSize(),
        ))
        .into_owned()
    }
}

/// One root CBV at b0 holding the model-view-projection matrix.
fn create_root_signature(device: &ID3D12Device) -> SampleResult<ID3D12RootSignature> {
    let parameter = D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            Descriptor: D3D12_ROOT_DESCRIPTOR {
                ShaderRegister: 0,
                RegisterSpace: 0,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_VERTEX,
    };

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: 1,
        pParameters: &parameter,
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        ..Default::default()
    };

    let mut signature_blob = None;
    let mut error_blob = None;
    let signature = unsafe {
        D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut signature_blob,
            Some(&mut error_blob),
        )
    };
    if let Err(e) = signature {
        if let Some(error_blob) = error_blob {
            error!("Root Signature Error: {}", blob_text(&error_blob));
        }
        return Err(e.into());
    }
    let signature_blob =
        signature_blob.ok_or_else(|| eyre::eyre!("D3D12SerializeRootSignature returned no blob"))?;

    let root_signature = unsafe {
        device.CreateRootSignature(
            0,
            std::slice::from_raw_parts(
                signature_blob.GetBufferPointer() as *const u8,
                signature_blob.GetBufferSize(),
            ),
        )?
    };
    Ok(root_signature)
}

fn compile_shader(entry_point: PCSTR, target: PCSTR) -> SampleResult<ID3DBlob> {
    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        0
    };

    let mut shader_blob = None;
    let mut error_blob = None;
    let result = unsafe {
        D3DCompile(
            SHADER_SOURCE.as_ptr() as *const _,
            SHADER_SOURCE.len(),
            s!("shaders.hlsl"),
            None,
            None,
            entry_point,
            target,
            flags,
            0,
            &mut shader_blob,
            Some(&mut error_blob),
        )
    };

    if let Err(e) = result {
        if let Some(error_blob) = error_blob {
            let entry_point = unsafe { String::from_utf8_lossy(entry_point.as_bytes()) };
            let target = unsafe { String::from_utf8_lossy(target.as_bytes()) };
            error!(
                "Shader Compile Error ({} {}): {}",
                entry_point,
                target,
                blob_text(&error_blob)
            );
        }
        return Err(e.into());
    }
    Ok(shader_blob.ok_or_else(|| eyre::eyre!("D3DCompile returned no bytecode"))?)
}

fn create_pipeline_state(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
) -> SampleResult<ID3D12PipelineState> {
    let vertex_shader = compile_shader(s!("VSMain"), s!("vs_5_0"))?;
    let pixel_shader = compile_shader(s!("PSMain"), s!("ps_5_0"))?;

    let input_element_descs: [D3D12_INPUT_ELEMENT_DESC; 2] = [
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            ..Default::default()
        },
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: s!("COLOR"),
            Format: DXGI_FORMAT_R32G32B32A32_FLOAT,
            AlignedByteOffset: 12,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            ..Default::default()
        },
    ];

    let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
    rtv_formats[0] = BACK_BUFFER_FORMAT;

    let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: unsafe { vertex_shader.GetBufferPointer() },
            BytecodeLength: unsafe { vertex_shader.GetBufferSize() },
        },
        PS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: unsafe { pixel_shader.GetBufferPointer() },
            BytecodeLength: unsafe { pixel_shader.GetBufferSize() },
        },
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: input_element_descs.as_ptr(),
            NumElements: input_element_descs.len() as u32,
        },
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: D3D12_FILL_MODE_SOLID,
            CullMode: D3D12_CULL_MODE_NONE,
            DepthClipEnable: true.into(),
            ..Default::default()
        },
        BlendState: D3D12_BLEND_DESC {
            AlphaToCoverageEnable: false.into(),
            IndependentBlendEnable: false.into(),
            RenderTarget: [D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: false.into(),
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                ..Default::default()
            }; 8],
        },
        DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: true.into(),
            DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
            DepthFunc: D3D12_COMPARISON_FUNC_LESS,
            StencilEnable: false.into(),
            ..Default::default()
        },
        DSVFormat: DEPTH_FORMAT,
        SampleMask: u32::MAX,
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        NumRenderTargets: 1,
        RTVFormats: rtv_formats,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        ..Default::default()
    };

    let pso = unsafe { device.CreateGraphicsPipelineState(&pso_desc)? };
    Ok(pso)
}
