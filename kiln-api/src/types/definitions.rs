use super::*;
use crate::{RhiBuffer, RhiRootSignature, RhiShader, RhiTexture};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Used to create a `RhiBuffer`
#[derive(Clone, Debug)]
pub struct RhiBufferDef {
    pub size: u64,
    pub kind: RhiBufferKind,
    pub usage: RhiBufferUsage,
    /// Element format of texture buffers, UNDEFINED otherwise
    pub format: RhiFormat,
}

impl RhiBufferDef {
    pub fn for_dynamic_uniform_buffer(size: u64) -> Self {
        RhiBufferDef {
            size,
            kind: RhiBufferKind::UniformBuffer,
            usage: RhiBufferUsage::Dynamic,
            format: RhiFormat::UNDEFINED,
        }
    }

    pub fn for_dynamic_texture_buffer(
        size: u64,
        format: RhiFormat,
    ) -> Self {
        RhiBufferDef {
            size,
            kind: RhiBufferKind::TextureBuffer,
            usage: RhiBufferUsage::Dynamic,
            format,
        }
    }

    pub fn for_static_buffer(
        size: u64,
        kind: RhiBufferKind,
    ) -> Self {
        RhiBufferDef {
            size,
            kind,
            usage: RhiBufferUsage::Static,
            format: RhiFormat::UNDEFINED,
        }
    }

    pub fn verify(&self) {
        assert_ne!(self.size, 0);
        if self.kind == RhiBufferKind::TextureBuffer {
            assert_ne!(self.format, RhiFormat::UNDEFINED);
        }
    }
}

/// Used to create a `RhiTexture`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RhiTextureDef {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub format: RhiFormat,
}

impl RhiTextureDef {
    pub fn data_size_in_bytes(&self) -> u64 {
        self.format
            .mip_chain_size_in_bytes(self.width, self.height, self.mip_count)
    }
}

/// Describes the resource bindings of a pipeline. Root parameters are referenced by index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhiRootSignatureDef {
    pub parameters: Vec<RhiRootParameter>,
}

/// A resource that can be put into a resource group
#[derive(Clone, Debug)]
pub enum RhiGroupResource {
    Buffer(Arc<RhiBuffer>),
    Texture(Arc<RhiTexture>),
}

impl RhiGroupResource {
    pub fn object_id(&self) -> RhiObjectId {
        match self {
            RhiGroupResource::Buffer(buffer) => buffer.object_id(),
            RhiGroupResource::Texture(texture) => texture.object_id(),
        }
    }
}

/// Used to create a `RhiResourceGroup`, a set of resources bound to one root parameter
pub struct RhiResourceGroupDef<'a> {
    pub root_signature: &'a RhiRootSignature,
    pub root_parameter_index: u32,
    pub resources: &'a [RhiGroupResource],
}

/// Used to create a graphics `RhiPipeline`
pub struct RhiGraphicsPipelineDef<'a> {
    pub root_signature: &'a RhiRootSignature,
    pub shaders: &'a [&'a RhiShader],
    pub fixed_function_state: &'a RhiFixedFunctionState,
    pub render_pass_format: &'a RhiRenderPassFormat,
    pub primitive_topology: RhiPrimitiveTopology,
}

/// Used to create a compute `RhiPipeline`
pub struct RhiComputePipelineDef<'a> {
    pub root_signature: &'a RhiRootSignature,
    pub shader: &'a RhiShader,
}
