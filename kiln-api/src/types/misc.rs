use serde::{Deserialize, Serialize};

/// Information about the device, mostly limits and flags to indicate whether certain features are
/// supported
#[derive(Clone, Debug)]
pub struct RhiDeviceInfo {
    /// Shaders can be compiled to bytecode ahead of time, and pipeline state caches can persist it
    pub supports_shader_bytecode: bool,
    pub maximum_uniform_buffer_size: u32,
    pub maximum_texture_buffer_size: u32,
    pub min_uniform_buffer_offset_alignment: u32,
}

/// Unique for the lifetime of the device context. Used to key caches of objects that reference
/// other RHI objects.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RhiObjectId(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RhiShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl RhiShaderStage {
    pub fn is_graphics(self) -> bool {
        self != RhiShaderStage::Compute
    }

    pub fn stage_flags(self) -> RhiShaderStageFlags {
        match self {
            RhiShaderStage::Vertex => RhiShaderStageFlags::VERTEX,
            RhiShaderStage::TessellationControl => RhiShaderStageFlags::TESSELLATION_CONTROL,
            RhiShaderStage::TessellationEvaluation => RhiShaderStageFlags::TESSELLATION_EVALUATION,
            RhiShaderStage::Geometry => RhiShaderStageFlags::GEOMETRY,
            RhiShaderStage::Fragment => RhiShaderStageFlags::FRAGMENT,
            RhiShaderStage::Compute => RhiShaderStageFlags::COMPUTE,
        }
    }
}

bitflags::bitflags! {
    #[derive(Default, Serialize, Deserialize)]
    pub struct RhiShaderStageFlags : u32 {
        const NONE = 0;
        const VERTEX = 1;
        const TESSELLATION_CONTROL = 2;
        const TESSELLATION_EVALUATION = 4;
        const GEOMETRY = 8;
        const FRAGMENT = 16;
        const COMPUTE = 32;
        const ALL_GRAPHICS = 0x1F;
        const ALL = 0x3F;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiBufferKind {
    VertexBuffer,
    IndexBuffer,
    UniformBuffer,
    /// Typed buffer read through a texture view, used for larger per instance payloads
    TextureBuffer,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiBufferUsage {
    /// Written once at creation
    Static,
    /// Rewritten by the CPU every frame
    Dynamic,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RhiMapType {
    Read,
    Write,
    ReadWrite,
    /// Previous contents are discarded, the device hands out fresh memory if the old contents
    /// are still in use
    WriteDiscard,
    WriteNoOverwrite,
}

impl RhiMapType {
    pub fn is_readable(self) -> bool {
        matches!(self, RhiMapType::Read | RhiMapType::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, RhiMapType::Read)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiIndexType {
    Uint16,
    Uint32,
}

impl RhiIndexType {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            RhiIndexType::Uint16 => 2,
            RhiIndexType::Uint32 => 4,
        }
    }
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiFormat {
    UNDEFINED,
    R8_UNORM,
    R8G8B8A8_UNORM,
    R8G8B8A8_SRGB,
    BC1_RGBA_UNORM_BLOCK,
    BC3_UNORM_BLOCK,
    R16G16B16A16_SFLOAT,
    R32G32B32A32_SFLOAT,
    R32G32B32A32_UINT,
    D32_SFLOAT,
}

impl Default for RhiFormat {
    fn default() -> Self {
        RhiFormat::UNDEFINED
    }
}

impl RhiFormat {
    /// (block width, block height, bytes per block)
    pub fn block_layout(self) -> (u32, u32, u32) {
        match self {
            RhiFormat::UNDEFINED => (1, 1, 0),
            RhiFormat::R8_UNORM => (1, 1, 1),
            RhiFormat::R8G8B8A8_UNORM | RhiFormat::R8G8B8A8_SRGB => (1, 1, 4),
            RhiFormat::BC1_RGBA_UNORM_BLOCK => (4, 4, 8),
            RhiFormat::BC3_UNORM_BLOCK => (4, 4, 16),
            RhiFormat::R16G16B16A16_SFLOAT => (1, 1, 8),
            RhiFormat::R32G32B32A32_SFLOAT | RhiFormat::R32G32B32A32_UINT => (1, 1, 16),
            RhiFormat::D32_SFLOAT => (1, 1, 4),
        }
    }

    /// Bytes needed for a full mip chain starting at the given size
    pub fn mip_chain_size_in_bytes(
        self,
        width: u32,
        height: u32,
        mip_count: u32,
    ) -> u64 {
        let (block_width, block_height, block_bytes) = self.block_layout();
        let mut width = width.max(1);
        let mut height = height.max(1);
        let mut total = 0u64;
        for _ in 0..mip_count.max(1) {
            let blocks_x = (width + block_width - 1) / block_width;
            let blocks_y = (height + block_height - 1) / block_height;
            total += blocks_x as u64 * blocks_y as u64 * block_bytes as u64;
            width = (width / 2).max(1);
            height = (height / 2).max(1);
        }
        total
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiPrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    PatchList,
}

impl Default for RhiPrimitiveTopology {
    fn default() -> Self {
        RhiPrimitiveTopology::TriangleList
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiBlendState {
    Disabled,
    AlphaBlending,
    PremultipliedAlpha,
    Additive,
}

impl Default for RhiBlendState {
    fn default() -> Self {
        RhiBlendState::Disabled
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiCompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhiDepthState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: RhiCompareOp,
}

impl Default for RhiDepthState {
    fn default() -> Self {
        // Reverse Z
        RhiDepthState {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: RhiCompareOp::GreaterOrEqual,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiCullMode {
    None,
    Front,
    Back,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiFrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiFillMode {
    Solid,
    Wireframe,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhiRasterizerState {
    pub cull_mode: RhiCullMode,
    pub front_face: RhiFrontFace,
    pub fill_mode: RhiFillMode,
    pub depth_bias: i32,
}

impl Default for RhiRasterizerState {
    fn default() -> Self {
        RhiRasterizerState {
            cull_mode: RhiCullMode::Back,
            front_face: RhiFrontFace::CounterClockwise,
            fill_mode: RhiFillMode::Solid,
            depth_bias: 0,
        }
    }
}

/// Everything about a graphics pipeline that isn't a shader
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhiFixedFunctionState {
    pub blend_state: RhiBlendState,
    pub depth_state: RhiDepthState,
    pub rasterizer_state: RhiRasterizerState,
}

/// Attachment formats a graphics pipeline renders into
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhiRenderPassFormat {
    pub color_formats: Vec<RhiFormat>,
    pub depth_format: Option<RhiFormat>,
    pub sample_count: u8,
}

impl Default for RhiRenderPassFormat {
    fn default() -> Self {
        RhiRenderPassFormat {
            color_formats: vec![RhiFormat::R8G8B8A8_SRGB],
            depth_format: Some(RhiFormat::D32_SFLOAT),
            sample_count: 1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RhiDescriptorType {
    UniformBuffer,
    TextureBuffer,
    Texture,
    Sampler,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RhiRootParameter {
    pub descriptor_type: RhiDescriptorType,
    pub shader_visibility: RhiShaderStageFlags,
    pub descriptor_count: u32,
}
