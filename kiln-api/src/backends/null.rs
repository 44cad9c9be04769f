//! Backend that creates no GPU objects. Buffer contents live in CPU memory, shaders "compile" by
//! validating their source, and submission checks that no referenced buffer is mapped. Live
//! objects are counted so tests can verify that everything is released exactly once.

use crate::*;
use kiln_base::fnv1a_32;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const NULL_BYTECODE_MAGIC: &[u8; 4] = b"KNBC";

/// Source containing this marker fails to compile, for exercising error paths
pub const NULL_SHADER_ERROR_MARKER: &str = "#error";

#[derive(Clone, Debug)]
pub struct RhiNullDeviceConfig {
    pub backend_name: String,
    pub supports_shader_bytecode: bool,
    pub maximum_uniform_buffer_size: u32,
    pub maximum_texture_buffer_size: u32,
    pub min_uniform_buffer_offset_alignment: u32,
}

impl Default for RhiNullDeviceConfig {
    fn default() -> Self {
        RhiNullDeviceConfig {
            backend_name: "Null".to_string(),
            supports_shader_bytecode: true,
            maximum_uniform_buffer_size: 64 * 1024,
            maximum_texture_buffer_size: 128 * 1024 * 1024,
            min_uniform_buffer_offset_alignment: 256,
        }
    }
}

/// Snapshot of the device's object accounting
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RhiNullDeviceStats {
    pub live_buffers: usize,
    pub live_textures: usize,
    pub live_shaders: usize,
    pub live_root_signatures: usize,
    pub live_resource_groups: usize,
    pub live_pipelines: usize,
    pub shader_compilations: usize,
    pub shaders_created_from_bytecode: usize,
    pub submitted_command_buffers: usize,
    pub submitted_draw_calls: usize,
}

#[derive(Copy, Clone, Debug)]
enum NullObjectKind {
    Buffer,
    Texture,
    Shader,
    RootSignature,
    ResourceGroup,
    Pipeline,
}

#[derive(Default)]
struct NullDeviceCounters {
    live_buffers: AtomicUsize,
    live_textures: AtomicUsize,
    live_shaders: AtomicUsize,
    live_root_signatures: AtomicUsize,
    live_resource_groups: AtomicUsize,
    live_pipelines: AtomicUsize,
    shader_compilations: AtomicUsize,
    shaders_created_from_bytecode: AtomicUsize,
    submitted_command_buffers: AtomicUsize,
    submitted_draw_calls: AtomicUsize,
}

impl NullDeviceCounters {
    fn live_counter(
        &self,
        kind: NullObjectKind,
    ) -> &AtomicUsize {
        match kind {
            NullObjectKind::Buffer => &self.live_buffers,
            NullObjectKind::Texture => &self.live_textures,
            NullObjectKind::Shader => &self.live_shaders,
            NullObjectKind::RootSignature => &self.live_root_signatures,
            NullObjectKind::ResourceGroup => &self.live_resource_groups,
            NullObjectKind::Pipeline => &self.live_pipelines,
        }
    }
}

struct NullDeviceShared {
    backend_name: String,
    device_info: RhiDeviceInfo,
    next_object_id: AtomicU64,
    counters: NullDeviceCounters,
    fail_buffer_mapping: AtomicBool,
}

// Counts an object as live until dropped
struct NullObjectTracker {
    shared: Arc<NullDeviceShared>,
    kind: NullObjectKind,
    object_id: RhiObjectId,
}

impl NullObjectTracker {
    fn new(
        shared: &Arc<NullDeviceShared>,
        kind: NullObjectKind,
    ) -> Self {
        shared
            .counters
            .live_counter(kind)
            .fetch_add(1, Ordering::SeqCst);
        let object_id = RhiObjectId(shared.next_object_id.fetch_add(1, Ordering::Relaxed));
        NullObjectTracker {
            shared: shared.clone(),
            kind,
            object_id,
        }
    }
}

impl Drop for NullObjectTracker {
    fn drop(&mut self) {
        let previous = self
            .shared
            .counters
            .live_counter(self.kind)
            .fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "{:?} released twice", self.kind);
    }
}

impl std::fmt::Debug for NullObjectTracker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        write!(f, "{:?} {:?}", self.kind, self.object_id)
    }
}

#[derive(Clone)]
pub struct RhiDeviceContextNull {
    shared: Arc<NullDeviceShared>,
}

impl RhiDeviceContextNull {
    pub fn new(config: &RhiNullDeviceConfig) -> Self {
        log::info!("Creating null device context {}", config.backend_name);
        RhiDeviceContextNull {
            shared: Arc::new(NullDeviceShared {
                backend_name: config.backend_name.clone(),
                device_info: RhiDeviceInfo {
                    supports_shader_bytecode: config.supports_shader_bytecode,
                    maximum_uniform_buffer_size: config.maximum_uniform_buffer_size,
                    maximum_texture_buffer_size: config.maximum_texture_buffer_size,
                    min_uniform_buffer_offset_alignment: config
                        .min_uniform_buffer_offset_alignment,
                },
                next_object_id: AtomicU64::new(1),
                counters: Default::default(),
                fail_buffer_mapping: AtomicBool::new(false),
            }),
        }
    }

    /// Convenience for wrapping a new null device in the backend-agnostic context
    pub fn create_device_context(config: &RhiNullDeviceConfig) -> RhiDeviceContext {
        RhiDeviceContext::Null(RhiDeviceContextNull::new(config))
    }

    pub fn backend_name(&self) -> &str {
        &self.shared.backend_name
    }

    pub fn device_info(&self) -> &RhiDeviceInfo {
        &self.shared.device_info
    }

    pub fn stats(&self) -> RhiNullDeviceStats {
        let counters = &self.shared.counters;
        RhiNullDeviceStats {
            live_buffers: counters.live_buffers.load(Ordering::SeqCst),
            live_textures: counters.live_textures.load(Ordering::SeqCst),
            live_shaders: counters.live_shaders.load(Ordering::SeqCst),
            live_root_signatures: counters.live_root_signatures.load(Ordering::SeqCst),
            live_resource_groups: counters.live_resource_groups.load(Ordering::SeqCst),
            live_pipelines: counters.live_pipelines.load(Ordering::SeqCst),
            shader_compilations: counters.shader_compilations.load(Ordering::SeqCst),
            shaders_created_from_bytecode: counters
                .shaders_created_from_bytecode
                .load(Ordering::SeqCst),
            submitted_command_buffers: counters.submitted_command_buffers.load(Ordering::SeqCst),
            submitted_draw_calls: counters.submitted_draw_calls.load(Ordering::SeqCst),
        }
    }

    /// Make every following map_buffer call fail
    pub fn set_fail_buffer_mapping(
        &self,
        fail: bool,
    ) {
        self.shared
            .fail_buffer_mapping
            .store(fail, Ordering::SeqCst);
    }

    pub fn create_buffer(
        &self,
        buffer_def: &RhiBufferDef,
        initial_data: Option<&[u8]>,
    ) -> RhiResult<RhiBufferNull> {
        if buffer_def.size == 0 {
            return Err("Can't create a buffer of size 0".into());
        }

        let maximum_size = match buffer_def.kind {
            RhiBufferKind::UniformBuffer => Some(self.device_info().maximum_uniform_buffer_size),
            RhiBufferKind::TextureBuffer => Some(self.device_info().maximum_texture_buffer_size),
            _ => None,
        };
        if let Some(maximum_size) = maximum_size {
            if buffer_def.size > maximum_size as u64 {
                return Err(RhiError::CapacityExhausted(format!(
                    "{:?} of {} bytes exceeds the device maximum of {} bytes",
                    buffer_def.kind, buffer_def.size, maximum_size
                )));
            }
        }

        let mut data = vec![0u8; buffer_def.size as usize];
        if let Some(initial_data) = initial_data {
            if initial_data.len() > data.len() {
                return Err(format!(
                    "Initial data of {} bytes doesn't fit in a buffer of {} bytes",
                    initial_data.len(),
                    data.len()
                )
                .into());
            }
            data[..initial_data.len()].copy_from_slice(initial_data);
        }

        Ok(RhiBufferNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::Buffer),
            buffer_def: buffer_def.clone(),
            state: Mutex::new(NullBufferState {
                data,
                mapped: None,
            }),
        })
    }

    pub fn create_texture(
        &self,
        texture_def: &RhiTextureDef,
        data: &[u8],
    ) -> RhiResult<RhiTextureNull> {
        if texture_def.width == 0 || texture_def.height == 0 {
            return Err("Texture dimensions must be non-zero".into());
        }

        let expected_size = texture_def.data_size_in_bytes();
        if expected_size != data.len() as u64 {
            return Err(format!(
                "Texture {}x{} {:?} with {} mips needs {} bytes, got {}",
                texture_def.width,
                texture_def.height,
                texture_def.format,
                texture_def.mip_count,
                expected_size,
                data.len()
            )
            .into());
        }

        Ok(RhiTextureNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::Texture),
            texture_def: texture_def.clone(),
        })
    }

    fn validate_shader_source(
        &self,
        stage: RhiShaderStage,
        source_code: &str,
    ) -> RhiResult<()> {
        self.shared
            .counters
            .shader_compilations
            .fetch_add(1, Ordering::SeqCst);

        if source_code.trim().is_empty() {
            return Err(RhiError::ShaderCompilationFailed {
                stage,
                message: "empty shader source".to_string(),
            });
        }

        for (line_index, line) in source_code.lines().enumerate() {
            if let Some(position) = line.find(NULL_SHADER_ERROR_MARKER) {
                return Err(RhiError::ShaderCompilationFailed {
                    stage,
                    message: format!(
                        "({}): error: {}",
                        line_index + 1,
                        line[position + NULL_SHADER_ERROR_MARKER.len()..].trim()
                    ),
                });
            }
        }

        Ok(())
    }

    pub fn compile_shader_to_bytecode(
        &self,
        stage: RhiShaderStage,
        source_code: &str,
    ) -> RhiResult<Vec<u8>> {
        if !self.device_info().supports_shader_bytecode {
            return Err("The null device was created without shader bytecode support".into());
        }

        self.validate_shader_source(stage, source_code)?;
        let mut bytecode = Vec::with_capacity(source_code.len() + 9);
        bytecode.extend_from_slice(NULL_BYTECODE_MAGIC);
        bytecode.push(stage as u8);
        bytecode.extend_from_slice(&fnv1a_32(source_code.as_bytes()).to_le_bytes());
        bytecode.extend_from_slice(source_code.as_bytes());
        Ok(bytecode)
    }

    pub fn create_shader_from_source_code(
        &self,
        stage: RhiShaderStage,
        source_code: &str,
    ) -> RhiResult<RhiShaderNull> {
        self.validate_shader_source(stage, source_code)?;
        Ok(RhiShaderNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::Shader),
            stage,
            source_hash: fnv1a_32(source_code.as_bytes()),
        })
    }

    pub fn create_shader_from_bytecode(
        &self,
        stage: RhiShaderStage,
        bytecode: &[u8],
    ) -> RhiResult<RhiShaderNull> {
        if bytecode.len() < 9 || &bytecode[0..4] != NULL_BYTECODE_MAGIC {
            return Err("Invalid null shader bytecode".into());
        }

        if bytecode[4] != stage as u8 {
            return Err(format!("Bytecode was not compiled for the {:?} stage", stage).into());
        }

        let source_hash = u32::from_le_bytes([bytecode[5], bytecode[6], bytecode[7], bytecode[8]]);
        if source_hash != fnv1a_32(&bytecode[9..]) {
            return Err("Corrupt null shader bytecode".into());
        }

        self.shared
            .counters
            .shaders_created_from_bytecode
            .fetch_add(1, Ordering::SeqCst);
        Ok(RhiShaderNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::Shader),
            stage,
            source_hash,
        })
    }

    pub fn create_root_signature(
        &self,
        root_signature_def: &RhiRootSignatureDef,
    ) -> RhiResult<RhiRootSignatureNull> {
        Ok(RhiRootSignatureNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::RootSignature),
            root_signature_def: root_signature_def.clone(),
        })
    }

    pub fn create_resource_group(
        &self,
        resource_group_def: &RhiResourceGroupDef,
    ) -> RhiResult<RhiResourceGroupNull> {
        let parameters = &resource_group_def
            .root_signature
            .root_signature_def()
            .parameters;
        let parameter = parameters
            .get(resource_group_def.root_parameter_index as usize)
            .ok_or_else(|| {
                RhiError::from(format!(
                    "Root parameter index {} is out of range, the root signature has {} parameters",
                    resource_group_def.root_parameter_index,
                    parameters.len()
                ))
            })?;

        if resource_group_def.resources.is_empty() {
            return Err("A resource group needs at least one resource".into());
        }

        if resource_group_def.resources.len() as u32 > parameter.descriptor_count {
            return Err(format!(
                "Root parameter {} holds {} descriptors, got {} resources",
                resource_group_def.root_parameter_index,
                parameter.descriptor_count,
                resource_group_def.resources.len()
            )
            .into());
        }

        Ok(RhiResourceGroupNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::ResourceGroup),
            root_parameter_index: resource_group_def.root_parameter_index,
            resources: resource_group_def.resources.to_vec(),
        })
    }

    pub fn create_graphics_pipeline(
        &self,
        graphics_pipeline_def: &RhiGraphicsPipelineDef,
    ) -> RhiResult<RhiPipelineNull> {
        let mut has_vertex_shader = false;
        for shader in graphics_pipeline_def.shaders {
            if !shader.stage().is_graphics() {
                return Err("A compute shader can't be part of a graphics pipeline".into());
            }
            has_vertex_shader |= shader.stage() == RhiShaderStage::Vertex;
        }

        if !has_vertex_shader {
            return Err("A graphics pipeline needs a vertex shader".into());
        }

        Ok(RhiPipelineNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::Pipeline),
            pipeline_type: RhiPipelineType::Graphics,
            root_signature_object_id: graphics_pipeline_def.root_signature.object_id(),
        })
    }

    pub fn create_compute_pipeline(
        &self,
        compute_pipeline_def: &RhiComputePipelineDef,
    ) -> RhiResult<RhiPipelineNull> {
        if compute_pipeline_def.shader.stage() != RhiShaderStage::Compute {
            return Err("A compute pipeline needs a compute shader".into());
        }

        Ok(RhiPipelineNull {
            tracker: NullObjectTracker::new(&self.shared, NullObjectKind::Pipeline),
            pipeline_type: RhiPipelineType::Compute,
            root_signature_object_id: compute_pipeline_def.root_signature.object_id(),
        })
    }

    pub fn submit_command_buffer(
        &self,
        command_buffer: &RhiCommandBuffer,
    ) -> RhiResult<()> {
        profiling::scope!("RhiDeviceContextNull::submit_command_buffer");
        let mut graphics_pipeline_bound = false;
        let mut draw_calls = 0;
        for command in command_buffer.commands() {
            match command {
                RhiCommand::SetGraphicsResourceGroup { resource_group, .. }
                | RhiCommand::SetComputeResourceGroup { resource_group, .. } => {
                    for resource in resource_group.resources() {
                        if let RhiGroupResource::Buffer(buffer) = resource {
                            if buffer.is_mapped() {
                                return Err(format!(
                                    "{:?} {:?} is still mapped while the GPU reads it",
                                    buffer.buffer_def().kind,
                                    buffer.object_id()
                                )
                                .into());
                            }
                        }
                    }
                }
                RhiCommand::SetGraphicsPipeline(pipeline) => {
                    if pipeline.pipeline_type() != RhiPipelineType::Graphics {
                        return Err("Bound a compute pipeline as graphics pipeline".into());
                    }
                    graphics_pipeline_bound = true;
                }
                RhiCommand::SetComputePipeline(pipeline) => {
                    if pipeline.pipeline_type() != RhiPipelineType::Compute {
                        return Err("Bound a graphics pipeline as compute pipeline".into());
                    }
                }
                RhiCommand::DrawIndexed { .. } => {
                    if !graphics_pipeline_bound {
                        return Err("Draw call without a graphics pipeline".into());
                    }
                    draw_calls += 1;
                }
                RhiCommand::SetGraphicsRootSignature(_)
                | RhiCommand::SetComputeRootSignature(_)
                | RhiCommand::Dispatch { .. } => {}
            }
        }

        let counters = &self.shared.counters;
        counters
            .submitted_command_buffers
            .fetch_add(1, Ordering::SeqCst);
        counters
            .submitted_draw_calls
            .fetch_add(draw_calls, Ordering::SeqCst);
        Ok(())
    }

    pub fn wait_for_device_idle(&self) -> RhiResult<()> {
        Ok(())
    }
}

struct NullBufferState {
    data: Vec<u8>,
    mapped: Option<RhiMapType>,
}

pub struct RhiBufferNull {
    tracker: NullObjectTracker,
    buffer_def: RhiBufferDef,
    state: Mutex<NullBufferState>,
}

impl std::fmt::Debug for RhiBufferNull {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        f.debug_struct("RhiBufferNull")
            .field("object", &self.tracker)
            .field("buffer_def", &self.buffer_def)
            .finish()
    }
}

impl RhiBufferNull {
    pub fn object_id(&self) -> RhiObjectId {
        self.tracker.object_id
    }

    pub fn buffer_def(&self) -> &RhiBufferDef {
        &self.buffer_def
    }

    pub fn map_buffer(
        &self,
        map_type: RhiMapType,
    ) -> RhiResult<()> {
        if self.tracker.shared.fail_buffer_mapping.load(Ordering::SeqCst) {
            return Err(format!("Failed to map buffer {:?}", self.object_id()).into());
        }

        let mut state = self.state.lock().unwrap();
        if state.mapped.is_some() {
            return Err(format!("Buffer {:?} is already mapped", self.object_id()).into());
        }

        if map_type == RhiMapType::WriteDiscard {
            for byte in &mut state.data {
                *byte = 0;
            }
        }

        state.mapped = Some(map_type);
        Ok(())
    }

    pub fn unmap_buffer(&self) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.mapped.take().is_none() {
            return Err(format!("Buffer {:?} is not mapped", self.object_id()).into());
        }
        Ok(())
    }

    pub fn is_mapped(&self) -> bool {
        self.state.lock().unwrap().mapped.is_some()
    }

    pub fn write_mapped(
        &self,
        buffer_byte_offset: u64,
        data: &[u8],
    ) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.mapped {
            Some(map_type) if map_type.is_writable() => {}
            _ => {
                return Err(format!(
                    "Buffer {:?} must be mapped for writing",
                    self.object_id()
                )
                .into())
            }
        }

        let begin = buffer_byte_offset as usize;
        let end = begin + data.len();
        if end > state.data.len() {
            return Err(format!(
                "Write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                begin,
                state.data.len()
            )
            .into());
        }

        state.data[begin..end].copy_from_slice(data);
        Ok(())
    }

    pub fn read_mapped(
        &self,
        buffer_byte_offset: u64,
        size: u64,
    ) -> RhiResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        match state.mapped {
            Some(map_type) if map_type.is_readable() => {}
            _ => {
                return Err(format!(
                    "Buffer {:?} must be mapped for reading",
                    self.object_id()
                )
                .into())
            }
        }

        let begin = buffer_byte_offset as usize;
        let end = begin + size as usize;
        if end > state.data.len() {
            return Err(format!(
                "Read of {} bytes at offset {} exceeds buffer size {}",
                size,
                begin,
                state.data.len()
            )
            .into());
        }

        Ok(state.data[begin..end].to_vec())
    }
}

#[derive(Debug)]
pub struct RhiTextureNull {
    tracker: NullObjectTracker,
    texture_def: RhiTextureDef,
}

impl RhiTextureNull {
    pub fn object_id(&self) -> RhiObjectId {
        self.tracker.object_id
    }

    pub fn texture_def(&self) -> &RhiTextureDef {
        &self.texture_def
    }
}

#[derive(Debug)]
pub struct RhiShaderNull {
    tracker: NullObjectTracker,
    stage: RhiShaderStage,
    source_hash: u32,
}

impl RhiShaderNull {
    pub fn object_id(&self) -> RhiObjectId {
        self.tracker.object_id
    }

    pub fn stage(&self) -> RhiShaderStage {
        self.stage
    }

    /// Hash of the source the shader was built from
    pub fn source_hash(&self) -> u32 {
        self.source_hash
    }
}

#[derive(Debug)]
pub struct RhiRootSignatureNull {
    tracker: NullObjectTracker,
    root_signature_def: RhiRootSignatureDef,
}

impl RhiRootSignatureNull {
    pub fn object_id(&self) -> RhiObjectId {
        self.tracker.object_id
    }

    pub fn root_signature_def(&self) -> &RhiRootSignatureDef {
        &self.root_signature_def
    }
}

#[derive(Debug)]
pub struct RhiResourceGroupNull {
    tracker: NullObjectTracker,
    root_parameter_index: u32,
    resources: Vec<RhiGroupResource>,
}

impl RhiResourceGroupNull {
    pub fn object_id(&self) -> RhiObjectId {
        self.tracker.object_id
    }

    pub fn root_parameter_index(&self) -> u32 {
        self.root_parameter_index
    }

    pub fn resources(&self) -> &[RhiGroupResource] {
        &self.resources
    }
}

#[derive(Debug)]
pub struct RhiPipelineNull {
    tracker: NullObjectTracker,
    pipeline_type: RhiPipelineType,
    root_signature_object_id: RhiObjectId,
}

impl RhiPipelineNull {
    pub fn object_id(&self) -> RhiObjectId {
        self.tracker.object_id
    }

    pub fn pipeline_type(&self) -> RhiPipelineType {
        self.pipeline_type
    }

    pub fn root_signature_object_id(&self) -> RhiObjectId {
        self.root_signature_object_id
    }
}
