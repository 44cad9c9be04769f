use crate::null::RhiDeviceContextNull;
use crate::*;

/// A cloneable, thread-safe handle used to create graphics resources.
///
/// Creating shaders is safe from any thread. Everything else that creates or submits GPU objects
/// is expected to happen on the render thread.
#[derive(Clone)]
pub enum RhiDeviceContext {
    Null(RhiDeviceContextNull),
}

impl RhiDeviceContext {
    /// Name of the backend, used to key persisted data like the pipeline state cache
    pub fn backend_name(&self) -> &str {
        match self {
            RhiDeviceContext::Null(inner) => inner.backend_name(),
        }
    }

    /// Get metadata about the device
    pub fn device_info(&self) -> &RhiDeviceInfo {
        match self {
            RhiDeviceContext::Null(inner) => inner.device_info(),
        }
    }

    /// Create a buffer, contents are zeroed
    pub fn create_buffer(
        &self,
        buffer_def: &RhiBufferDef,
    ) -> RhiResult<RhiBuffer> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => RhiBuffer::Null(inner.create_buffer(buffer_def, None)?),
        })
    }

    /// Create a buffer and fill it with the given data, which must fit
    pub fn create_buffer_with_data(
        &self,
        buffer_def: &RhiBufferDef,
        data: &[u8],
    ) -> RhiResult<RhiBuffer> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiBuffer::Null(inner.create_buffer(buffer_def, Some(data))?)
            }
        })
    }

    /// Create a texture from a full mip chain of data
    pub fn create_texture(
        &self,
        texture_def: &RhiTextureDef,
        data: &[u8],
    ) -> RhiResult<RhiTexture> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiTexture::Null(inner.create_texture(texture_def, data)?)
            }
        })
    }

    /// Compile source to backend specific bytecode. Only valid if
    /// `device_info().supports_shader_bytecode` is set.
    pub fn compile_shader_to_bytecode(
        &self,
        stage: RhiShaderStage,
        source_code: &str,
    ) -> RhiResult<Vec<u8>> {
        match self {
            RhiDeviceContext::Null(inner) => inner.compile_shader_to_bytecode(stage, source_code),
        }
    }

    pub fn create_shader_from_source_code(
        &self,
        stage: RhiShaderStage,
        source_code: &str,
    ) -> RhiResult<RhiShader> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiShader::Null(inner.create_shader_from_source_code(stage, source_code)?)
            }
        })
    }

    pub fn create_shader_from_bytecode(
        &self,
        stage: RhiShaderStage,
        bytecode: &[u8],
    ) -> RhiResult<RhiShader> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiShader::Null(inner.create_shader_from_bytecode(stage, bytecode)?)
            }
        })
    }

    pub fn create_root_signature(
        &self,
        root_signature_def: &RhiRootSignatureDef,
    ) -> RhiResult<RhiRootSignature> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiRootSignature::Null(inner.create_root_signature(root_signature_def)?)
            }
        })
    }

    pub fn create_resource_group(
        &self,
        resource_group_def: &RhiResourceGroupDef,
    ) -> RhiResult<RhiResourceGroup> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiResourceGroup::Null(inner.create_resource_group(resource_group_def)?)
            }
        })
    }

    pub fn create_graphics_pipeline(
        &self,
        graphics_pipeline_def: &RhiGraphicsPipelineDef,
    ) -> RhiResult<RhiPipeline> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiPipeline::Null(inner.create_graphics_pipeline(graphics_pipeline_def)?)
            }
        })
    }

    pub fn create_compute_pipeline(
        &self,
        compute_pipeline_def: &RhiComputePipelineDef,
    ) -> RhiResult<RhiPipeline> {
        Ok(match self {
            RhiDeviceContext::Null(inner) => {
                RhiPipeline::Null(inner.create_compute_pipeline(compute_pipeline_def)?)
            }
        })
    }

    /// Execute recorded commands. Fails if any referenced buffer is still mapped.
    pub fn submit_command_buffer(
        &self,
        command_buffer: &RhiCommandBuffer,
    ) -> RhiResult<()> {
        match self {
            RhiDeviceContext::Null(inner) => inner.submit_command_buffer(command_buffer),
        }
    }

    pub fn wait_for_device_idle(&self) -> RhiResult<()> {
        match self {
            RhiDeviceContext::Null(inner) => inner.wait_for_device_idle(),
        }
    }

    pub fn null_device_context(&self) -> Option<&RhiDeviceContextNull> {
        match self {
            RhiDeviceContext::Null(inner) => Some(inner),
        }
    }
}
