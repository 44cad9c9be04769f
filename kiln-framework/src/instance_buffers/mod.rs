mod material;
pub use material::InstanceValueSource;
pub use material::MaterialBlueprint;
pub use material::MaterialTechnique;
pub use material::PassData;
pub use material::Renderable;
pub use material::UniformBufferLayout;

mod uniform_instance_buffer_manager;
pub use uniform_instance_buffer_manager::UniformInstanceBufferManager;

mod texture_instance_buffer_manager;
pub use texture_instance_buffer_manager::TextureInstanceBufferManager;

use crate::resources::RendererResourceManager;
use kiln_api::{
    RhiBuffer, RhiCommandBuffer, RhiGroupResource, RhiMapType, RhiResult, RhiRootSignature,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceBufferConfig {
    /// Clamped to the device's maximum uniform buffer size
    pub uniform_buffer_size: u32,
    /// Clamped to the device's maximum texture buffer size
    pub texture_buffer_size: u32,
}

impl Default for InstanceBufferConfig {
    fn default() -> Self {
        InstanceBufferConfig {
            uniform_buffer_size: 64 * 1024,
            texture_buffer_size: 512 * 1024,
        }
    }
}

// A buffer of the pool and whether the CPU currently holds a mapping of it
struct InstanceBuffer {
    buffer: Arc<RhiBuffer>,
    mapped: bool,
}

impl InstanceBuffer {
    fn new(buffer: RhiBuffer) -> Self {
        InstanceBuffer {
            buffer: Arc::new(buffer),
            mapped: false,
        }
    }

    fn size(&self) -> u64 {
        self.buffer.buffer_def().size
    }

    fn map(&mut self) -> RhiResult<()> {
        if let Err(error) = self.buffer.map_buffer(RhiMapType::WriteDiscard) {
            log::error!(
                "Failed to map instance buffer {:?}: {}",
                self.buffer.object_id(),
                error
            );
            return Err(error);
        }
        self.mapped = true;
        Ok(())
    }

    fn unmap(&mut self) {
        if !self.mapped {
            return;
        }

        if let Err(error) = self.buffer.unmap_buffer() {
            log::error!(
                "Failed to unmap instance buffer {:?}: {}",
                self.buffer.object_id(),
                error
            );
        }
        self.mapped = false;
    }

    fn write(
        &self,
        offset: u64,
        data: &[u8],
    ) -> RhiResult<()> {
        if !self.mapped {
            return Err("Instance buffers can only be filled between startup_buffer_filling and on_pre_command_buffer_execution".into());
        }
        self.buffer.write_mapped(offset, data)
    }
}

// Binds a buffer to a root parameter of the material blueprint's root signature
fn bind_instance_buffer(
    resource_manager: &RendererResourceManager,
    root_signature: &Arc<RhiRootSignature>,
    root_parameter_index: u32,
    instance_buffer: &InstanceBuffer,
    command_buffer: &mut RhiCommandBuffer,
) -> RhiResult<()> {
    let resource_group = resource_manager.get_or_create_resource_group(
        root_signature,
        root_parameter_index,
        &[RhiGroupResource::Buffer(instance_buffer.buffer.clone())],
    )?;
    command_buffer.cmd_set_graphics_resource_group(root_parameter_index, resource_group);
    Ok(())
}
