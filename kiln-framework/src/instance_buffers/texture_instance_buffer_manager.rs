use super::material::InstanceValues;
use super::{
    bind_instance_buffer, InstanceBuffer, InstanceBufferConfig, MaterialBlueprint,
    MaterialTechnique, PassData, Renderable, UniformBufferLayout,
};
use crate::resources::RendererResourceManager;
use kiln_api::{
    RhiBufferDef, RhiCommandBuffer, RhiDeviceContext, RhiError, RhiFormat, RhiResult,
};
use kiln_base::memory::{f32_slice_as_bytes, slots_to_cover};

const FLOAT4_SIZE: u64 = 16;

// A uniform buffer and the texture buffer its instances point into. Both are always switched
// together so offsets stored in the uniform data stay valid for the bound texture buffer.
struct InstanceBufferSet {
    uniform: InstanceBuffer,
    texture: InstanceBuffer,
}

impl InstanceBufferSet {
    fn is_mapped(&self) -> bool {
        self.uniform.mapped && self.texture.mapped
    }
}

/// Like the uniform instance buffer manager, but the bulk of the per renderable data (the world
/// transform and the bone palette) goes into a float4 texture buffer. The uniform data of each
/// instance only stores the offset into it.
pub struct TextureInstanceBufferManager {
    device_context: RhiDeviceContext,
    resource_manager: RendererResourceManager,
    uniform_buffer_size: u64,
    texture_buffer_size: u64,
    buffer_sets: Vec<InstanceBufferSet>,
    current_set_index: usize,
    // In bytes
    uniform_cursor: u64,
    // In float4 elements
    texture_cursor: u64,
}

impl TextureInstanceBufferManager {
    pub fn new(
        resource_manager: &RendererResourceManager,
        config: &InstanceBufferConfig,
    ) -> Self {
        let device_context = resource_manager.device_context();
        let device_info = device_context.device_info();
        let uniform_buffer_size = config
            .uniform_buffer_size
            .min(device_info.maximum_uniform_buffer_size) as u64;
        let texture_buffer_size = config
            .texture_buffer_size
            .min(device_info.maximum_texture_buffer_size) as u64;
        TextureInstanceBufferManager {
            device_context,
            resource_manager: resource_manager.clone(),
            uniform_buffer_size,
            texture_buffer_size,
            buffer_sets: Default::default(),
            current_set_index: 0,
            uniform_cursor: 0,
            texture_cursor: 0,
        }
    }

    pub fn number_of_buffer_sets(&self) -> usize {
        self.buffer_sets.len()
    }

    pub fn number_of_mapped_buffers(&self) -> usize {
        self.buffer_sets
            .iter()
            .map(|x| x.uniform.mapped as usize + x.texture.mapped as usize)
            .sum()
    }

    fn texture_capacity_in_float4s(&self) -> u64 {
        self.texture_buffer_size / FLOAT4_SIZE
    }

    fn prepare_current_set(&mut self) -> RhiResult<bool> {
        if self.current_set_index == self.buffer_sets.len() {
            let uniform = self.device_context.create_buffer(
                &RhiBufferDef::for_dynamic_uniform_buffer(self.uniform_buffer_size),
            )?;
            let texture = self
                .device_context
                .create_buffer(&RhiBufferDef::for_dynamic_texture_buffer(
                    self.texture_buffer_size,
                    RhiFormat::R32G32B32A32_SFLOAT,
                ))?;
            log::debug!(
                "Created texture instance buffer set {} ({} + {} bytes)",
                self.buffer_sets.len(),
                self.uniform_buffer_size,
                self.texture_buffer_size
            );
            self.buffer_sets.push(InstanceBufferSet {
                uniform: InstanceBuffer::new(uniform),
                texture: InstanceBuffer::new(texture),
            });
        }

        let buffer_set = &mut self.buffer_sets[self.current_set_index];
        if buffer_set.is_mapped() {
            return Ok(false);
        }

        if !buffer_set.uniform.mapped {
            buffer_set.uniform.map()?;
        }
        if !buffer_set.texture.mapped {
            buffer_set.texture.map()?;
        }
        Ok(true)
    }

    fn bind_current_set(
        &self,
        material_blueprint: &MaterialBlueprint,
        command_buffer: &mut RhiCommandBuffer,
    ) -> RhiResult<()> {
        let texture_root_parameter_index = material_blueprint
            .instance_texture_root_parameter_index
            .ok_or_else(|| {
                RhiError::from(format!(
                    "Material blueprint {:?} has no instance texture buffer root parameter",
                    material_blueprint.asset_id
                ))
            })?;

        let root_signature = self
            .resource_manager
            .get_or_create_root_signature(&material_blueprint.root_signature)?;
        let buffer_set = &self.buffer_sets[self.current_set_index];
        bind_instance_buffer(
            &self.resource_manager,
            &root_signature,
            material_blueprint.instance_uniform_root_parameter_index,
            &buffer_set.uniform,
            command_buffer,
        )?;
        bind_instance_buffer(
            &self.resource_manager,
            &root_signature,
            texture_root_parameter_index,
            &buffer_set.texture,
            command_buffer,
        )
    }

    pub fn startup_buffer_filling(
        &mut self,
        material_blueprint: &MaterialBlueprint,
        command_buffer: &mut RhiCommandBuffer,
    ) -> RhiResult<()> {
        if self.prepare_current_set()? {
            self.uniform_cursor = 0;
            self.texture_cursor = 0;
        }
        self.bind_current_set(material_blueprint, command_buffer)
    }

    #[profiling::function]
    pub fn fill_buffer(
        &mut self,
        material_blueprint: &MaterialBlueprint,
        pass_data: Option<&PassData>,
        uniform_buffer_layout: &UniformBufferLayout,
        renderable: &Renderable,
        material_technique: &MaterialTechnique,
        command_buffer: &mut RhiCommandBuffer,
    ) -> RhiResult<u32> {
        let is_filling = self
            .buffer_sets
            .get(self.current_set_index)
            .map(|x| x.is_mapped())
            .unwrap_or(false);
        if !is_filling {
            return Err("fill_buffer called without startup_buffer_filling".into());
        }

        let stride = uniform_buffer_layout.stride();
        if stride == 0 {
            return Err("The uniform buffer layout is empty".into());
        }

        // Start locations strictly increase within a buffer set, an empty record would repeat one
        if renderable.instance_count == 0 {
            return Err("A renderable needs at least one instance".into());
        }

        let instance_count = renderable.instance_count as u64;
        let record_size = stride * instance_count;
        // World transform is 4 float4, every bone 3
        let texture_float4s = 4 + 3 * renderable.bone_matrices.len() as u64;
        if record_size > self.uniform_buffer_size
            || texture_float4s > self.texture_capacity_in_float4s()
        {
            let error = RhiError::CapacityExhausted(format!(
                "Renderable with {} instances and {} bones doesn't fit into the texture instance buffers",
                instance_count,
                renderable.bone_matrices.len()
            ));
            log::error!("{}", error);
            return Err(error);
        }

        let mut start_instance_location = slots_to_cover(self.uniform_cursor, stride);
        let uniform_full =
            (start_instance_location + instance_count) * stride > self.uniform_buffer_size;
        let texture_full =
            self.texture_cursor + texture_float4s > self.texture_capacity_in_float4s();
        if uniform_full || texture_full {
            self.current_set_index += 1;
            self.prepare_current_set()?;
            self.bind_current_set(material_blueprint, command_buffer)?;
            self.uniform_cursor = 0;
            self.texture_cursor = 0;
            start_instance_location = 0;
        }

        let mut texture_data = Vec::with_capacity(texture_float4s as usize * 4);
        texture_data.extend_from_slice(&renderable.world_transform);
        for bone_matrix in &renderable.bone_matrices {
            texture_data.extend_from_slice(bone_matrix);
        }

        let values = InstanceValues {
            renderable,
            material_technique,
            pass_data,
            texture_buffer_offset: self.texture_cursor as u32,
        };
        let mut uniform_data = Vec::with_capacity(record_size as usize);
        for instance_index in 0..renderable.instance_count {
            uniform_buffer_layout.write_instance(&mut uniform_data, instance_index, &values);
        }

        let buffer_set = &self.buffer_sets[self.current_set_index];
        buffer_set.texture.write(
            self.texture_cursor * FLOAT4_SIZE,
            &f32_slice_as_bytes(&texture_data),
        )?;
        buffer_set
            .uniform
            .write(start_instance_location * stride, &uniform_data)?;

        self.texture_cursor += texture_float4s;
        self.uniform_cursor = (start_instance_location + instance_count) * stride;
        Ok(start_instance_location as u32)
    }

    pub fn on_pre_command_buffer_execution(&mut self) {
        for buffer_set in &mut self.buffer_sets {
            buffer_set.uniform.unmap();
            buffer_set.texture.unmap();
        }
        self.current_set_index = 0;
        self.uniform_cursor = 0;
        self.texture_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance_buffers::uniform_instance_buffer_manager::tests::material_blueprint;
    use crate::instance_buffers::InstanceValueSource;
    use kiln_api::null::RhiDeviceContextNull;
    use kiln_api::RhiMapType;

    fn manager(texture_buffer_size: u32) -> (TextureInstanceBufferManager, RhiDeviceContext) {
        let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
        let resource_manager = RendererResourceManager::new(&device_context, &Default::default());
        let manager = TextureInstanceBufferManager::new(
            &resource_manager,
            &InstanceBufferConfig {
                uniform_buffer_size: 1024,
                texture_buffer_size,
            },
        );
        (manager, device_context)
    }

    fn skinned(bones: usize) -> Renderable {
        Renderable {
            bone_matrices: vec![[2.0; 12]; bones],
            ..Default::default()
        }
    }

    #[test]
    fn test_texture_offsets_and_switching() {
        // 16 float4s: a renderable with 2 bones takes 10
        let (mut manager, device_context) = manager(256);
        let layout = UniformBufferLayout::new(vec![InstanceValueSource::TextureBufferOffset]);
        let blueprint = material_blueprint();
        let technique = MaterialTechnique::default();
        let mut command_buffer = RhiCommandBuffer::new();

        manager
            .startup_buffer_filling(&blueprint, &mut command_buffer)
            .unwrap();
        let first = manager
            .fill_buffer(
                &blueprint,
                None,
                &layout,
                &skinned(2),
                &technique,
                &mut command_buffer,
            )
            .unwrap();
        assert_eq!(first, 0);
        assert_eq!(manager.texture_cursor, 10);

        // Texture buffer is full even though the uniform buffer isn't
        let second = manager
            .fill_buffer(
                &blueprint,
                None,
                &layout,
                &skinned(2),
                &technique,
                &mut command_buffer,
            )
            .unwrap();
        assert_eq!(second, 0);
        assert_eq!(manager.number_of_buffer_sets(), 2);
        assert_eq!(manager.number_of_mapped_buffers(), 4);

        let too_many_bones = manager.fill_buffer(
            &blueprint,
            None,
            &layout,
            &skinned(5),
            &technique,
            &mut command_buffer,
        );
        assert!(matches!(too_many_bones, Err(RhiError::CapacityExhausted(_))));

        manager.on_pre_command_buffer_execution();
        assert_eq!(manager.number_of_mapped_buffers(), 0);
        device_context
            .submit_command_buffer(&command_buffer)
            .unwrap();

        let texture = manager.buffer_sets[0].texture.buffer.clone();
        texture.map_buffer(RhiMapType::Read).unwrap();
        let bytes = texture.read_mapped(64, 4).unwrap();
        texture.unmap_buffer().unwrap();
        // First bone follows the world transform
        assert_eq!(&bytes[..], &2.0f32.to_le_bytes());
    }

    #[test]
    fn test_empty_renderable_is_rejected() {
        let (mut manager, _device_context) = manager(1024);
        let layout = UniformBufferLayout::new(vec![InstanceValueSource::TextureBufferOffset]);
        let blueprint = material_blueprint();
        let mut command_buffer = RhiCommandBuffer::new();
        manager
            .startup_buffer_filling(&blueprint, &mut command_buffer)
            .unwrap();

        let empty = Renderable {
            instance_count: 0,
            ..skinned(1)
        };
        assert!(manager
            .fill_buffer(
                &blueprint,
                None,
                &layout,
                &empty,
                &MaterialTechnique::default(),
                &mut command_buffer,
            )
            .is_err());
        // The texture data of the rejected renderable wasn't written
        assert_eq!(manager.texture_cursor, 0);
        assert_eq!(manager.uniform_cursor, 0);
    }

    #[test]
    fn test_requires_texture_root_parameter() {
        let (mut manager, _device_context) = manager(1024);
        let mut blueprint = material_blueprint();
        blueprint.instance_texture_root_parameter_index = None;
        let mut command_buffer = RhiCommandBuffer::new();
        assert!(manager
            .startup_buffer_filling(&blueprint, &mut command_buffer)
            .is_err());
    }
}
