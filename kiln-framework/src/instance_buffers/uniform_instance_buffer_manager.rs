use super::material::InstanceValues;
use super::{
    bind_instance_buffer, InstanceBuffer, InstanceBufferConfig, MaterialBlueprint,
    MaterialTechnique, PassData, Renderable, UniformBufferLayout,
};
use crate::resources::RendererResourceManager;
use kiln_api::{RhiBufferDef, RhiCommandBuffer, RhiDeviceContext, RhiError, RhiResult};
use kiln_base::memory::slots_to_cover;

/// Streams per draw instance data into a small pool of uniform buffers. Each frame the pool is
/// filled front to back, every buffer mapped once with write-discard, and everything is unmapped
/// again in `on_pre_command_buffer_execution` before the command buffer is submitted.
pub struct UniformInstanceBufferManager {
    device_context: RhiDeviceContext,
    resource_manager: RendererResourceManager,
    buffer_size: u64,
    buffers: Vec<InstanceBuffer>,
    current_buffer_index: usize,
    // Bytes written to the current buffer during this fill cycle
    cursor: u64,
}

impl UniformInstanceBufferManager {
    pub fn new(
        resource_manager: &RendererResourceManager,
        config: &InstanceBufferConfig,
    ) -> Self {
        let device_context = resource_manager.device_context();
        let buffer_size = config
            .uniform_buffer_size
            .min(device_context.device_info().maximum_uniform_buffer_size)
            as u64;
        UniformInstanceBufferManager {
            device_context,
            resource_manager: resource_manager.clone(),
            buffer_size,
            buffers: Default::default(),
            current_buffer_index: 0,
            cursor: 0,
        }
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    pub fn number_of_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn number_of_mapped_buffers(&self) -> usize {
        self.buffers.iter().filter(|x| x.mapped).count()
    }

    // Creates the buffer if the pool hasn't grown this far yet, maps it if it isn't mapped
    fn prepare_current_buffer(&mut self) -> RhiResult<bool> {
        if self.current_buffer_index == self.buffers.len() {
            let buffer = self
                .device_context
                .create_buffer(&RhiBufferDef::for_dynamic_uniform_buffer(self.buffer_size))?;
            log::debug!(
                "Created uniform instance buffer {} ({} bytes)",
                self.buffers.len(),
                self.buffer_size
            );
            self.buffers.push(InstanceBuffer::new(buffer));
        }

        let instance_buffer = &mut self.buffers[self.current_buffer_index];
        if instance_buffer.mapped {
            return Ok(false);
        }

        instance_buffer.map()?;
        Ok(true)
    }

    fn bind_current_buffer(
        &self,
        material_blueprint: &MaterialBlueprint,
        command_buffer: &mut RhiCommandBuffer,
    ) -> RhiResult<()> {
        let root_signature = self
            .resource_manager
            .get_or_create_root_signature(&material_blueprint.root_signature)?;
        bind_instance_buffer(
            &self.resource_manager,
            &root_signature,
            material_blueprint.instance_uniform_root_parameter_index,
            &self.buffers[self.current_buffer_index],
            command_buffer,
        )
    }

    /// Call before recording the draws of a material blueprint. Maps the current buffer if needed
    /// and binds it.
    pub fn startup_buffer_filling(
        &mut self,
        material_blueprint: &MaterialBlueprint,
        command_buffer: &mut RhiCommandBuffer,
    ) -> RhiResult<()> {
        if self.prepare_current_buffer()? {
            self.cursor = 0;
        }
        self.bind_current_buffer(material_blueprint, command_buffer)
    }

    /// Writes the instance data of one renderable and returns the start instance location for its
    /// draw call. Moves on to the next buffer, rebinding it, when the current one is full.
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
            .buffers
            .get(self.current_buffer_index)
            .map(|x| x.mapped)
            .unwrap_or(false);
        if !is_filling {
            return Err("fill_buffer called without startup_buffer_filling".into());
        }

        let stride = uniform_buffer_layout.stride();
        if stride == 0 {
            return Err("The uniform buffer layout is empty".into());
        }

        // Start locations strictly increase within a buffer, an empty record would repeat one
        if renderable.instance_count == 0 {
            return Err("A renderable needs at least one instance".into());
        }

        let instance_count = renderable.instance_count as u64;
        let record_size = stride * instance_count;
        if record_size > self.buffer_size {
            let error = RhiError::CapacityExhausted(format!(
                "{} instances of {} bytes don't fit into a {} byte uniform instance buffer",
                instance_count, stride, self.buffer_size
            ));
            log::error!("{}", error);
            return Err(error);
        }

        let mut start_instance_location = slots_to_cover(self.cursor, stride);
        if (start_instance_location + instance_count) * stride > self.buffer_size {
            self.current_buffer_index += 1;
            self.prepare_current_buffer()?;
            self.bind_current_buffer(material_blueprint, command_buffer)?;
            self.cursor = 0;
            start_instance_location = 0;
        }

        let values = InstanceValues {
            renderable,
            material_technique,
            pass_data,
            texture_buffer_offset: 0,
        };
        let mut bytes = Vec::with_capacity(record_size as usize);
        for instance_index in 0..renderable.instance_count {
            uniform_buffer_layout.write_instance(&mut bytes, instance_index, &values);
        }

        self.buffers[self.current_buffer_index].write(start_instance_location * stride, &bytes)?;
        self.cursor = (start_instance_location + instance_count) * stride;
        Ok(start_instance_location as u32)
    }

    /// Unmaps every mapped buffer and rewinds the pool for the next frame
    pub fn on_pre_command_buffer_execution(&mut self) {
        for instance_buffer in &mut self.buffers {
            instance_buffer.unmap();
        }
        self.current_buffer_index = 0;
        self.cursor = 0;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::instance_buffers::InstanceValueSource;
    use kiln_api::null::{RhiDeviceContextNull, RhiNullDeviceConfig};
    use kiln_api::{
        RhiCommand, RhiDescriptorType, RhiMapType, RhiRootParameter, RhiRootSignatureDef,
        RhiShaderStageFlags,
    };
    use kiln_base::AssetId;

    pub(crate) fn material_blueprint() -> MaterialBlueprint {
        MaterialBlueprint {
            asset_id: AssetId::from_virtual_path("Materials/Lit"),
            root_signature: RhiRootSignatureDef {
                parameters: vec![
                    RhiRootParameter {
                        descriptor_type: RhiDescriptorType::UniformBuffer,
                        shader_visibility: RhiShaderStageFlags::VERTEX,
                        descriptor_count: 1,
                    },
                    RhiRootParameter {
                        descriptor_type: RhiDescriptorType::TextureBuffer,
                        shader_visibility: RhiShaderStageFlags::VERTEX,
                        descriptor_count: 1,
                    },
                ],
            },
            instance_uniform_root_parameter_index: 0,
            instance_texture_root_parameter_index: Some(1),
        }
    }

    fn renderable(instance_count: u32) -> Renderable {
        Renderable {
            instance_count,
            ..Default::default()
        }
    }

    fn manager(uniform_buffer_size: u32) -> (UniformInstanceBufferManager, RhiDeviceContext) {
        let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
        let resource_manager = RendererResourceManager::new(&device_context, &Default::default());
        let manager = UniformInstanceBufferManager::new(
            &resource_manager,
            &InstanceBufferConfig {
                uniform_buffer_size,
                ..Default::default()
            },
        );
        (manager, device_context)
    }

    fn bound_groups(command_buffer: &RhiCommandBuffer) -> usize {
        command_buffer
            .commands()
            .iter()
            .filter(|x| matches!(x, RhiCommand::SetGraphicsResourceGroup { .. }))
            .count()
    }

    #[test]
    fn test_start_instance_locations() {
        let _ = env_logger::builder().is_test(true).try_init();
        // 80 byte stride, 5 instances per buffer
        let (mut manager, device_context) = manager(400);
        let layout = UniformBufferLayout::new(vec![
            InstanceValueSource::WorldTransform,
            InstanceValueSource::MaterialSlot,
        ]);
        let blueprint = material_blueprint();
        let technique = MaterialTechnique::default();
        let mut command_buffer = RhiCommandBuffer::new();

        manager
            .startup_buffer_filling(&blueprint, &mut command_buffer)
            .unwrap();
        let mut fill = |manager: &mut UniformInstanceBufferManager, count| {
            manager
                .fill_buffer(
                    &blueprint,
                    None,
                    &layout,
                    &renderable(count),
                    &technique,
                    &mut command_buffer,
                )
                .unwrap()
        };
        assert_eq!(fill(&mut manager, 2), 0);
        assert_eq!(fill(&mut manager, 1), 2);
        assert_eq!(fill(&mut manager, 2), 3);
        // Full, continues at the start of a new buffer
        assert_eq!(fill(&mut manager, 1), 0);
        assert_eq!(fill(&mut manager, 3), 1);
        assert_eq!(manager.number_of_buffers(), 2);
        assert_eq!(manager.number_of_mapped_buffers(), 2);
        assert_eq!(bound_groups(&command_buffer), 2);

        assert!(device_context
            .submit_command_buffer(&command_buffer)
            .is_err());
        manager.on_pre_command_buffer_execution();
        assert_eq!(manager.number_of_mapped_buffers(), 0);
        device_context
            .submit_command_buffer(&command_buffer)
            .unwrap();

        // Next frame starts over with the first buffer
        let mut next_frame = RhiCommandBuffer::new();
        manager
            .startup_buffer_filling(&blueprint, &mut next_frame)
            .unwrap();
        assert_eq!(
            manager
                .fill_buffer(
                    &blueprint,
                    None,
                    &layout,
                    &renderable(1),
                    &technique,
                    &mut next_frame
                )
                .unwrap(),
            0
        );
        assert_eq!(manager.number_of_buffers(), 2);
    }

    #[test]
    fn test_written_contents() {
        let (mut manager, _device_context) = manager(1024);
        let layout = UniformBufferLayout::new(vec![
            InstanceValueSource::InstanceIndex,
            InstanceValueSource::MaterialSlot,
        ]);
        let blueprint = material_blueprint();
        let technique = MaterialTechnique {
            material_blueprint_asset_id: blueprint.asset_id,
            material_slot: 9,
        };
        let mut command_buffer = RhiCommandBuffer::new();
        manager
            .startup_buffer_filling(&blueprint, &mut command_buffer)
            .unwrap();
        manager
            .fill_buffer(
                &blueprint,
                None,
                &layout,
                &renderable(2),
                &technique,
                &mut command_buffer,
            )
            .unwrap();
        manager.on_pre_command_buffer_execution();

        let buffer = manager.buffers[0].buffer.clone();
        buffer.map_buffer(RhiMapType::Read).unwrap();
        let bytes = buffer.read_mapped(0, 64).unwrap();
        buffer.unmap_buffer().unwrap();
        // Second instance: uint4(1, 2, 0, 0) then uint4(9, 0, 0, 0)
        assert_eq!(&bytes[32..36], &1u32.to_le_bytes());
        assert_eq!(&bytes[36..40], &2u32.to_le_bytes());
        assert_eq!(&bytes[48..52], &9u32.to_le_bytes());
    }

    #[test]
    fn test_fill_requires_mapped_buffer() {
        let (mut manager, _device_context) = manager(1024);
        let layout = UniformBufferLayout::new(vec![InstanceValueSource::WorldTransform]);
        let blueprint = material_blueprint();
        let mut command_buffer = RhiCommandBuffer::new();
        let fill = |manager: &mut UniformInstanceBufferManager,
                    command_buffer: &mut RhiCommandBuffer,
                    count| {
            manager.fill_buffer(
                &blueprint,
                None,
                &layout,
                &renderable(count),
                &MaterialTechnique::default(),
                command_buffer,
            )
        };

        assert!(fill(&mut manager, &mut command_buffer, 1).is_err());

        manager
            .startup_buffer_filling(&blueprint, &mut command_buffer)
            .unwrap();
        assert_eq!(fill(&mut manager, &mut command_buffer, 1).unwrap(), 0);
        // Nothing is written for an empty renderable, the next one still gets a new location
        assert!(fill(&mut manager, &mut command_buffer, 0).is_err());
        assert_eq!(fill(&mut manager, &mut command_buffer, 1).unwrap(), 1);
        // 17 * 64 bytes can never fit
        assert!(matches!(
            fill(&mut manager, &mut command_buffer, 17),
            Err(RhiError::CapacityExhausted(_))
        ));

        manager.on_pre_command_buffer_execution();
        assert!(fill(&mut manager, &mut command_buffer, 1).is_err());
    }

    #[test]
    fn test_mapping_failure() {
        let (mut manager, device_context) = manager(1024);
        device_context
            .null_device_context()
            .unwrap()
            .set_fail_buffer_mapping(true);
        let mut command_buffer = RhiCommandBuffer::new();
        assert!(manager
            .startup_buffer_filling(&material_blueprint(), &mut command_buffer)
            .is_err());
        assert!(command_buffer.is_empty());
        assert_eq!(manager.number_of_mapped_buffers(), 0);
    }

    #[test]
    fn test_buffer_size_is_clamped_to_device_limit() {
        let device_context = RhiDeviceContextNull::create_device_context(&RhiNullDeviceConfig {
            maximum_uniform_buffer_size: 4096,
            ..Default::default()
        });
        let resource_manager = RendererResourceManager::new(&device_context, &Default::default());
        let manager = UniformInstanceBufferManager::new(&resource_manager, &Default::default());
        assert_eq!(manager.buffer_size(), 4096);
    }
}
