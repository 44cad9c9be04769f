use crate::{RhiPipeline, RhiResourceGroup, RhiRootSignature};
use std::sync::Arc;

/// A recorded command. Commands hold on to the objects they reference so those objects outlive
/// the submission.
#[derive(Clone, Debug)]
pub enum RhiCommand {
    SetGraphicsRootSignature(Arc<RhiRootSignature>),
    SetGraphicsPipeline(Arc<RhiPipeline>),
    SetGraphicsResourceGroup {
        root_parameter_index: u32,
        resource_group: Arc<RhiResourceGroup>,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        start_instance_location: u32,
    },
    SetComputeRootSignature(Arc<RhiRootSignature>),
    SetComputePipeline(Arc<RhiPipeline>),
    SetComputeResourceGroup {
        root_parameter_index: u32,
        resource_group: Arc<RhiResourceGroup>,
    },
    Dispatch {
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    },
}

/// Commands are recorded on the CPU without touching the device, then handed to
/// `RhiDeviceContext::submit_command_buffer`
#[derive(Clone, Debug, Default)]
pub struct RhiCommandBuffer {
    commands: Vec<RhiCommand>,
}

impl RhiCommandBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn commands(&self) -> &[RhiCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn cmd_set_graphics_root_signature(
        &mut self,
        root_signature: Arc<RhiRootSignature>,
    ) {
        self.commands
            .push(RhiCommand::SetGraphicsRootSignature(root_signature));
    }

    pub fn cmd_set_graphics_pipeline(
        &mut self,
        pipeline: Arc<RhiPipeline>,
    ) {
        self.commands.push(RhiCommand::SetGraphicsPipeline(pipeline));
    }

    pub fn cmd_set_graphics_resource_group(
        &mut self,
        root_parameter_index: u32,
        resource_group: Arc<RhiResourceGroup>,
    ) {
        self.commands.push(RhiCommand::SetGraphicsResourceGroup {
            root_parameter_index,
            resource_group,
        });
    }

    pub fn cmd_draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        start_instance_location: u32,
    ) {
        self.commands.push(RhiCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            start_instance_location,
        });
    }

    pub fn cmd_set_compute_root_signature(
        &mut self,
        root_signature: Arc<RhiRootSignature>,
    ) {
        self.commands
            .push(RhiCommand::SetComputeRootSignature(root_signature));
    }

    pub fn cmd_set_compute_pipeline(
        &mut self,
        pipeline: Arc<RhiPipeline>,
    ) {
        self.commands.push(RhiCommand::SetComputePipeline(pipeline));
    }

    pub fn cmd_set_compute_resource_group(
        &mut self,
        root_parameter_index: u32,
        resource_group: Arc<RhiResourceGroup>,
    ) {
        self.commands.push(RhiCommand::SetComputeResourceGroup {
            root_parameter_index,
            resource_group,
        });
    }

    pub fn cmd_dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) {
        self.commands.push(RhiCommand::Dispatch {
            group_count_x,
            group_count_y,
            group_count_z,
        });
    }
}
