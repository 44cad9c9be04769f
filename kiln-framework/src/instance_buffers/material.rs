use kiln_api::RhiRootSignatureDef;
use kiln_base::memory::{f32_slice_as_bytes, u32_slice_as_bytes};
use kiln_base::AssetId;
use serde::{Deserialize, Serialize};

/// The parts of a material blueprint the instance buffer managers need: the root signature the
/// instance data is bound to and where
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialBlueprint {
    pub asset_id: AssetId,
    pub root_signature: RhiRootSignatureDef,
    pub instance_uniform_root_parameter_index: u32,
    /// Only needed by the texture instance buffer manager
    pub instance_texture_root_parameter_index: Option<u32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialTechnique {
    pub material_blueprint_asset_id: AssetId,
    /// Index of the material inside the material blueprint's material uniform buffer
    pub material_slot: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Renderable {
    /// Column major
    pub world_transform: [f32; 16],
    pub instance_count: u32,
    /// Row major 3x4 bone matrices, empty for static meshes
    pub bone_matrices: Vec<[f32; 12]>,
}

impl Default for Renderable {
    fn default() -> Self {
        #[rustfmt::skip]
        let identity = [
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        Renderable {
            world_transform: identity,
            instance_count: 1,
            bone_matrices: Vec::new(),
        }
    }
}

impl Renderable {
    pub fn world_position(&self) -> [f32; 3] {
        [
            self.world_transform[12],
            self.world_transform[13],
            self.world_transform[14],
        ]
    }
}

/// Per pass values that instance data can be relative to
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PassData {
    pub camera_relative_origin: [f32; 3],
}

/// One element of the per instance uniform data
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceValueSource {
    /// uint4(index of the instance inside the renderable, instance count, 0, 0)
    InstanceIndex,
    /// uint4(material slot, 0, 0, 0)
    MaterialSlot,
    /// uint4(offset in float4 units into the instance texture buffer, bone count, 0, 0)
    TextureBufferOffset,
    /// float4x4, column major
    WorldTransform,
    /// float4(world position minus the pass camera origin, 1)
    CameraRelativeWorldPosition,
}

impl InstanceValueSource {
    pub fn size_in_bytes(self) -> u64 {
        match self {
            InstanceValueSource::WorldTransform => 64,
            _ => 16,
        }
    }
}

// Everything that can end up in one instance's uniform data
pub(super) struct InstanceValues<'a> {
    pub renderable: &'a Renderable,
    pub material_technique: &'a MaterialTechnique,
    pub pass_data: Option<&'a PassData>,
    pub texture_buffer_offset: u32,
}

/// Describes the per instance uniform data a material blueprint's shaders read
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniformBufferLayout {
    pub elements: Vec<InstanceValueSource>,
}

impl UniformBufferLayout {
    pub fn new(elements: Vec<InstanceValueSource>) -> Self {
        UniformBufferLayout { elements }
    }

    /// Bytes per instance
    pub fn stride(&self) -> u64 {
        self.elements.iter().map(|x| x.size_in_bytes()).sum()
    }

    pub(super) fn write_instance(
        &self,
        bytes: &mut Vec<u8>,
        instance_index: u32,
        values: &InstanceValues,
    ) {
        for element in &self.elements {
            match element {
                InstanceValueSource::InstanceIndex => bytes.extend(u32_slice_as_bytes(&[
                    instance_index,
                    values.renderable.instance_count,
                    0,
                    0,
                ])),
                InstanceValueSource::MaterialSlot => bytes.extend(u32_slice_as_bytes(&[
                    values.material_technique.material_slot,
                    0,
                    0,
                    0,
                ])),
                InstanceValueSource::TextureBufferOffset => bytes.extend(u32_slice_as_bytes(&[
                    values.texture_buffer_offset,
                    values.renderable.bone_matrices.len() as u32,
                    0,
                    0,
                ])),
                InstanceValueSource::WorldTransform => {
                    bytes.extend(f32_slice_as_bytes(&values.renderable.world_transform))
                }
                InstanceValueSource::CameraRelativeWorldPosition => {
                    let position = values.renderable.world_position();
                    let origin = values
                        .pass_data
                        .map(|pass_data| pass_data.camera_relative_origin)
                        .unwrap_or_default();
                    bytes.extend(f32_slice_as_bytes(&[
                        position[0] - origin[0],
                        position[1] - origin[1],
                        position[2] - origin[2],
                        1.0,
                    ]));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_encoding() {
        let layout = UniformBufferLayout::new(vec![
            InstanceValueSource::MaterialSlot,
            InstanceValueSource::CameraRelativeWorldPosition,
            InstanceValueSource::WorldTransform,
        ]);
        assert_eq!(layout.stride(), 96);

        let mut renderable = Renderable::default();
        renderable.world_transform[12] = 10.0;
        let technique = MaterialTechnique {
            material_blueprint_asset_id: AssetId(1),
            material_slot: 5,
        };
        let pass_data = PassData {
            camera_relative_origin: [4.0, 0.0, 0.0],
        };

        let mut bytes = Vec::new();
        layout.write_instance(
            &mut bytes,
            0,
            &InstanceValues {
                renderable: &renderable,
                material_technique: &technique,
                pass_data: Some(&pass_data),
                texture_buffer_offset: 0,
            },
        );
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[0..4], &5u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &6.0f32.to_le_bytes());
        assert_eq!(&bytes[28..32], &1.0f32.to_le_bytes());
    }
}
