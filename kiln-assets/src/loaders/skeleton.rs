use super::{LoaderTarget, ResourceLoader};
use crate::ResourcePayload;
use fnv::FnvHashMap;
use kiln_api::RhiResult;
use kiln_base::file_format::{write_header, BinaryReader, FileFormatHeader};
use kiln_base::StringId;
use serde::{Deserialize, Serialize};
use std::io;

pub const SKELETON_FORMAT_TYPE: u32 = StringId::new("Skeleton").0;
pub const SKELETON_FORMAT_VERSION: u32 = 1;

/// Parent index of root bones
pub const NO_PARENT_BONE: u32 = u32::MAX;

#[derive(Serialize, Deserialize)]
struct SkeletonHeader {
    number_of_bones: u32,
}

/// ```text
/// FileFormatHeader
/// SkeletonHeader { number_of_bones: u32 }
/// parent_bone_indices[number_of_bones]: u32
/// bone_ids[number_of_bones]: u32
/// bone_offset_matrices[number_of_bones]: f32[12], 3x4 row major
/// ```
/// Bones are sorted so parents always come before their children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletonFile {
    pub parent_bone_indices: Vec<u32>,
    pub bone_ids: Vec<u32>,
    pub bone_offset_matrices: Vec<[f32; 12]>,
}

impl SkeletonFile {
    pub fn number_of_bones(&self) -> u32 {
        self.bone_ids.len() as u32
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        FileFormatHeader::new(SKELETON_FORMAT_TYPE, SKELETON_FORMAT_VERSION).write_to(&mut bytes)?;
        write_header(
            &mut bytes,
            &SkeletonHeader {
                number_of_bones: self.number_of_bones(),
            },
        )?;
        for parent_bone_index in &self.parent_bone_indices {
            bytes.extend_from_slice(&parent_bone_index.to_le_bytes());
        }
        for bone_id in &self.bone_ids {
            bytes.extend_from_slice(&bone_id.to_le_bytes());
        }
        for matrix in &self.bone_offset_matrices {
            bytes.extend_from_slice(&kiln_base::memory::f32_slice_as_bytes(matrix));
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        FileFormatHeader::read_expected(&mut reader, SKELETON_FORMAT_TYPE, SKELETON_FORMAT_VERSION)?;

        let header: SkeletonHeader = reader.read_header()?;
        let number_of_bones = header.number_of_bones as usize;
        let parent_bone_indices = reader.read_u32_array(number_of_bones)?;
        let bone_ids = reader.read_u32_array(number_of_bones)?;
        let bone_offset_matrices = reader
            .read_f32_array(number_of_bones * 12)?
            .chunks_exact(12)
            .map(|chunk| {
                let mut matrix = [0.0; 12];
                matrix.copy_from_slice(chunk);
                matrix
            })
            .collect();

        Ok(SkeletonFile {
            parent_bone_indices,
            bone_ids,
            bone_offset_matrices,
        })
    }
}

#[derive(Default)]
pub struct SkeletonResource {
    pub parent_bone_indices: Vec<u32>,
    pub bone_ids: Vec<u32>,
    pub bone_offset_matrices: Vec<[f32; 12]>,
    bone_index_by_id: FnvHashMap<u32, u32>,
}

impl SkeletonResource {
    pub fn number_of_bones(&self) -> u32 {
        self.bone_ids.len() as u32
    }

    pub fn bone_index_by_bone_id(
        &self,
        bone_id: u32,
    ) -> Option<u32> {
        self.bone_index_by_id.get(&bone_id).copied()
    }
}

impl ResourcePayload for SkeletonResource {
    const RESOURCE_TYPE_NAME: &'static str = "skeleton";
    const DEFAULT_LOADER_TYPE_ID: StringId = SkeletonResourceLoader::TYPE_ID;

    fn create_resource_loader(
        loader_type_id: StringId,
        target: LoaderTarget<Self>,
    ) -> Option<ResourceLoader> {
        if loader_type_id == SkeletonResourceLoader::TYPE_ID {
            Some(ResourceLoader::Skeleton(SkeletonResourceLoader::new(target)))
        } else {
            None
        }
    }
}

pub struct SkeletonResourceLoader {
    pub(super) target: LoaderTarget<SkeletonResource>,
    pub(super) resource: SkeletonResource,
    skeleton_file: Option<SkeletonFile>,
}

impl SkeletonResourceLoader {
    pub const TYPE_ID: StringId = StringId::new("SkeletonResourceLoader");

    fn new(target: LoaderTarget<SkeletonResource>) -> Self {
        SkeletonResourceLoader {
            target,
            resource: Default::default(),
            skeleton_file: None,
        }
    }

    pub(super) fn on_deserialization(
        &mut self,
        bytes: &[u8],
    ) -> RhiResult<()> {
        self.skeleton_file = Some(SkeletonFile::from_bytes(bytes)?);
        Ok(())
    }

    pub(super) fn on_processing(&mut self) -> RhiResult<()> {
        let skeleton_file = self
            .skeleton_file
            .take()
            .ok_or("Skeleton processed without being deserialized")?;

        for (bone_index, parent_bone_index) in
            skeleton_file.parent_bone_indices.iter().enumerate()
        {
            if *parent_bone_index != NO_PARENT_BONE && *parent_bone_index as usize >= bone_index {
                return Err(format!(
                    "Bone {} has parent {}, parents must come before their children",
                    bone_index, parent_bone_index
                )
                .into());
            }
        }

        let mut bone_index_by_id = FnvHashMap::default();
        for (bone_index, bone_id) in skeleton_file.bone_ids.iter().enumerate() {
            if bone_index_by_id.insert(*bone_id, bone_index as u32).is_some() {
                return Err(format!("Bone id {:#010x} is used more than once", bone_id).into());
            }
        }

        self.resource = SkeletonResource {
            parent_bone_indices: skeleton_file.parent_bone_indices,
            bone_ids: skeleton_file.bone_ids,
            bone_offset_matrices: skeleton_file.bone_offset_matrices,
            bone_index_by_id,
        };
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn two_bones() -> SkeletonFile {
        SkeletonFile {
            parent_bone_indices: vec![NO_PARENT_BONE, 0],
            bone_ids: vec![StringId::new("Hip").0, StringId::new("Spine").0],
            bone_offset_matrices: vec![[1.0; 12], [2.0; 12]],
        }
    }

    #[test]
    fn test_skeleton_file() {
        let skeleton_file = two_bones();
        let decoded = SkeletonFile::from_bytes(&skeleton_file.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, skeleton_file);
        assert_eq!(decoded.number_of_bones(), 2);
    }
}
