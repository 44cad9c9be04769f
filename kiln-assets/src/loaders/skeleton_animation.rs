use super::{LoaderTarget, ResourceLoader};
use crate::ResourcePayload;
use kiln_api::RhiResult;
use kiln_base::file_format::{write_header, BinaryReader, FileFormatHeader};
use kiln_base::StringId;
use serde::{Deserialize, Serialize};
use std::io;

pub const SKELETON_ANIMATION_FORMAT_TYPE: u32 = StringId::new("SkeletonAnimation").0;
pub const SKELETON_ANIMATION_FORMAT_VERSION: u32 = 2;

#[derive(Serialize, Deserialize)]
struct SkeletonAnimationHeader {
    number_of_channels: u32,
    duration_in_ticks: f32,
    ticks_per_second: f32,
    acl_compressed_clip_size: u32,
}

/// ```text
/// FileFormatHeader
/// SkeletonAnimationHeader { number_of_channels: u32, duration_in_ticks: f32,
///                           ticks_per_second: f32, acl_compressed_clip_size: u32 }
/// bone_ids[number_of_channels]: u32
/// acl_compressed_clip[acl_compressed_clip_size]: u8
/// ```
/// The compressed clip is kept as an opaque blob.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletonAnimationFile {
    pub duration_in_ticks: f32,
    pub ticks_per_second: f32,
    /// One channel per animated bone
    pub bone_ids: Vec<u32>,
    pub acl_compressed_clip: Vec<u8>,
}

impl SkeletonAnimationFile {
    pub fn number_of_channels(&self) -> u32 {
        self.bone_ids.len() as u32
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        FileFormatHeader::new(
            SKELETON_ANIMATION_FORMAT_TYPE,
            SKELETON_ANIMATION_FORMAT_VERSION,
        )
        .write_to(&mut bytes)?;
        write_header(
            &mut bytes,
            &SkeletonAnimationHeader {
                number_of_channels: self.number_of_channels(),
                duration_in_ticks: self.duration_in_ticks,
                ticks_per_second: self.ticks_per_second,
                acl_compressed_clip_size: self.acl_compressed_clip.len() as u32,
            },
        )?;
        for bone_id in &self.bone_ids {
            bytes.extend_from_slice(&bone_id.to_le_bytes());
        }
        bytes.extend_from_slice(&self.acl_compressed_clip);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        FileFormatHeader::read_expected(
            &mut reader,
            SKELETON_ANIMATION_FORMAT_TYPE,
            SKELETON_ANIMATION_FORMAT_VERSION,
        )?;

        let header: SkeletonAnimationHeader = reader.read_header()?;
        let bone_ids = reader.read_u32_array(header.number_of_channels as usize)?;
        let acl_compressed_clip = reader
            .read_bytes(header.acl_compressed_clip_size as usize)?
            .to_vec();

        Ok(SkeletonAnimationFile {
            duration_in_ticks: header.duration_in_ticks,
            ticks_per_second: header.ticks_per_second,
            bone_ids,
            acl_compressed_clip,
        })
    }
}

#[derive(Default)]
pub struct SkeletonAnimationResource {
    pub duration_in_ticks: f32,
    pub ticks_per_second: f32,
    pub bone_ids: Vec<u32>,
    pub acl_compressed_clip: Vec<u8>,
}

impl SkeletonAnimationResource {
    pub fn number_of_channels(&self) -> u32 {
        self.bone_ids.len() as u32
    }

    pub fn duration_in_seconds(&self) -> f32 {
        if self.ticks_per_second > 0.0 {
            self.duration_in_ticks / self.ticks_per_second
        } else {
            0.0
        }
    }
}

impl ResourcePayload for SkeletonAnimationResource {
    const RESOURCE_TYPE_NAME: &'static str = "skeleton animation";
    const DEFAULT_LOADER_TYPE_ID: StringId = SkeletonAnimationResourceLoader::TYPE_ID;

    fn create_resource_loader(
        loader_type_id: StringId,
        target: LoaderTarget<Self>,
    ) -> Option<ResourceLoader> {
        if loader_type_id == SkeletonAnimationResourceLoader::TYPE_ID {
            Some(ResourceLoader::SkeletonAnimation(
                SkeletonAnimationResourceLoader::new(target),
            ))
        } else {
            None
        }
    }
}

pub struct SkeletonAnimationResourceLoader {
    pub(super) target: LoaderTarget<SkeletonAnimationResource>,
    pub(super) resource: SkeletonAnimationResource,
}

impl SkeletonAnimationResourceLoader {
    pub const TYPE_ID: StringId = StringId::new("SkeletonAnimationResourceLoader");

    fn new(target: LoaderTarget<SkeletonAnimationResource>) -> Self {
        SkeletonAnimationResourceLoader {
            target,
            resource: Default::default(),
        }
    }

    pub(super) fn on_deserialization(
        &mut self,
        bytes: &[u8],
    ) -> RhiResult<()> {
        let animation_file = SkeletonAnimationFile::from_bytes(bytes)?;
        self.resource = SkeletonAnimationResource {
            duration_in_ticks: animation_file.duration_in_ticks,
            ticks_per_second: animation_file.ticks_per_second,
            bone_ids: animation_file.bone_ids,
            acl_compressed_clip: animation_file.acl_compressed_clip,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skeleton_animation_layout() {
        let animation_file = SkeletonAnimationFile {
            duration_in_ticks: 48.0,
            ticks_per_second: 24.0,
            bone_ids: vec![7, 9],
            acl_compressed_clip: vec![0xAB; 5],
        };
        let bytes = animation_file.to_bytes().unwrap();
        // Header, animation header, two bone ids, the clip
        assert_eq!(bytes.len(), 8 + 16 + 8 + 5);
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &48.0f32.to_le_bytes());
        assert_eq!(&bytes[20..24], &5u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &7u32.to_le_bytes());

        assert_eq!(
            SkeletonAnimationFile::from_bytes(&bytes).unwrap(),
            animation_file
        );
        assert!(SkeletonAnimationFile::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
