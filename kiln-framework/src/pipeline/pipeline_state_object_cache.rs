//! The pipeline state object cache file. Lets a restart recreate every shader from bytecode and
//! warm up every pipeline state that was used before.
//!
//! Layout: a `FileFormatHeader` followed by an lz4 block (size prepended) of the bincode encoded
//! `PipelineStateObjectCacheData`.

use super::{ComputePipelineStateSignature, GraphicsPipelineStateSignature, ShaderCacheRecord};
use kiln_api::{RhiError, RhiResult};
use kiln_base::file_format::{BinaryReader, FileFormatHeader};
use kiln_base::{FileManager, StringId};
use serde::{Deserialize, Serialize};

pub const PIPELINE_STATE_CACHE_FORMAT_TYPE: u32 = StringId::new("PipelineStateCache").0;
pub const PIPELINE_STATE_CACHE_FORMAT_VERSION: u32 = 1;

/// Larger decompressed sizes are treated as a corrupt file
pub const MAXIMUM_PIPELINE_STATE_CACHE_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStateObjectCacheData {
    pub rhi_backend_name: String,
    pub shader_caches: Vec<ShaderCacheRecord>,
    pub graphics_signatures: Vec<GraphicsPipelineStateSignature>,
    pub compute_signatures: Vec<ComputePipelineStateSignature>,
}

impl PipelineStateObjectCacheData {
    pub fn virtual_filename(
        local_data_mount_point: &str,
        rhi_backend_name: &str,
    ) -> String {
        format!("{}/{}.pso_cache", local_data_mount_point, rhi_backend_name)
    }

    pub fn encode(&self) -> RhiResult<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let mut bytes = Vec::with_capacity(FileFormatHeader::SIZE + payload.len() / 2);
        FileFormatHeader::new(
            PIPELINE_STATE_CACHE_FORMAT_TYPE,
            PIPELINE_STATE_CACHE_FORMAT_VERSION,
        )
        .write_to(&mut bytes)?;
        bytes.extend_from_slice(&lz4_flex::compress_prepend_size(&payload));
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> RhiResult<Self> {
        let mut reader = BinaryReader::new(bytes);
        FileFormatHeader::read_expected(
            &mut reader,
            PIPELINE_STATE_CACHE_FORMAT_TYPE,
            PIPELINE_STATE_CACHE_FORMAT_VERSION,
        )?;

        // The decompressor allocates the prepended size up front
        let payload_size = BinaryReader::new(reader.remaining()).read_u32()?;
        if payload_size > MAXIMUM_PIPELINE_STATE_CACHE_PAYLOAD_SIZE {
            return Err(RhiError::SerializationError(format!(
                "Pipeline state cache payload of {} bytes exceeds the maximum of {} bytes",
                payload_size, MAXIMUM_PIPELINE_STATE_CACHE_PAYLOAD_SIZE
            )));
        }
        let payload = lz4_flex::decompress_size_prepended(reader.remaining())
            .map_err(|e| RhiError::SerializationError(e.to_string()))?;
        Ok(bincode::deserialize(&payload)?)
    }

    /// Writes to `<local data mount point>/<backend name>.pso_cache`
    pub fn save(
        &self,
        file_manager: &dyn FileManager,
    ) -> RhiResult<()> {
        let local_data_mount_point = file_manager.local_data_mount_point();
        let virtual_filename =
            Self::virtual_filename(local_data_mount_point, &self.rhi_backend_name);
        let bytes = self.encode()?;
        file_manager.create_directories(local_data_mount_point)?;
        file_manager.write_file(&virtual_filename, &bytes)?;
        log::info!(
            "Saved pipeline state cache {} ({} bytes, {} shaders, {} graphics and {} compute pipeline states)",
            virtual_filename,
            bytes.len(),
            self.shader_caches.len(),
            self.graphics_signatures.len(),
            self.compute_signatures.len()
        );
        Ok(())
    }

    /// `Ok(None)` if there is no cache for this backend yet
    pub fn load(
        file_manager: &dyn FileManager,
        rhi_backend_name: &str,
    ) -> RhiResult<Option<Self>> {
        let virtual_filename =
            Self::virtual_filename(file_manager.local_data_mount_point(), rhi_backend_name);
        if !file_manager.does_file_exist(&virtual_filename) {
            log::debug!("No pipeline state cache at {}", virtual_filename);
            return Ok(None);
        }

        let data = Self::decode(&file_manager.read_file(&virtual_filename)?)?;
        if data.rhi_backend_name != rhi_backend_name {
            log::warn!(
                "Ignoring pipeline state cache {} written by backend {}",
                virtual_filename,
                data.rhi_backend_name
            );
            return Ok(None);
        }

        log::info!(
            "Loaded pipeline state cache {} ({} shaders, {} graphics and {} compute pipeline states)",
            virtual_filename,
            data.shader_caches.len(),
            data.graphics_signatures.len(),
            data.compute_signatures.len()
        );
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ShaderProperties;
    use kiln_api::RhiShaderStage;
    use kiln_base::{AssetId, MemoryFileManager};

    fn data() -> PipelineStateObjectCacheData {
        PipelineStateObjectCacheData {
            rhi_backend_name: "Null".to_string(),
            shader_caches: vec![ShaderCacheRecord {
                shader_cache_id: 7,
                stage: RhiShaderStage::Compute,
                source_code: "void main() {}".to_string(),
                bytecode: Some(vec![1, 2, 3]),
            }],
            graphics_signatures: vec![],
            compute_signatures: vec![ComputePipelineStateSignature {
                material_blueprint_asset_id: AssetId(3),
                root_signature: Default::default(),
                compute_shader_blueprint: AssetId(4),
                shader_properties: ShaderProperties::new(),
            }],
        }
    }

    #[test]
    fn test_header_is_checked() {
        let mut bytes = data().encode().unwrap();
        assert_eq!(
            &bytes[0..4],
            &StringId::new("PipelineStateCache").0.to_le_bytes()
        );
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());

        bytes[4] = 2;
        assert!(PipelineStateObjectCacheData::decode(&bytes).is_err());
        assert!(PipelineStateObjectCacheData::decode(&bytes[0..6]).is_err());
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let bytes = data().encode().unwrap();
        let mut corrupt = bytes[..FileFormatHeader::SIZE].to_vec();
        corrupt.extend_from_slice(&u32::MAX.to_le_bytes());
        corrupt.extend_from_slice(&bytes[FileFormatHeader::SIZE + 4..]);
        assert!(matches!(
            PipelineStateObjectCacheData::decode(&corrupt),
            Err(RhiError::SerializationError(_))
        ));

        // Too short for the size prefix
        assert!(PipelineStateObjectCacheData::decode(&bytes[..FileFormatHeader::SIZE + 2]).is_err());
        assert_eq!(PipelineStateObjectCacheData::decode(&bytes).unwrap(), data());
    }

    #[test]
    fn test_save_and_load() {
        let file_manager = MemoryFileManager::new("LocalData", true);
        assert_eq!(
            PipelineStateObjectCacheData::load(&file_manager, "Null").unwrap(),
            None
        );

        data().save(&file_manager).unwrap();
        assert!(file_manager.does_file_exist("LocalData/Null.pso_cache"));
        assert_eq!(
            PipelineStateObjectCacheData::load(&file_manager, "Null").unwrap(),
            Some(data())
        );
        assert_eq!(
            PipelineStateObjectCacheData::load(&file_manager, "Vulkan").unwrap(),
            None
        );
    }

    #[test]
    fn test_read_only_local_data() {
        let file_manager = MemoryFileManager::new("LocalData", false);
        assert!(data().save(&file_manager).is_err());
    }
}
