use super::shader_piece::{read_string, write_string};
use super::{is_dependency_settled, LoaderDispatchContext, LoaderTarget, ResourceLoader};
use crate::{ResourceId, ResourcePayload};
use kiln_api::RhiResult;
use kiln_base::file_format::{BinaryReader, FileFormatHeader};
use kiln_base::{AssetId, StringId};
use std::io;

pub const SHADER_BLUEPRINT_FORMAT_TYPE: u32 = StringId::new("ShaderBlueprint").0;
pub const SHADER_BLUEPRINT_FORMAT_VERSION: u32 = 1;

/// ```text
/// FileFormatHeader
/// number_of_included_shader_pieces: u32
/// included_shader_piece_asset_ids[number_of_included_shader_pieces]: u32
/// source_code_size: u32
/// source_code[source_code_size]: u8, UTF-8
/// ```
/// The included pieces are every piece reachable through `@includepiece`, so they can be loaded
/// before the blueprint is handed to the shader builder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderBlueprintFile {
    pub included_shader_piece_asset_ids: Vec<AssetId>,
    pub source_code: String,
}

impl ShaderBlueprintFile {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        FileFormatHeader::new(SHADER_BLUEPRINT_FORMAT_TYPE, SHADER_BLUEPRINT_FORMAT_VERSION)
            .write_to(&mut bytes)?;
        bytes.extend_from_slice(&(self.included_shader_piece_asset_ids.len() as u32).to_le_bytes());
        for asset_id in &self.included_shader_piece_asset_ids {
            bytes.extend_from_slice(&asset_id.0.to_le_bytes());
        }
        write_string(&mut bytes, &self.source_code);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        FileFormatHeader::read_expected(
            &mut reader,
            SHADER_BLUEPRINT_FORMAT_TYPE,
            SHADER_BLUEPRINT_FORMAT_VERSION,
        )?;
        let number_of_included_shader_pieces = reader.read_u32()? as usize;
        let included_shader_piece_asset_ids = reader
            .read_u32_array(number_of_included_shader_pieces)?
            .into_iter()
            .map(AssetId)
            .collect();
        Ok(ShaderBlueprintFile {
            included_shader_piece_asset_ids,
            source_code: read_string(&mut reader)?,
        })
    }
}

#[derive(Default)]
pub struct ShaderBlueprintResource {
    pub source_code: String,
    pub included_shader_piece_asset_ids: Vec<AssetId>,
    pub shader_piece_resource_ids: Vec<ResourceId>,
}

impl ResourcePayload for ShaderBlueprintResource {
    const RESOURCE_TYPE_NAME: &'static str = "shader blueprint";
    const DEFAULT_LOADER_TYPE_ID: StringId = ShaderBlueprintResourceLoader::TYPE_ID;

    fn create_resource_loader(
        loader_type_id: StringId,
        target: LoaderTarget<Self>,
    ) -> Option<ResourceLoader> {
        if loader_type_id == ShaderBlueprintResourceLoader::TYPE_ID {
            Some(ResourceLoader::ShaderBlueprint(
                ShaderBlueprintResourceLoader {
                    target,
                    resource: Default::default(),
                },
            ))
        } else {
            None
        }
    }
}

pub struct ShaderBlueprintResourceLoader {
    pub(super) target: LoaderTarget<ShaderBlueprintResource>,
    pub(super) resource: ShaderBlueprintResource,
}

impl ShaderBlueprintResourceLoader {
    pub const TYPE_ID: StringId = StringId::new("ShaderBlueprintResourceLoader");

    pub(super) fn on_deserialization(
        &mut self,
        bytes: &[u8],
    ) -> RhiResult<()> {
        let blueprint_file = ShaderBlueprintFile::from_bytes(bytes)?;
        self.resource.source_code = blueprint_file.source_code;
        self.resource.included_shader_piece_asset_ids =
            blueprint_file.included_shader_piece_asset_ids;
        Ok(())
    }

    pub(super) fn on_dispatch(
        &mut self,
        context: &LoaderDispatchContext,
    ) -> RhiResult<()> {
        let shader_piece_manager = &context.resource_managers.shader_piece_manager;
        self.resource.shader_piece_resource_ids = self
            .resource
            .included_shader_piece_asset_ids
            .iter()
            .map(|asset_id| {
                let resource_id =
                    shader_piece_manager.load_resource_by_asset_id(*asset_id, None, false, None);
                if !resource_id.is_valid() {
                    log::warn!(
                        "Shader blueprint {:?} includes shader piece {:?} which can't be loaded",
                        self.target.asset_id(),
                        asset_id
                    );
                }
                resource_id
            })
            .collect();
        Ok(())
    }

    pub(super) fn is_fully_loaded(
        &self,
        context: &LoaderDispatchContext,
    ) -> bool {
        self.resource
            .shader_piece_resource_ids
            .iter()
            .all(|resource_id| {
                is_dependency_settled(
                    &context.resource_managers.shader_piece_manager,
                    *resource_id,
                )
            })
    }
}
