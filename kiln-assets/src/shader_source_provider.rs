use crate::loaders::{ShaderBlueprintResource, ShaderPieceResource};
use crate::{LoadingState, ResourceManagerTemplate, ResourcePayload};
use kiln_base::AssetId;
use kiln_framework::ShaderSourceProvider;

fn loaded_source<T: ResourcePayload, F: FnOnce(&T) -> String>(
    manager: &ResourceManagerTemplate<T>,
    asset_id: AssetId,
    f: F,
) -> Option<String> {
    let resource_id = manager.get_resource_by_asset_id(asset_id)?;
    if manager.loading_state(resource_id)? != LoadingState::Loaded {
        return None;
    }
    manager.with_resource(resource_id, f)
}

/// Feeds the shader builder from loaded shader blueprint and shader piece resources. Sources of
/// resources that aren't loaded yet are reported as missing.
pub struct AssetShaderSourceProvider {
    shader_blueprint_manager: ResourceManagerTemplate<ShaderBlueprintResource>,
    shader_piece_manager: ResourceManagerTemplate<ShaderPieceResource>,
}

impl AssetShaderSourceProvider {
    pub fn new(
        shader_blueprint_manager: &ResourceManagerTemplate<ShaderBlueprintResource>,
        shader_piece_manager: &ResourceManagerTemplate<ShaderPieceResource>,
    ) -> Self {
        AssetShaderSourceProvider {
            shader_blueprint_manager: shader_blueprint_manager.clone(),
            shader_piece_manager: shader_piece_manager.clone(),
        }
    }
}

impl ShaderSourceProvider for AssetShaderSourceProvider {
    fn shader_blueprint_source(
        &self,
        asset_id: AssetId,
    ) -> Option<String> {
        loaded_source(&self.shader_blueprint_manager, asset_id, |x| {
            x.source_code.clone()
        })
    }

    fn shader_piece_source(
        &self,
        asset_id: AssetId,
    ) -> Option<String> {
        loaded_source(&self.shader_piece_manager, asset_id, |x| x.source_code.clone())
    }

    // A loaded blueprint implies every included piece settled
    fn is_shader_blueprint_ready(
        &self,
        asset_id: AssetId,
    ) -> bool {
        self.shader_blueprint_manager
            .get_resource_by_asset_id(asset_id)
            .and_then(|resource_id| self.shader_blueprint_manager.loading_state(resource_id))
            == Some(LoadingState::Loaded)
    }
}
