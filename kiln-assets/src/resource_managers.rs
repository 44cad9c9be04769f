use crate::loaders::{
    MeshResource, ShaderBlueprintResource, ShaderPieceResource, SkeletonAnimationResource,
    SkeletonResource, TextureResource,
};
use crate::{AssetManager, ResourceManagerTemplate, ResourceStreamerTx};
use kiln_base::AssetId;
use serde::{Deserialize, Serialize};

pub type MeshResourceManager = ResourceManagerTemplate<MeshResource>;
pub type SkeletonResourceManager = ResourceManagerTemplate<SkeletonResource>;
pub type SkeletonAnimationResourceManager = ResourceManagerTemplate<SkeletonAnimationResource>;
pub type TextureResourceManager = ResourceManagerTemplate<TextureResource>;
pub type ShaderPieceResourceManager = ResourceManagerTemplate<ShaderPieceResource>;
pub type ShaderBlueprintResourceManager = ResourceManagerTemplate<ShaderBlueprintResource>;

/// Pool sizes are capped at 65535 resources per type
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePoolConfig {
    pub maximum_number_of_meshes: u32,
    pub maximum_number_of_skeletons: u32,
    pub maximum_number_of_skeleton_animations: u32,
    pub maximum_number_of_textures: u32,
    pub maximum_number_of_shader_pieces: u32,
    pub maximum_number_of_shader_blueprints: u32,
    /// Frames a released payload is kept alive for
    pub max_in_flight_frames: u32,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        ResourcePoolConfig {
            maximum_number_of_meshes: 4096,
            maximum_number_of_skeletons: 1024,
            maximum_number_of_skeleton_animations: 2048,
            maximum_number_of_textures: 4096,
            maximum_number_of_shader_pieces: 1024,
            maximum_number_of_shader_blueprints: 1024,
            max_in_flight_frames: 2,
        }
    }
}

/// One resource manager per resource type. Loaders reach the managers of their dependencies
/// through this.
#[derive(Clone)]
pub struct ResourceManagers {
    pub mesh_manager: MeshResourceManager,
    pub skeleton_manager: SkeletonResourceManager,
    pub skeleton_animation_manager: SkeletonAnimationResourceManager,
    pub texture_manager: TextureResourceManager,
    pub shader_piece_manager: ShaderPieceResourceManager,
    pub shader_blueprint_manager: ShaderBlueprintResourceManager,
}

impl ResourceManagers {
    pub fn new(
        asset_manager: &AssetManager,
        streamer_tx: &ResourceStreamerTx,
        config: &ResourcePoolConfig,
    ) -> Self {
        let max_in_flight_frames = config.max_in_flight_frames;
        let resource_managers = ResourceManagers {
            mesh_manager: ResourceManagerTemplate::new(
                asset_manager,
                streamer_tx,
                config.maximum_number_of_meshes,
                max_in_flight_frames,
            ),
            skeleton_manager: ResourceManagerTemplate::new(
                asset_manager,
                streamer_tx,
                config.maximum_number_of_skeletons,
                max_in_flight_frames,
            ),
            skeleton_animation_manager: ResourceManagerTemplate::new(
                asset_manager,
                streamer_tx,
                config.maximum_number_of_skeleton_animations,
                max_in_flight_frames,
            ),
            texture_manager: ResourceManagerTemplate::new(
                asset_manager,
                streamer_tx,
                config.maximum_number_of_textures,
                max_in_flight_frames,
            ),
            shader_piece_manager: ResourceManagerTemplate::new(
                asset_manager,
                streamer_tx,
                config.maximum_number_of_shader_pieces,
                max_in_flight_frames,
            ),
            shader_blueprint_manager: ResourceManagerTemplate::new(
                asset_manager,
                streamer_tx,
                config.maximum_number_of_shader_blueprints,
                max_in_flight_frames,
            ),
        };

        // Pipeline states built from reloaded shader sources must be rebuilt
        resource_managers.shader_piece_manager.enable_reload_tracking();
        resource_managers
            .shader_blueprint_manager
            .enable_reload_tracking();
        resource_managers
    }

    /// Shader pieces and blueprints whose content was replaced since the last call
    pub fn take_reloaded_shader_asset_ids(&self) -> Vec<AssetId> {
        let mut asset_ids = self.shader_piece_manager.take_reloaded_asset_ids();
        asset_ids.extend(self.shader_blueprint_manager.take_reloaded_asset_ids());
        asset_ids.sort_unstable();
        asset_ids.dedup();
        asset_ids
    }

    /// Advances the drop sink of every manager
    pub fn on_frame_complete(&self) {
        self.mesh_manager.on_frame_complete();
        self.skeleton_manager.on_frame_complete();
        self.skeleton_animation_manager.on_frame_complete();
        self.texture_manager.on_frame_complete();
        self.shader_piece_manager.on_frame_complete();
        self.shader_blueprint_manager.on_frame_complete();
    }

    pub fn number_of_resources(&self) -> u32 {
        self.mesh_manager.number_of_resources()
            + self.skeleton_manager.number_of_resources()
            + self.skeleton_animation_manager.number_of_resources()
            + self.texture_manager.number_of_resources()
            + self.shader_piece_manager.number_of_resources()
            + self.shader_blueprint_manager.number_of_resources()
    }
}
