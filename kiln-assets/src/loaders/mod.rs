//! Per resource type loaders and their file formats. Every file starts with a
//! `kiln_base::file_format::FileFormatHeader`, all values are little endian.
//!
//! Deserialization and processing run on the streamer's worker threads, dispatch runs on the
//! thread that owns the RHI device.

pub(crate) mod mesh;
pub use mesh::MeshFile;
pub use mesh::MeshResource;
pub use mesh::MeshResourceLoader;
pub use mesh::SubMesh;

pub(crate) mod skeleton;
pub use skeleton::SkeletonFile;
pub use skeleton::SkeletonResource;
pub use skeleton::SkeletonResourceLoader;

pub(crate) mod skeleton_animation;
pub use skeleton_animation::SkeletonAnimationFile;
pub use skeleton_animation::SkeletonAnimationResource;
pub use skeleton_animation::SkeletonAnimationResourceLoader;

pub(crate) mod texture;
pub use texture::TextureFile;
pub use texture::TextureResource;
pub use texture::TextureResourceLoader;

pub(crate) mod shader_piece;
pub use shader_piece::ShaderPieceFile;
pub use shader_piece::ShaderPieceResource;
pub use shader_piece::ShaderPieceResourceLoader;

pub(crate) mod shader_blueprint;
pub use shader_blueprint::ShaderBlueprintFile;
pub use shader_blueprint::ShaderBlueprintResource;
pub use shader_blueprint::ShaderBlueprintResourceLoader;

use crate::{ResourceId, ResourceManagerTemplate, ResourceManagers, ResourcePayload};
use kiln_api::{RhiDeviceContext, RhiResult};
use kiln_base::{AssetId, StringId};

pub type ResourceLoaderTypeId = StringId;

/// The resource a loader writes its result into, and the load it belongs to
pub struct LoaderTarget<T: ResourcePayload> {
    manager: ResourceManagerTemplate<T>,
    resource_id: ResourceId,
    asset_id: AssetId,
    load_epoch: u32,
}

impl<T: ResourcePayload> LoaderTarget<T> {
    pub(crate) fn new(
        manager: ResourceManagerTemplate<T>,
        resource_id: ResourceId,
        asset_id: AssetId,
        load_epoch: u32,
    ) -> Self {
        LoaderTarget {
            manager,
            resource_id,
            asset_id,
            load_epoch,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    pub fn load_epoch(&self) -> u32 {
        self.load_epoch
    }

    /// False once the resource was released or a newer load was accepted
    pub fn is_current(&self) -> bool {
        self.manager.load_epoch(self.resource_id) == Some(self.load_epoch)
    }

    pub(crate) fn complete(
        self,
        payload: T,
    ) -> bool {
        self.manager
            .finish_load(self.resource_id, self.load_epoch, Some(payload))
    }

    pub(crate) fn fail(self) {
        self.manager
            .finish_load(self.resource_id, self.load_epoch, None);
    }
}

/// Everything dispatch may touch on the owning thread
pub struct LoaderDispatchContext<'a> {
    pub device_context: &'a RhiDeviceContext,
    pub resource_managers: &'a ResourceManagers,
}

/// One in flight load, owned by exactly one streamer stage at a time
pub enum ResourceLoader {
    Mesh(MeshResourceLoader),
    Skeleton(SkeletonResourceLoader),
    SkeletonAnimation(SkeletonAnimationResourceLoader),
    Texture(TextureResourceLoader),
    ShaderPiece(ShaderPieceResourceLoader),
    ShaderBlueprint(ShaderBlueprintResourceLoader),
}

// Forwards to an operation every loader variant has
macro_rules! for_each_loader {
    ($self:expr, $loader:ident => $body:expr) => {
        match $self {
            ResourceLoader::Mesh($loader) => $body,
            ResourceLoader::Skeleton($loader) => $body,
            ResourceLoader::SkeletonAnimation($loader) => $body,
            ResourceLoader::Texture($loader) => $body,
            ResourceLoader::ShaderPiece($loader) => $body,
            ResourceLoader::ShaderBlueprint($loader) => $body,
        }
    };
}

impl ResourceLoader {
    pub fn loader_type_id(&self) -> ResourceLoaderTypeId {
        match self {
            ResourceLoader::Mesh(_) => MeshResourceLoader::TYPE_ID,
            ResourceLoader::Skeleton(_) => SkeletonResourceLoader::TYPE_ID,
            ResourceLoader::SkeletonAnimation(_) => SkeletonAnimationResourceLoader::TYPE_ID,
            ResourceLoader::Texture(_) => TextureResourceLoader::TYPE_ID,
            ResourceLoader::ShaderPiece(_) => ShaderPieceResourceLoader::TYPE_ID,
            ResourceLoader::ShaderBlueprint(_) => ShaderBlueprintResourceLoader::TYPE_ID,
        }
    }

    pub fn resource_type_name(&self) -> &'static str {
        match self {
            ResourceLoader::Mesh(_) => MeshResource::RESOURCE_TYPE_NAME,
            ResourceLoader::Skeleton(_) => SkeletonResource::RESOURCE_TYPE_NAME,
            ResourceLoader::SkeletonAnimation(_) => SkeletonAnimationResource::RESOURCE_TYPE_NAME,
            ResourceLoader::Texture(_) => TextureResource::RESOURCE_TYPE_NAME,
            ResourceLoader::ShaderPiece(_) => ShaderPieceResource::RESOURCE_TYPE_NAME,
            ResourceLoader::ShaderBlueprint(_) => ShaderBlueprintResource::RESOURCE_TYPE_NAME,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        for_each_loader!(self, loader => loader.target.resource_id())
    }

    pub fn is_current(&self) -> bool {
        for_each_loader!(self, loader => loader.target.is_current())
    }

    pub fn on_deserialization(
        &mut self,
        bytes: &[u8],
    ) -> RhiResult<()> {
        for_each_loader!(self, loader => loader.on_deserialization(bytes))
    }

    pub fn has_processing(&self) -> bool {
        matches!(
            self,
            ResourceLoader::Skeleton(_) | ResourceLoader::Texture(_)
        )
    }

    pub fn on_processing(&mut self) -> RhiResult<()> {
        match self {
            ResourceLoader::Skeleton(loader) => loader.on_processing(),
            ResourceLoader::Texture(loader) => loader.on_processing(),
            _ => Ok(()),
        }
    }

    pub fn on_dispatch(
        &mut self,
        context: &LoaderDispatchContext,
    ) -> RhiResult<()> {
        match self {
            ResourceLoader::Mesh(loader) => loader.on_dispatch(context),
            ResourceLoader::Texture(loader) => loader.on_dispatch(context),
            ResourceLoader::ShaderBlueprint(loader) => loader.on_dispatch(context),
            ResourceLoader::Skeleton(_)
            | ResourceLoader::SkeletonAnimation(_)
            | ResourceLoader::ShaderPiece(_) => Ok(()),
        }
    }

    /// Re-polled every dispatch until it returns true
    pub fn is_fully_loaded(
        &self,
        context: &LoaderDispatchContext,
    ) -> bool {
        match self {
            ResourceLoader::Mesh(loader) => loader.is_fully_loaded(context),
            ResourceLoader::ShaderBlueprint(loader) => loader.is_fully_loaded(context),
            _ => true,
        }
    }

    /// Hands the loaded payload to the resource. Returns false if the result was discarded because
    /// the load got superseded.
    pub(crate) fn finalize(self) -> bool {
        for_each_loader!(self, loader => loader.target.complete(loader.resource))
    }

    pub(crate) fn fail(self) {
        for_each_loader!(self, loader => loader.target.fail())
    }
}

// A terminal or released dependency no longer holds up the resource depending on it
fn is_dependency_settled<T: ResourcePayload>(
    manager: &ResourceManagerTemplate<T>,
    resource_id: ResourceId,
) -> bool {
    if !resource_id.is_valid() {
        return true;
    }

    manager
        .loading_state(resource_id)
        .map(|x| x.is_terminal())
        .unwrap_or(true)
}
