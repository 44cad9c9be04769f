//! Streams resources from asset packages into per type resource pools. Files are read and decoded
//! on worker threads, RHI objects are created when the owning thread dispatches.

mod asset_manager;
pub use asset_manager::Asset;
pub use asset_manager::AssetManager;
pub use asset_manager::AssetPackage;

mod resource;
pub use resource::LoadingState;
pub use resource::PooledResource;
pub use resource::ResourceCore;
pub use resource::ResourceId;
pub use resource::ResourceListener;
pub use resource::ResourcePayload;

mod resource_manager;
pub use resource_manager::ResourceManagerTemplate;

mod resource_streamer;
pub use resource_streamer::LoadRequest;
pub use resource_streamer::LoadRequestState;
pub use resource_streamer::ResourceStreamer;
pub use resource_streamer::ResourceStreamerConfig;
pub use resource_streamer::ResourceStreamerTx;

mod resource_managers;
pub use resource_managers::MeshResourceManager;
pub use resource_managers::ResourceManagers;
pub use resource_managers::ResourcePoolConfig;
pub use resource_managers::ShaderBlueprintResourceManager;
pub use resource_managers::ShaderPieceResourceManager;
pub use resource_managers::SkeletonAnimationResourceManager;
pub use resource_managers::SkeletonResourceManager;
pub use resource_managers::TextureResourceManager;

pub mod loaders;

mod shader_source_provider;
pub use shader_source_provider::AssetShaderSourceProvider;
