//! Mid level of `kiln`. Builds and caches pipeline state objects on background threads, owns the
//! per frame instance buffers and caches shared RHI objects like root signatures and resource
//! groups.

pub mod pipeline;
pub use pipeline::ComputePipelineStateCacheManager;
pub use pipeline::ComputePipelineStateCompiler;
pub use pipeline::ComputePipelineStateSignature;
pub use pipeline::GraphicsPipelineStateCacheManager;
pub use pipeline::GraphicsPipelineStateCompiler;
pub use pipeline::GraphicsPipelineStateSignature;
pub use pipeline::PipelineStateCompilerConfig;
pub use pipeline::ShaderCacheManager;
pub use pipeline::ShaderProperties;
pub use pipeline::ShaderSourceProvider;

pub mod resources;
pub use resources::RendererResourceManager;
pub use resources::RendererResourceManagerConfig;

pub mod instance_buffers;
pub use instance_buffers::InstanceBufferConfig;
pub use instance_buffers::TextureInstanceBufferManager;
pub use instance_buffers::UniformInstanceBufferManager;
