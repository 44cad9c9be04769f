mod shader_properties;
pub use shader_properties::ShaderProperties;

mod shader_builder;
pub use shader_builder::BuildShader;
pub use shader_builder::ShaderBuilder;
pub use shader_builder::ShaderSourceProvider;

mod shader_cache;
pub use shader_cache::shader_cache_id;
pub use shader_cache::ShaderCacheId;
pub use shader_cache::ShaderCacheManager;
pub use shader_cache::ShaderCacheRecord;

mod signature;
pub use signature::ComputePipelineStateSignature;
pub use signature::GraphicsPipelineStateSignature;
pub use signature::PipelineStateSignature;
pub use signature::PipelineStateSignatureId;

mod pipeline_state_cache;
pub use pipeline_state_cache::PipelineStateCache;
pub use pipeline_state_cache::PipelineStateCacheState;

mod pipeline_state_compiler;
pub use pipeline_state_compiler::ComputePipelineStateCompiler;
pub use pipeline_state_compiler::GraphicsPipelineStateCompiler;
pub use pipeline_state_compiler::PipelineStateCompiler;
pub use pipeline_state_compiler::PipelineStateCompilerConfig;

mod pipeline_state_cache_manager;
pub use pipeline_state_cache_manager::ComputePipelineStateCacheManager;
pub use pipeline_state_cache_manager::GraphicsPipelineStateCacheManager;
pub use pipeline_state_cache_manager::PipelineStateCacheManager;

mod pipeline_state_object_cache;
pub use pipeline_state_object_cache::PipelineStateObjectCacheData;
pub use pipeline_state_object_cache::PIPELINE_STATE_CACHE_FORMAT_TYPE;
pub use pipeline_state_object_cache::PIPELINE_STATE_CACHE_FORMAT_VERSION;
