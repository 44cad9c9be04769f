use kiln_api::{RhiError, RhiResult};
use kiln_assets::{ResourcePoolConfig, ResourceStreamerConfig};
use kiln_framework::{InstanceBufferConfig, PipelineStateCompilerConfig, RendererResourceManagerConfig};
use serde::{Deserialize, Serialize};

/// Everything tunable about a `RendererRuntime`. Missing fields take their default, so a config
/// file only needs to list what it changes:
///
/// ```text
/// (
///     resource_streamer: (maximum_number_of_dispatches_per_frame: 32),
///     pipeline_state_compiler: (number_of_compiler_threads: 4),
/// )
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererRuntimeConfig {
    pub resource_streamer: ResourceStreamerConfig,
    pub resource_pools: ResourcePoolConfig,
    pub pipeline_state_compiler: PipelineStateCompilerConfig,
    pub instance_buffers: InstanceBufferConfig,
    pub renderer_resource_manager: RendererResourceManagerConfig,
    /// Load the pipeline state object cache on startup and save it on shutdown
    pub pipeline_state_object_cache_enabled: bool,
}

impl Default for RendererRuntimeConfig {
    fn default() -> Self {
        RendererRuntimeConfig {
            resource_streamer: Default::default(),
            resource_pools: Default::default(),
            pipeline_state_compiler: Default::default(),
            instance_buffers: Default::default(),
            renderer_resource_manager: Default::default(),
            pipeline_state_object_cache_enabled: true,
        }
    }
}

impl RendererRuntimeConfig {
    pub fn from_ron_str(ron_str: &str) -> RhiResult<Self> {
        ron::de::from_str(ron_str).map_err(|e| RhiError::SerializationError(e.to_string()))
    }

    pub fn to_ron_string(&self) -> RhiResult<String> {
        ron::ser::to_string_pretty(self, Default::default())
            .map_err(|e| RhiError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_config() {
        let config = RendererRuntimeConfig::from_ron_str(
            "(
                resource_streamer: (maximum_number_of_dispatches_per_frame: 32),
                pipeline_state_compiler: (number_of_compiler_threads: 4),
                pipeline_state_object_cache_enabled: false,
            )",
        )
        .unwrap();
        assert_eq!(config.resource_streamer.maximum_number_of_dispatches_per_frame, 32);
        assert_eq!(config.resource_streamer.number_of_worker_threads, 2);
        assert_eq!(config.pipeline_state_compiler.number_of_compiler_threads, 4);
        assert!(config.pipeline_state_compiler.asynchronous_compilation_enabled);
        assert!(!config.pipeline_state_object_cache_enabled);
        assert_eq!(config.resource_pools.max_in_flight_frames, 2);

        let written = config.to_ron_string().unwrap();
        let reread = RendererRuntimeConfig::from_ron_str(&written).unwrap();
        assert_eq!(reread.pipeline_state_compiler.number_of_compiler_threads, 4);

        assert!(matches!(
            RendererRuntimeConfig::from_ron_str("(resource_streamer: 7)"),
            Err(RhiError::SerializationError(_))
        ));
    }
}
