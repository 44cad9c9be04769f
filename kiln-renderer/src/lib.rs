//! Top level of `kiln`. `RendererRuntime` owns every manager of the lower crates, drives them once
//! per frame and persists the pipeline state object cache between runs.

mod renderer_runtime;
pub use renderer_runtime::RendererRuntime;

mod renderer_runtime_config;
pub use renderer_runtime_config::RendererRuntimeConfig;
