mod renderer_resource_manager;
pub use renderer_resource_manager::RendererResourceManager;
pub use renderer_resource_manager::RendererResourceManagerConfig;
pub use renderer_resource_manager::RendererResourceManagerMetrics;
