use crate::RendererRuntimeConfig;
use kiln_api::{RhiDeviceContext, RhiResult};
use kiln_assets::{
    AssetManager, AssetShaderSourceProvider, LoadingState, ResourceManagers, ResourceStreamer,
    ShaderBlueprintResourceManager,
};
use kiln_base::FileManager;
use kiln_framework::pipeline::{
    PipelineStateCompiler, PipelineStateObjectCacheData, PipelineStateSignature,
};
use kiln_framework::{
    ComputePipelineStateCacheManager, ComputePipelineStateSignature,
    GraphicsPipelineStateCacheManager, GraphicsPipelineStateSignature, RendererResourceManager,
    ShaderCacheManager, ShaderSourceProvider, TextureInstanceBufferManager,
    UniformInstanceBufferManager,
};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WarmUpReadiness {
    Ready,
    Waiting,
    Unavailable,
}

fn warm_up_readiness<S: PipelineStateSignature>(
    shader_blueprint_manager: &ShaderBlueprintResourceManager,
    signature: &S,
) -> WarmUpReadiness {
    let mut readiness = WarmUpReadiness::Ready;
    for (_, asset_id) in signature.shader_blueprints() {
        let loading_state = shader_blueprint_manager
            .get_resource_by_asset_id(asset_id)
            .and_then(|resource_id| shader_blueprint_manager.loading_state(resource_id));
        match loading_state {
            Some(LoadingState::Loaded) => {}
            Some(LoadingState::Loading) | Some(LoadingState::Unloaded) => {
                readiness = WarmUpReadiness::Waiting;
            }
            Some(LoadingState::Failed) | Some(LoadingState::Unloading) | None => {
                return WarmUpReadiness::Unavailable;
            }
        }
    }
    readiness
}

// Signatures restored from the pipeline state object cache wait here until their shader
// blueprints are loaded
struct PendingWarmUp<S: PipelineStateSignature> {
    signatures: Vec<S>,
}

impl<S: PipelineStateSignature> Default for PendingWarmUp<S> {
    fn default() -> Self {
        PendingWarmUp {
            signatures: Default::default(),
        }
    }
}

impl<S: PipelineStateSignature> PendingWarmUp<S> {
    fn take_ready(
        &mut self,
        shader_blueprint_manager: &ShaderBlueprintResourceManager,
    ) -> Vec<S> {
        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        for signature in self.signatures.drain(..) {
            match warm_up_readiness(shader_blueprint_manager, &signature) {
                WarmUpReadiness::Ready => ready.push(signature),
                WarmUpReadiness::Waiting => waiting.push(signature),
                WarmUpReadiness::Unavailable => log::debug!(
                    "Skipping warm up of {} pipeline state {}, its shader blueprints can't be loaded",
                    S::PIPELINE_TYPE_NAME,
                    signature.signature_id()
                ),
            }
        }
        self.signatures = waiting;
        ready
    }
}

/// Owns and wires every manager: the resource streamer and resource managers, the shader cache,
/// both pipeline state cache managers with their compilers, the instance buffer managers and the
/// renderer resource manager.
///
/// Call `update` once per frame on the thread that created the runtime and `on_frame_complete`
/// once the frame was presented.
pub struct RendererRuntime {
    config: RendererRuntimeConfig,
    device_context: RhiDeviceContext,
    file_manager: Arc<dyn FileManager>,
    asset_manager: AssetManager,
    resource_streamer: ResourceStreamer,
    resource_managers: ResourceManagers,
    renderer_resource_manager: RendererResourceManager,
    shader_cache_manager: ShaderCacheManager,
    graphics_pipeline_state_cache_manager: GraphicsPipelineStateCacheManager,
    compute_pipeline_state_cache_manager: ComputePipelineStateCacheManager,
    uniform_instance_buffer_manager: UniformInstanceBufferManager,
    texture_instance_buffer_manager: TextureInstanceBufferManager,
    pending_graphics_warm_up: PendingWarmUp<GraphicsPipelineStateSignature>,
    pending_compute_warm_up: PendingWarmUp<ComputePipelineStateSignature>,
    frame_index: u64,
}

impl RendererRuntime {
    pub fn new(
        device_context: &RhiDeviceContext,
        file_manager: Arc<dyn FileManager>,
        asset_manager: &AssetManager,
        config: &RendererRuntimeConfig,
    ) -> Self {
        let resource_streamer =
            ResourceStreamer::new(device_context, file_manager.clone(), &config.resource_streamer);
        let resource_managers = ResourceManagers::new(
            asset_manager,
            &resource_streamer.tx(),
            &config.resource_pools,
        );
        let renderer_resource_manager =
            RendererResourceManager::new(device_context, &config.renderer_resource_manager);
        let shader_cache_manager = ShaderCacheManager::new();
        let source_provider: Arc<dyn ShaderSourceProvider> =
            Arc::new(AssetShaderSourceProvider::new(
                &resource_managers.shader_blueprint_manager,
                &resource_managers.shader_piece_manager,
            ));

        let graphics_pipeline_state_cache_manager =
            GraphicsPipelineStateCacheManager::new(PipelineStateCompiler::new(
                &renderer_resource_manager,
                &shader_cache_manager,
                source_provider.clone(),
                &config.pipeline_state_compiler,
            ));
        let compute_pipeline_state_cache_manager =
            ComputePipelineStateCacheManager::new(PipelineStateCompiler::new(
                &renderer_resource_manager,
                &shader_cache_manager,
                source_provider,
                &config.pipeline_state_compiler,
            ));

        let uniform_instance_buffer_manager =
            UniformInstanceBufferManager::new(&renderer_resource_manager, &config.instance_buffers);
        let texture_instance_buffer_manager =
            TextureInstanceBufferManager::new(&renderer_resource_manager, &config.instance_buffers);

        let mut renderer_runtime = RendererRuntime {
            config: config.clone(),
            device_context: device_context.clone(),
            file_manager,
            asset_manager: asset_manager.clone(),
            resource_streamer,
            resource_managers,
            renderer_resource_manager,
            shader_cache_manager,
            graphics_pipeline_state_cache_manager,
            compute_pipeline_state_cache_manager,
            uniform_instance_buffer_manager,
            texture_instance_buffer_manager,
            pending_graphics_warm_up: Default::default(),
            pending_compute_warm_up: Default::default(),
            frame_index: 0,
        };

        if config.pipeline_state_object_cache_enabled {
            if let Err(e) = renderer_runtime.load_pipeline_state_object_cache() {
                log::error!("Failed to load the pipeline state object cache: {}", e);
            }
        }

        log::info!(
            "Created renderer runtime for the {} backend",
            device_context.backend_name()
        );
        renderer_runtime
    }

    pub fn config(&self) -> &RendererRuntimeConfig {
        &self.config
    }

    pub fn device_context(&self) -> &RhiDeviceContext {
        &self.device_context
    }

    pub fn file_manager(&self) -> &Arc<dyn FileManager> {
        &self.file_manager
    }

    pub fn asset_manager(&self) -> &AssetManager {
        &self.asset_manager
    }

    pub fn resource_streamer(&self) -> &ResourceStreamer {
        &self.resource_streamer
    }

    pub fn resource_managers(&self) -> &ResourceManagers {
        &self.resource_managers
    }

    pub fn renderer_resource_manager(&self) -> &RendererResourceManager {
        &self.renderer_resource_manager
    }

    pub fn shader_cache_manager(&self) -> &ShaderCacheManager {
        &self.shader_cache_manager
    }

    pub fn graphics_pipeline_state_cache_manager(&self) -> &GraphicsPipelineStateCacheManager {
        &self.graphics_pipeline_state_cache_manager
    }

    pub fn graphics_pipeline_state_cache_manager_mut(
        &mut self
    ) -> &mut GraphicsPipelineStateCacheManager {
        &mut self.graphics_pipeline_state_cache_manager
    }

    pub fn compute_pipeline_state_cache_manager(&self) -> &ComputePipelineStateCacheManager {
        &self.compute_pipeline_state_cache_manager
    }

    pub fn compute_pipeline_state_cache_manager_mut(
        &mut self
    ) -> &mut ComputePipelineStateCacheManager {
        &mut self.compute_pipeline_state_cache_manager
    }

    pub fn uniform_instance_buffer_manager_mut(&mut self) -> &mut UniformInstanceBufferManager {
        &mut self.uniform_instance_buffer_manager
    }

    pub fn texture_instance_buffer_manager_mut(&mut self) -> &mut TextureInstanceBufferManager {
        &mut self.texture_instance_buffer_manager
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Once per frame, before recording. Dispatches loaded resources and compiled pipeline
    /// states, and collects unused resource groups.
    #[profiling::function]
    pub fn update(&mut self) {
        self.resource_streamer.dispatch(&self.resource_managers);
        self.invalidate_reloaded_shaders();
        self.dispatch_warm_up();
        self.graphics_pipeline_state_cache_manager.dispatch();
        self.compute_pipeline_state_cache_manager.dispatch();
        self.renderer_resource_manager.garbage_collection();
    }

    /// Once the GPU finished a frame. Advances every drop sink.
    pub fn on_frame_complete(&mut self) {
        self.resource_managers.on_frame_complete();
        self.renderer_resource_manager.on_frame_complete();
        self.frame_index += 1;
    }

    /// Blocks until every resource load and pipeline state compile requested so far finished
    #[profiling::function]
    pub fn flush_all_queues(&mut self) {
        self.resource_streamer
            .flush_all_queues(&self.resource_managers);
        self.invalidate_reloaded_shaders();
        self.dispatch_warm_up();
        self.graphics_pipeline_state_cache_manager
            .flush_all_queues();
        self.compute_pipeline_state_cache_manager
            .flush_all_queues();
    }

    // Pipeline states built from reloaded shader blueprints or pieces are compiled again
    fn invalidate_reloaded_shaders(&mut self) {
        let reloaded = self.resource_managers.take_reloaded_shader_asset_ids();
        if reloaded.is_empty() {
            return;
        }

        log::info!("Rebuilding pipeline states of {} reloaded shader assets", reloaded.len());
        self.graphics_pipeline_state_cache_manager
            .invalidate_shader_assets(&reloaded);
        self.compute_pipeline_state_cache_manager
            .invalidate_shader_assets(&reloaded);
    }

    fn dispatch_warm_up(&mut self) {
        let shader_blueprint_manager = &self.resource_managers.shader_blueprint_manager;
        let graphics_signatures = self
            .pending_graphics_warm_up
            .take_ready(shader_blueprint_manager);
        if !graphics_signatures.is_empty() {
            self.graphics_pipeline_state_cache_manager
                .warm_up(graphics_signatures);
        }

        let compute_signatures = self
            .pending_compute_warm_up
            .take_ready(shader_blueprint_manager);
        if !compute_signatures.is_empty() {
            self.compute_pipeline_state_cache_manager
                .warm_up(compute_signatures);
        }
    }

    fn request_shader_blueprints<S: PipelineStateSignature>(
        &self,
        signatures: &[S],
    ) {
        for signature in signatures {
            for (_, asset_id) in signature.shader_blueprints() {
                self.resource_managers
                    .shader_blueprint_manager
                    .load_resource_by_asset_id(asset_id, None, false, None);
            }
        }
    }

    /// Something was compiled that the saved cache doesn't know about
    pub fn is_pipeline_state_object_cache_dirty(&self) -> bool {
        self.shader_cache_manager.is_dirty()
            || self.graphics_pipeline_state_cache_manager.is_dirty()
            || self.compute_pipeline_state_cache_manager.is_dirty()
    }

    /// Restores the shader caches and queues a warm up of every persisted pipeline state. Only
    /// done for backends with shader bytecode. Returns `Ok(false)` if there was nothing to load.
    pub fn load_pipeline_state_object_cache(&mut self) -> RhiResult<bool> {
        if !self.device_context.device_info().supports_shader_bytecode {
            log::debug!(
                "The {} backend has no shader bytecode, not loading the pipeline state object cache",
                self.device_context.backend_name()
            );
            return Ok(false);
        }

        let data = match PipelineStateObjectCacheData::load(
            &*self.file_manager,
            self.device_context.backend_name(),
        )? {
            Some(data) => data,
            None => return Ok(false),
        };

        self.shader_cache_manager.restore(data.shader_caches);
        self.request_shader_blueprints(&data.graphics_signatures);
        self.request_shader_blueprints(&data.compute_signatures);
        self.pending_graphics_warm_up
            .signatures
            .extend(data.graphics_signatures);
        self.pending_compute_warm_up
            .signatures
            .extend(data.compute_signatures);
        Ok(true)
    }

    /// Flushes and writes the pipeline state object cache. Skipped if local data isn't writable or
    /// nothing changed since the last save, in which case `Ok(false)` is returned.
    pub fn save_pipeline_state_object_cache(&mut self) -> RhiResult<bool> {
        if !self.file_manager.is_local_data_writable() {
            log::debug!("Local data isn't writable, not saving the pipeline state object cache");
            return Ok(false);
        }

        if !self.is_pipeline_state_object_cache_dirty() {
            return Ok(false);
        }

        self.flush_all_queues();

        // Signatures still waiting for a warm up are kept for the next run
        let mut graphics_signatures = self
            .graphics_pipeline_state_cache_manager
            .resolved_signatures();
        graphics_signatures.extend(self.pending_graphics_warm_up.signatures.iter().cloned());
        let mut compute_signatures = self
            .compute_pipeline_state_cache_manager
            .resolved_signatures();
        compute_signatures.extend(self.pending_compute_warm_up.signatures.iter().cloned());

        let data = PipelineStateObjectCacheData {
            rhi_backend_name: self.device_context.backend_name().to_string(),
            shader_caches: self.shader_cache_manager.records(),
            graphics_signatures,
            compute_signatures,
        };
        data.save(&*self.file_manager)?;

        self.shader_cache_manager.clear_dirty();
        self.graphics_pipeline_state_cache_manager.clear_dirty();
        self.compute_pipeline_state_cache_manager.clear_dirty();
        Ok(true)
    }
}

impl Drop for RendererRuntime {
    fn drop(&mut self) {
        if self.config.pipeline_state_object_cache_enabled {
            if let Err(e) = self.save_pipeline_state_object_cache() {
                log::error!("Failed to save the pipeline state object cache: {}", e);
            }
        }

        // Nothing may be in use by the GPU once the drop sinks are destroyed
        if let Err(e) = self.device_context.wait_for_device_idle() {
            log::error!("Failed to wait for the device to go idle: {}", e);
        }
        log::info!("Destroyed renderer runtime after {} frames", self.frame_index);
    }
}
