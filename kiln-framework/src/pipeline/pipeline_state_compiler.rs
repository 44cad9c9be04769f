use super::{
    ComputePipelineStateSignature, GraphicsPipelineStateSignature, PipelineStateCache,
    PipelineStateSignature, ShaderBuilder, ShaderCacheId, ShaderCacheManager,
    ShaderSourceProvider,
};
use crate::resources::RendererResourceManager;
use crossbeam_channel::{Receiver, Sender};
use kiln_api::{RhiDeviceContext, RhiError, RhiPipeline, RhiResult, RhiShader, RhiShaderStage};
use kiln_base::{ThreadPool, WorkQueue, WorkerThreads};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineStateCompilerConfig {
    pub number_of_compiler_threads: usize,
    /// When disabled every request is compiled on the calling thread
    pub asynchronous_compilation_enabled: bool,
    pub maximum_number_of_pipeline_dispatches_per_frame: usize,
}

impl Default for PipelineStateCompilerConfig {
    fn default() -> Self {
        PipelineStateCompilerConfig {
            number_of_compiler_threads: 2,
            asynchronous_compilation_enabled: true,
            maximum_number_of_pipeline_dispatches_per_frame: usize::MAX,
        }
    }
}

// Filled in stage by stage: builder thread, compiler thread, dispatch
struct CompilerRequest<S: PipelineStateSignature> {
    cache: PipelineStateCache<S>,
    shader_sources: Vec<(RhiShaderStage, String)>,
    shaders: Vec<(ShaderCacheId, Arc<RhiShader>)>,
}

impl<S: PipelineStateSignature> CompilerRequest<S> {
    fn new(cache: PipelineStateCache<S>) -> Self {
        CompilerRequest {
            cache,
            shader_sources: Default::default(),
            shaders: Default::default(),
        }
    }
}

struct CompilerShared<S: PipelineStateSignature> {
    device_context: RhiDeviceContext,
    shader_cache_manager: ShaderCacheManager,
    shader_builder: ShaderBuilder,
    builder_queue: WorkQueue<CompilerRequest<S>>,
    compiler_queue: WorkQueue<CompilerRequest<S>>,
    dispatch_tx: Sender<CompilerRequest<S>>,
    shutting_down: AtomicBool,
    number_of_in_flight_requests: AtomicUsize,
}

impl<S: PipelineStateSignature> CompilerShared<S> {
    // Also records which blueprints and pieces went into the entry
    fn build_shader_sources(
        &self,
        cache: &PipelineStateCache<S>,
    ) -> RhiResult<Vec<(RhiShaderStage, String)>> {
        let signature = cache.signature();
        let mut included_asset_ids = Vec::new();
        let mut shader_sources = Vec::new();
        for (stage, shader_blueprint_asset_id) in signature.shader_blueprints() {
            let shader = self
                .shader_builder
                .create_source_code(shader_blueprint_asset_id, signature.shader_properties())?;
            for asset_id in shader.included_asset_ids {
                if !included_asset_ids.contains(&asset_id) {
                    included_asset_ids.push(asset_id);
                }
            }
            shader_sources.push((stage, shader.source_code));
        }

        cache.set_included_asset_ids(included_asset_ids);
        Ok(shader_sources)
    }

    fn compile_shaders(
        &self,
        shader_sources: &[(RhiShaderStage, String)],
    ) -> RhiResult<Vec<(ShaderCacheId, Arc<RhiShader>)>> {
        shader_sources
            .iter()
            .map(|(stage, source_code)| {
                self.shader_cache_manager.get_or_create_shader(
                    &self.device_context,
                    *stage,
                    source_code,
                )
            })
            .collect()
    }

    fn process_builder_request(
        &self,
        mut request: CompilerRequest<S>,
    ) {
        profiling::scope!("build pipeline state shaders");
        match self.build_shader_sources(&request.cache) {
            Ok(shader_sources) => {
                request.shader_sources = shader_sources;
                self.compiler_queue.push(request);
            }
            Err(error) => self.fail_request(&request.cache, &error),
        }
    }

    fn process_compiler_request(
        &self,
        mut request: CompilerRequest<S>,
    ) {
        profiling::scope!("compile pipeline state shaders");
        match self.compile_shaders(&request.shader_sources) {
            Ok(shaders) => {
                request.shaders = shaders;
                // The receiver only goes away after the threads were joined
                let _ = self.dispatch_tx.send(request);
            }
            Err(error) => self.fail_request(&request.cache, &error),
        }
    }

    fn fail_request(
        &self,
        cache: &PipelineStateCache<S>,
        error: &RhiError,
    ) {
        if let RhiError::SourceNotReady(message) = error {
            log::debug!(
                "Postponing {} pipeline state {}: {}",
                S::PIPELINE_TYPE_NAME,
                cache.signature_id(),
                message
            );
            cache.retry_later();
        } else {
            log::error!(
                "Failed to compile {} pipeline state {} ({:?}): {}",
                S::PIPELINE_TYPE_NAME,
                cache.signature_id(),
                cache.signature().material_blueprint_asset_id(),
                error
            );
            cache.fail();
        }
        self.number_of_in_flight_requests
            .fetch_sub(1, Ordering::SeqCst);
    }
}

fn builder_thread_main<S: PipelineStateSignature>(
    shared: Arc<CompilerShared<S>>,
    shutdown_rx: Receiver<()>,
) {
    profiling::register_thread!();
    while let Some(request) = shared.builder_queue.pop_or_shutdown(&shutdown_rx) {
        if shared.shutting_down.load(Ordering::Acquire) {
            shared.builder_queue.complete_one();
            break;
        }

        shared.process_builder_request(request);
        shared.builder_queue.complete_one();
    }
}

fn compiler_thread_main<S: PipelineStateSignature>(
    shared: Arc<CompilerShared<S>>,
    shutdown_rx: Receiver<()>,
) {
    profiling::register_thread!();
    while let Some(request) = shared.compiler_queue.pop_or_shutdown(&shutdown_rx) {
        if shared.shutting_down.load(Ordering::Acquire) {
            shared.compiler_queue.complete_one();
            break;
        }

        shared.process_compiler_request(request);
        shared.compiler_queue.complete_one();
    }
}

/// Turns pipeline state caches into pipeline state objects without blocking the render thread.
///
/// Asynchronous requests flow through a builder thread that expands the shader blueprints, a
/// pool of compiler threads that compile the stages through the shader cache, and finally
/// `dispatch` on the render thread which creates the pipeline state and resolves the cache.
pub struct PipelineStateCompiler<S: PipelineStateSignature> {
    shared: Arc<CompilerShared<S>>,
    resource_manager: RendererResourceManager,
    dispatch_rx: Receiver<CompilerRequest<S>>,
    config: PipelineStateCompilerConfig,
    builder_thread: WorkerThreads,
    compiler_threads: WorkerThreads,
}

pub type GraphicsPipelineStateCompiler = PipelineStateCompiler<GraphicsPipelineStateSignature>;
pub type ComputePipelineStateCompiler = PipelineStateCompiler<ComputePipelineStateSignature>;

impl<S: PipelineStateSignature> PipelineStateCompiler<S> {
    pub fn new(
        resource_manager: &RendererResourceManager,
        shader_cache_manager: &ShaderCacheManager,
        source_provider: Arc<dyn ShaderSourceProvider>,
        config: &PipelineStateCompilerConfig,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(CompilerShared {
            device_context: resource_manager.device_context(),
            shader_cache_manager: shader_cache_manager.clone(),
            shader_builder: ShaderBuilder::new(source_provider),
            builder_queue: WorkQueue::new(),
            compiler_queue: WorkQueue::new(),
            dispatch_tx,
            shutting_down: AtomicBool::new(false),
            number_of_in_flight_requests: AtomicUsize::new(0),
        });

        let number_of_compiler_threads = config.number_of_compiler_threads.max(1);
        let builder_thread = WorkerThreads::spawn(
            &format!("{} pipeline builder", S::PIPELINE_TYPE_NAME),
            1,
            &shared,
            builder_thread_main::<S>,
        );
        let compiler_threads = WorkerThreads::spawn(
            &format!("{} pipeline compiler", S::PIPELINE_TYPE_NAME),
            number_of_compiler_threads,
            &shared,
            compiler_thread_main::<S>,
        );

        log::debug!(
            "Started {} pipeline state compiler with {} compiler threads",
            S::PIPELINE_TYPE_NAME,
            number_of_compiler_threads
        );

        PipelineStateCompiler {
            shared,
            resource_manager: resource_manager.clone(),
            dispatch_rx,
            config: PipelineStateCompilerConfig {
                number_of_compiler_threads,
                ..config.clone()
            },
            builder_thread,
            compiler_threads,
        }
    }

    pub fn device_context(&self) -> &RhiDeviceContext {
        &self.shared.device_context
    }

    pub fn shader_cache_manager(&self) -> &ShaderCacheManager {
        &self.shared.shader_cache_manager
    }

    pub fn shader_source_provider(&self) -> &Arc<dyn ShaderSourceProvider> {
        self.shared.shader_builder.source_provider()
    }

    pub fn config(&self) -> &PipelineStateCompilerConfig {
        &self.config
    }

    pub fn is_asynchronous_compilation_enabled(&self) -> bool {
        self.config.asynchronous_compilation_enabled
    }

    /// Disabling flushes everything still in flight
    pub fn set_asynchronous_compilation_enabled(
        &mut self,
        enabled: bool,
    ) {
        if !enabled {
            self.flush_all_queues();
        }
        self.config.asynchronous_compilation_enabled = enabled;
    }

    pub fn number_of_compiler_threads(&self) -> usize {
        self.config.number_of_compiler_threads
    }

    /// Recreates the compiler thread pool. Queued requests are picked up by the new threads.
    pub fn set_number_of_compiler_threads(
        &mut self,
        number_of_compiler_threads: usize,
    ) {
        let number_of_compiler_threads = number_of_compiler_threads.max(1);
        if number_of_compiler_threads == self.config.number_of_compiler_threads
            && self.compiler_threads.is_running()
        {
            return;
        }

        self.compiler_threads.stop();
        self.compiler_threads = WorkerThreads::spawn(
            &format!("{} pipeline compiler", S::PIPELINE_TYPE_NAME),
            number_of_compiler_threads,
            &self.shared,
            compiler_thread_main::<S>,
        );
        self.config.number_of_compiler_threads = number_of_compiler_threads;
        log::debug!(
            "{} pipeline state compiler now uses {} compiler threads",
            S::PIPELINE_TYPE_NAME,
            number_of_compiler_threads
        );
    }

    pub fn number_of_in_flight_compiler_requests(&self) -> usize {
        self.shared
            .number_of_in_flight_requests
            .load(Ordering::SeqCst)
    }

    /// Queue a compile of the cache entry. The caller guarantees no other compile of this entry is
    /// in flight.
    pub fn add_asynchronous_compiler_request(
        &self,
        cache: &PipelineStateCache<S>,
    ) {
        if !self.config.asynchronous_compilation_enabled {
            self.instant_synchronous_compiler_request(cache);
            return;
        }

        let began = cache.try_begin_compile();
        debug_assert!(
            began,
            "{} pipeline state {} already has a compile in flight",
            S::PIPELINE_TYPE_NAME,
            cache.signature_id()
        );
        if !began {
            log::error!(
                "Ignoring second compile request for {} pipeline state {}",
                S::PIPELINE_TYPE_NAME,
                cache.signature_id()
            );
            return;
        }

        log::trace!(
            "Queued {} pipeline state {}",
            S::PIPELINE_TYPE_NAME,
            cache.signature_id()
        );
        self.shared
            .number_of_in_flight_requests
            .fetch_add(1, Ordering::SeqCst);
        self.shared
            .builder_queue
            .push(CompilerRequest::new(cache.clone()));
    }

    /// Build, compile and create the pipeline state on the calling thread. Shader stages are
    /// compiled in parallel. Returns `None` if anything failed, the error is logged and the cache
    /// entry marked failed.
    #[profiling::function]
    pub fn instant_synchronous_compiler_request(
        &self,
        cache: &PipelineStateCache<S>,
    ) -> Option<Arc<RhiPipeline>> {
        let began = cache.try_begin_compile();
        debug_assert!(
            began,
            "{} pipeline state {} already has a compile in flight",
            S::PIPELINE_TYPE_NAME,
            cache.signature_id()
        );
        if !began {
            return cache.pipeline();
        }

        self.shared
            .number_of_in_flight_requests
            .fetch_add(1, Ordering::SeqCst);

        let result = self
            .shared
            .build_shader_sources(cache)
            .and_then(|shader_sources| self.compile_shaders_in_parallel(shader_sources))
            .and_then(|shaders| self.create_pipeline_state(cache, &shaders));

        match result {
            Ok(pipeline) => {
                self.shared
                    .number_of_in_flight_requests
                    .fetch_sub(1, Ordering::SeqCst);
                Some(pipeline)
            }
            Err(error) => {
                self.shared.fail_request(cache, &error);
                None
            }
        }
    }

    fn compile_shaders_in_parallel(
        &self,
        shader_sources: Vec<(RhiShaderStage, String)>,
    ) -> RhiResult<Vec<(ShaderCacheId, Arc<RhiShader>)>> {
        let mut thread_pool = ThreadPool::new("shader compiler", shader_sources.len());
        for (stage, source_code) in shader_sources {
            let device_context = self.shared.device_context.clone();
            let shader_cache_manager = self.shared.shader_cache_manager.clone();
            thread_pool.queue_task(move || {
                shader_cache_manager.get_or_create_shader(&device_context, stage, &source_code)
            });
        }

        thread_pool.process().into_iter().collect()
    }

    // Render thread only, creates the RHI objects and resolves the cache entry
    fn create_pipeline_state(
        &self,
        cache: &PipelineStateCache<S>,
        shaders: &[(ShaderCacheId, Arc<RhiShader>)],
    ) -> RhiResult<Arc<RhiPipeline>> {
        let signature = cache.signature();
        let root_signature = self
            .resource_manager
            .get_or_create_root_signature(signature.root_signature_def())?;
        let shader_refs: Vec<&RhiShader> = shaders.iter().map(|(_, shader)| &**shader).collect();
        let pipeline = Arc::new(signature.create_pipeline(
            &self.shared.device_context,
            &root_signature,
            &shader_refs,
        )?);

        cache.resolve(
            pipeline.clone(),
            shaders.iter().map(|(id, _)| *id).collect(),
        );
        log::trace!(
            "Resolved {} pipeline state {}",
            S::PIPELINE_TYPE_NAME,
            cache.signature_id()
        );
        Ok(pipeline)
    }

    /// Render thread, once per frame. Creates at most
    /// `maximum_number_of_pipeline_dispatches_per_frame` pipeline states and returns how many
    /// were handled.
    #[profiling::function]
    pub fn dispatch(&self) -> usize {
        self.dispatch_with_limit(self.config.maximum_number_of_pipeline_dispatches_per_frame)
    }

    fn dispatch_with_limit(
        &self,
        limit: usize,
    ) -> usize {
        let mut dispatched = 0;
        while dispatched < limit {
            let request = match self.dispatch_rx.try_recv() {
                Ok(request) => request,
                Err(_) => break,
            };

            match self.create_pipeline_state(&request.cache, &request.shaders) {
                Ok(_) => {
                    self.shared
                        .number_of_in_flight_requests
                        .fetch_sub(1, Ordering::SeqCst);
                }
                Err(error) => self.shared.fail_request(&request.cache, &error),
            }
            dispatched += 1;
        }

        dispatched
    }

    /// Blocks until every queued request went through the builder thread
    pub fn flush_builder_queue(&self) {
        profiling::scope!("flush_builder_queue");
        if !self.builder_thread.is_running() {
            while let Some(request) = self.shared.builder_queue.try_pop() {
                self.shared.process_builder_request(request);
                self.shared.builder_queue.complete_one();
            }
        }
        self.shared.builder_queue.wait_until_idle();
    }

    /// Blocks until every request that left the builder went through the compiler threads
    pub fn flush_compiler_queue(&self) {
        profiling::scope!("flush_compiler_queue");
        if !self.compiler_threads.is_running() {
            while let Some(request) = self.shared.compiler_queue.try_pop() {
                self.shared.process_compiler_request(request);
                self.shared.compiler_queue.complete_one();
            }
        }
        self.shared.compiler_queue.wait_until_idle();
    }

    /// Blocks until every request submitted so far is resolved, failed or postponed because a
    /// shader source wasn't loaded
    pub fn flush_all_queues(&self) {
        self.flush_builder_queue();
        self.flush_compiler_queue();
        self.dispatch_with_limit(usize::MAX);
    }
}

impl<S: PipelineStateSignature> Drop for PipelineStateCompiler<S> {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        self.builder_thread.stop();
        self.compiler_threads.stop();

        let dropped = self.shared.builder_queue.drain().len()
            + self.shared.compiler_queue.drain().len()
            + self.dispatch_rx.try_iter().count();
        if dropped > 0 {
            log::debug!(
                "Dropped {} queued {} pipeline state requests on shutdown",
                dropped,
                S::PIPELINE_TYPE_NAME
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::shader_builder::tests::TestShaderSourceProvider;
    use crate::pipeline::signature::tests::graphics_signature;
    use crate::pipeline::PipelineStateCacheState;
    use kiln_api::null::RhiDeviceContextNull;
    use kiln_base::AssetId;

    pub(crate) struct TestCompiler {
        pub(crate) device_context: RhiDeviceContext,
        pub(crate) resource_manager: RendererResourceManager,
        pub(crate) source_provider: Arc<TestShaderSourceProvider>,
        pub(crate) vertex_blueprint: AssetId,
        pub(crate) fragment_blueprint: AssetId,
    }

    impl TestCompiler {
        pub(crate) fn new() -> Self {
            let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
            let resource_manager = RendererResourceManager::new(&device_context, &Default::default());
            let source_provider = Arc::new(TestShaderSourceProvider::default());
            let vertex_blueprint = source_provider.add_blueprint(
                "Shaders/Lit_vs.asset",
                "void main() { gl_Position = vec4(@value(Variant)); }",
            );
            let fragment_blueprint =
                source_provider.add_blueprint("Shaders/Lit_fs.asset", "void main() { color = 1; }");
            TestCompiler {
                device_context,
                resource_manager,
                source_provider,
                vertex_blueprint,
                fragment_blueprint,
            }
        }

        pub(crate) fn compiler(
            &self,
            config: &PipelineStateCompilerConfig,
        ) -> GraphicsPipelineStateCompiler {
            PipelineStateCompiler::new(
                &self.resource_manager,
                &ShaderCacheManager::new(),
                self.source_provider.clone(),
                config,
            )
        }

        pub(crate) fn cache(
            &self,
            variant: i32,
        ) -> PipelineStateCache<GraphicsPipelineStateSignature> {
            let mut signature = graphics_signature(self.vertex_blueprint, self.fragment_blueprint);
            signature
                .shader_properties
                .set_property_value(kiln_base::StringId::new("Variant"), variant);
            PipelineStateCache::new(signature)
        }

        pub(crate) fn live_pipelines(&self) -> usize {
            self.device_context
                .null_device_context()
                .unwrap()
                .stats()
                .live_pipelines
        }
    }

    #[test]
    fn test_asynchronous_compile() {
        let _ = env_logger::builder().is_test(true).try_init();
        let test = TestCompiler::new();
        let compiler = test.compiler(&Default::default());

        let cache = test.cache(0);
        compiler.add_asynchronous_compiler_request(&cache);
        assert_eq!(compiler.number_of_in_flight_compiler_requests(), 1);
        assert!(cache.is_compile_in_flight());

        compiler.flush_all_queues();
        assert_eq!(compiler.number_of_in_flight_compiler_requests(), 0);
        assert!(cache.is_resolved());
        assert!(!cache.is_compile_in_flight());
        assert_eq!(cache.shader_cache_ids().len(), 2);
        assert_eq!(test.live_pipelines(), 1);
    }

    #[test]
    fn test_pipeline_states_only_created_at_dispatch() {
        let test = TestCompiler::new();
        let compiler = test.compiler(&PipelineStateCompilerConfig {
            maximum_number_of_pipeline_dispatches_per_frame: 1,
            ..Default::default()
        });

        let caches: Vec<_> = (0..3).map(|variant| test.cache(variant)).collect();
        for cache in &caches {
            compiler.add_asynchronous_compiler_request(cache);
        }
        compiler.flush_builder_queue();
        compiler.flush_compiler_queue();
        assert_eq!(test.live_pipelines(), 0);
        assert!(caches.iter().all(|cache| matches!(
            cache.state(),
            PipelineStateCacheState::Compiling
        )));

        assert_eq!(compiler.dispatch(), 1);
        assert_eq!(test.live_pipelines(), 1);
        assert_eq!(compiler.number_of_in_flight_compiler_requests(), 2);

        compiler.flush_all_queues();
        assert!(caches.iter().all(|cache| cache.is_resolved()));
        assert_eq!(compiler.number_of_in_flight_compiler_requests(), 0);
    }

    #[test]
    fn test_compile_failure_marks_cache_failed() {
        let test = TestCompiler::new();
        let compiler = test.compiler(&Default::default());
        let broken = test
            .source_provider
            .add_blueprint("Shaders/Broken.asset", "void main() {\n#error nope\n}");

        let signature = graphics_signature(test.vertex_blueprint, broken);
        let cache = PipelineStateCache::new(signature.clone());
        compiler.add_asynchronous_compiler_request(&cache);
        compiler.flush_all_queues();
        assert!(cache.is_failed());
        assert!(cache.pipeline().is_none());
        assert_eq!(compiler.number_of_in_flight_compiler_requests(), 0);

        let missing = graphics_signature(test.vertex_blueprint, AssetId(12345));
        assert!(compiler
            .instant_synchronous_compiler_request(&PipelineStateCache::new(missing))
            .is_none());
        assert_eq!(test.live_pipelines(), 0);
    }

    #[test]
    fn test_synchronous_compile() {
        let test = TestCompiler::new();
        let compiler = test.compiler(&Default::default());
        let cache = test.cache(0);
        let pipeline = compiler.instant_synchronous_compiler_request(&cache);
        assert!(pipeline.is_some());
        assert!(cache.is_resolved());
        assert_eq!(compiler.number_of_in_flight_compiler_requests(), 0);
    }

    #[test]
    fn test_resizing_compiler_pool_keeps_requests() {
        let test = TestCompiler::new();
        let mut compiler = test.compiler(&Default::default());
        let caches: Vec<_> = (0..8).map(|variant| test.cache(variant)).collect();
        for cache in &caches {
            compiler.add_asynchronous_compiler_request(cache);
        }

        compiler.set_number_of_compiler_threads(4);
        assert_eq!(compiler.number_of_compiler_threads(), 4);
        compiler.set_number_of_compiler_threads(0);
        assert_eq!(compiler.number_of_compiler_threads(), 1);

        compiler.flush_all_queues();
        assert!(caches.iter().all(|cache| cache.is_resolved()));
    }

    #[test]
    fn test_disabling_asynchronous_compilation_flushes() {
        let test = TestCompiler::new();
        let mut compiler = test.compiler(&Default::default());
        let queued = test.cache(0);
        compiler.add_asynchronous_compiler_request(&queued);

        compiler.set_asynchronous_compilation_enabled(false);
        assert!(queued.is_resolved());

        // Now handled inline
        let inline = test.cache(1);
        compiler.add_asynchronous_compiler_request(&inline);
        assert!(inline.is_resolved());
        assert_eq!(compiler.number_of_in_flight_compiler_requests(), 0);
    }
}
