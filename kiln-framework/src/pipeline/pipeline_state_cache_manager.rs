use super::{
    ComputePipelineStateSignature, GraphicsPipelineStateSignature, PipelineStateCache,
    PipelineStateCacheState, PipelineStateCompiler, PipelineStateSignature,
    PipelineStateSignatureId,
};
use fnv::FnvHashMap;
use kiln_api::RhiPipeline;
use kiln_base::AssetId;
use std::sync::Arc;

/// Owns every pipeline state cache entry of one pipeline type. `get_pipeline_state` never blocks
/// on a compile while asynchronous compilation is enabled: it hands out a fallback pipeline state
/// (or nothing) until the real one is resolved.
pub struct PipelineStateCacheManager<S: PipelineStateSignature> {
    compiler: PipelineStateCompiler<S>,
    caches: FnvHashMap<PipelineStateSignatureId, PipelineStateCache<S>>,
    // Pipeline states of invalidated entries, handed out until the new entry resolves
    previous_pipelines: FnvHashMap<PipelineStateSignatureId, Arc<RhiPipeline>>,
    dirty: bool,
}

pub type GraphicsPipelineStateCacheManager =
    PipelineStateCacheManager<GraphicsPipelineStateSignature>;
pub type ComputePipelineStateCacheManager =
    PipelineStateCacheManager<ComputePipelineStateSignature>;

impl<S: PipelineStateSignature> PipelineStateCacheManager<S> {
    pub fn new(compiler: PipelineStateCompiler<S>) -> Self {
        PipelineStateCacheManager {
            compiler,
            caches: Default::default(),
            previous_pipelines: Default::default(),
            dirty: false,
        }
    }

    pub fn compiler(&self) -> &PipelineStateCompiler<S> {
        &self.compiler
    }

    pub fn compiler_mut(&mut self) -> &mut PipelineStateCompiler<S> {
        &mut self.compiler
    }

    pub fn number_of_pipeline_state_caches(&self) -> usize {
        self.caches.len()
    }

    pub fn pipeline_state_cache(
        &self,
        signature_id: PipelineStateSignatureId,
    ) -> Option<&PipelineStateCache<S>> {
        self.caches.get(&signature_id)
    }

    /// Set when a new pipeline state was requested since the last save
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Returns the pipeline state for the signature, queueing a compile the first time it is
    /// seen. A resolved pipeline state is returned even while its shaders reload. Returns `None`
    /// while the shader blueprints are still loading, after the compile failed, or while
    /// compiling if no fallback is available.
    #[profiling::function]
    pub fn get_pipeline_state(
        &mut self,
        signature: &S,
    ) -> Option<Arc<RhiPipeline>> {
        let signature_id = signature.signature_id();
        if let Some(cache) = self.caches.get(&signature_id).cloned() {
            if cache.signature() != signature {
                log::warn!(
                    "{} pipeline state signature id {} collides with another signature",
                    S::PIPELINE_TYPE_NAME,
                    signature_id
                );
                return None;
            }

            if let Some(pipeline) = cache.pipeline() {
                self.previous_pipelines.remove(&signature_id);
                return Some(pipeline);
            }

            // Pending after an invalidation or while a shader source was missing
            if matches!(cache.state(), PipelineStateCacheState::Pending)
                && self.are_shader_blueprints_ready(signature)
            {
                self.compiler.add_asynchronous_compiler_request(&cache);
                if let Some(pipeline) = cache.pipeline() {
                    self.previous_pipelines.remove(&signature_id);
                    return Some(pipeline);
                }
            }

            if cache.is_failed() {
                self.previous_pipelines.remove(&signature_id);
                return None;
            }

            return self
                .previous_pipelines
                .get(&signature_id)
                .cloned()
                .or_else(|| self.fallback_pipeline_state(signature));
        }

        if !self.are_shader_blueprints_ready(signature) {
            return None;
        }

        let cache = PipelineStateCache::new(signature.clone());
        self.caches.insert(signature_id, cache.clone());
        self.dirty = true;

        // Compiles inline when asynchronous compilation is disabled
        self.compiler.add_asynchronous_compiler_request(&cache);
        cache
            .pipeline()
            .or_else(|| self.fallback_pipeline_state(signature))
    }

    fn are_shader_blueprints_ready(
        &self,
        signature: &S,
    ) -> bool {
        let source_provider = self.compiler.shader_source_provider();
        signature
            .shader_blueprints()
            .iter()
            .all(|(_, asset_id)| source_provider.is_shader_blueprint_ready(*asset_id))
    }

    /// Call after shader blueprints or shader pieces were reloaded. Every entry built from one of
    /// them, and every failed entry, is replaced by a new one that is queued for compiling right
    /// away if its blueprints are loaded, else on next use. A replaced pipeline state keeps being
    /// handed out until its successor resolves.
    pub fn invalidate_shader_assets(
        &mut self,
        shader_asset_ids: &[AssetId],
    ) -> usize {
        if shader_asset_ids.is_empty() {
            return 0;
        }

        let mut replacements = Vec::new();
        for cache in self.caches.values_mut() {
            let is_affected = cache.is_failed()
                || shader_asset_ids
                    .iter()
                    .any(|asset_id| cache.references_shader_asset(*asset_id));
            if !is_affected {
                continue;
            }

            // An in flight compile of the old entry resolves the old entry only
            if let Some(pipeline) = cache.pipeline() {
                self.previous_pipelines
                    .insert(cache.signature_id(), pipeline);
            }
            *cache = PipelineStateCache::new(cache.signature().clone());
            replacements.push(cache.clone());
        }

        for cache in &replacements {
            if self.are_shader_blueprints_ready(cache.signature()) {
                self.compiler.add_asynchronous_compiler_request(cache);
            }
        }

        let invalidated = replacements.len();
        if invalidated > 0 {
            log::debug!(
                "Invalidated {} {} pipeline states after shader reloads",
                invalidated,
                S::PIPELINE_TYPE_NAME
            );
        }
        invalidated
    }

    /// Any resolved pipeline state that can stand in for the signature
    pub fn fallback_pipeline_state(
        &self,
        signature: &S,
    ) -> Option<Arc<RhiPipeline>> {
        let fallback_key = signature.fallback_key();
        self.caches
            .values()
            .filter(|cache| cache.signature().fallback_key() == fallback_key)
            .find_map(|cache| cache.pipeline())
    }

    /// Queue compiles for signatures restored from disk so they are ready before first use
    pub fn warm_up(
        &mut self,
        signatures: Vec<S>,
    ) {
        let mut queued = 0;
        for signature in signatures {
            let signature_id = signature.signature_id();
            if self.caches.contains_key(&signature_id) {
                continue;
            }

            let cache = PipelineStateCache::new(signature);
            self.caches.insert(signature_id, cache.clone());
            self.compiler.add_asynchronous_compiler_request(&cache);
            queued += 1;
        }

        log::debug!(
            "Warming up {} {} pipeline states",
            queued,
            S::PIPELINE_TYPE_NAME
        );
    }

    /// Signatures of every resolved entry, ordered by signature id
    pub fn resolved_signatures(&self) -> Vec<S> {
        let mut resolved: Vec<_> = self
            .caches
            .values()
            .filter(|cache| cache.is_resolved())
            .collect();
        resolved.sort_by_key(|cache| cache.signature_id());
        resolved
            .into_iter()
            .map(|cache| cache.signature().clone())
            .collect()
    }

    pub fn dispatch(&self) -> usize {
        self.compiler.dispatch()
    }

    pub fn flush_all_queues(&self) {
        self.compiler.flush_all_queues();
    }
}
