use super::{PipelineStateSignature, PipelineStateSignatureId, ShaderCacheId};
use kiln_api::RhiPipeline;
use kiln_base::AssetId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub enum PipelineStateCacheState {
    Pending,
    Compiling,
    Resolved(Arc<RhiPipeline>),
    Failed,
}

struct PipelineStateCacheInner<S: PipelineStateSignature> {
    signature: S,
    signature_id: PipelineStateSignatureId,
    state: Mutex<PipelineStateCacheState>,
    shader_cache_ids: Mutex<Vec<ShaderCacheId>>,
    // Blueprints and pieces the last build read from
    included_asset_ids: Mutex<Vec<AssetId>>,
    // Set while a compiler request for this entry exists
    compile_in_flight: AtomicBool,
}

/// One pipeline state object and the signature it was built from. Cloning shares the entry.
pub struct PipelineStateCache<S: PipelineStateSignature> {
    inner: Arc<PipelineStateCacheInner<S>>,
}

impl<S: PipelineStateSignature> Clone for PipelineStateCache<S> {
    fn clone(&self) -> Self {
        PipelineStateCache {
            inner: self.inner.clone(),
        }
    }
}

impl<S: PipelineStateSignature> PipelineStateCache<S> {
    pub fn new(signature: S) -> Self {
        let signature_id = signature.signature_id();
        PipelineStateCache {
            inner: Arc::new(PipelineStateCacheInner {
                signature,
                signature_id,
                state: Mutex::new(PipelineStateCacheState::Pending),
                shader_cache_ids: Default::default(),
                included_asset_ids: Default::default(),
                compile_in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn signature(&self) -> &S {
        &self.inner.signature
    }

    pub fn signature_id(&self) -> PipelineStateSignatureId {
        self.inner.signature_id
    }

    pub fn state(&self) -> PipelineStateCacheState {
        self.inner.state.lock().unwrap().clone()
    }

    pub fn pipeline(&self) -> Option<Arc<RhiPipeline>> {
        match &*self.inner.state.lock().unwrap() {
            PipelineStateCacheState::Resolved(pipeline) => Some(pipeline.clone()),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            *self.inner.state.lock().unwrap(),
            PipelineStateCacheState::Resolved(_)
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            *self.inner.state.lock().unwrap(),
            PipelineStateCacheState::Failed
        )
    }

    pub fn is_compile_in_flight(&self) -> bool {
        self.inner.compile_in_flight.load(Ordering::Acquire)
    }

    /// Shader caches the resolved pipeline state was built from
    pub fn shader_cache_ids(&self) -> Vec<ShaderCacheId> {
        self.inner.shader_cache_ids.lock().unwrap().clone()
    }

    /// True if the signature or the last build of this entry read from the shader asset
    pub fn references_shader_asset(
        &self,
        asset_id: AssetId,
    ) -> bool {
        self.inner
            .signature
            .shader_blueprints()
            .iter()
            .any(|(_, x)| *x == asset_id)
            || self
                .inner
                .included_asset_ids
                .lock()
                .unwrap()
                .contains(&asset_id)
    }

    pub(crate) fn set_included_asset_ids(
        &self,
        included_asset_ids: Vec<AssetId>,
    ) {
        *self.inner.included_asset_ids.lock().unwrap() = included_asset_ids;
    }

    /// Returns false if a compile is already in flight for this entry
    pub(crate) fn try_begin_compile(&self) -> bool {
        let began = self
            .inner
            .compile_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if began {
            *self.inner.state.lock().unwrap() = PipelineStateCacheState::Compiling;
        }
        began
    }

    pub(crate) fn resolve(
        &self,
        pipeline: Arc<RhiPipeline>,
        shader_cache_ids: Vec<ShaderCacheId>,
    ) {
        *self.inner.shader_cache_ids.lock().unwrap() = shader_cache_ids;
        *self.inner.state.lock().unwrap() = PipelineStateCacheState::Resolved(pipeline);
        self.inner.compile_in_flight.store(false, Ordering::Release);
    }

    // A shader source wasn't loaded yet, the next request compiles again
    pub(crate) fn retry_later(&self) {
        // Cleared first, whoever sees `Pending` may begin the next compile
        self.inner.compile_in_flight.store(false, Ordering::Release);
        *self.inner.state.lock().unwrap() = PipelineStateCacheState::Pending;
    }

    pub(crate) fn fail(&self) {
        *self.inner.state.lock().unwrap() = PipelineStateCacheState::Failed;
        self.inner.compile_in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ComputePipelineStateSignature, ShaderProperties};
    use kiln_base::AssetId;

    fn cache() -> PipelineStateCache<ComputePipelineStateSignature> {
        PipelineStateCache::new(ComputePipelineStateSignature {
            material_blueprint_asset_id: AssetId(1),
            root_signature: Default::default(),
            compute_shader_blueprint: AssetId(2),
            shader_properties: ShaderProperties::new(),
        })
    }

    #[test]
    fn test_only_one_compile_in_flight() {
        let cache = cache();
        assert!(matches!(cache.state(), PipelineStateCacheState::Pending));
        assert!(cache.try_begin_compile());
        assert!(!cache.clone().try_begin_compile());
        assert!(matches!(cache.state(), PipelineStateCacheState::Compiling));

        cache.fail();
        assert!(cache.is_failed());
        assert!(!cache.is_compile_in_flight());
        assert!(cache.pipeline().is_none());
    }

    #[test]
    fn test_retry_and_shader_asset_references() {
        let cache = cache();
        assert!(cache.references_shader_asset(AssetId(2)));
        assert!(!cache.references_shader_asset(AssetId(3)));
        cache.set_included_asset_ids(vec![AssetId(2), AssetId(3)]);
        assert!(cache.references_shader_asset(AssetId(3)));

        assert!(cache.try_begin_compile());
        cache.retry_later();
        assert!(matches!(cache.state(), PipelineStateCacheState::Pending));
        assert!(cache.try_begin_compile());
    }
}
