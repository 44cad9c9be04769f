use fnv::FnvHashMap;
use kiln_api::{
    RhiDeviceContext, RhiGroupResource, RhiResourceGroup, RhiResourceGroupDef, RhiResult,
    RhiRootSignature, RhiRootSignatureDef,
};
use kiln_base::{Fnv1a32Hasher, ResourceDropSink};
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererResourceManagerConfig {
    /// Garbage collection runs every N frames and frees groups that weren't requested for N frames
    pub garbage_collection_interval_frames: u32,
    pub max_in_flight_frames: u32,
}

impl Default for RendererResourceManagerConfig {
    fn default() -> Self {
        RendererResourceManagerConfig {
            garbage_collection_interval_frames: 60,
            max_in_flight_frames: 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RendererResourceManagerMetrics {
    pub cached_resource_groups: usize,
    pub cached_root_signatures: usize,
    pub retired_resource_groups: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct ResourceHash(u32);

impl ResourceHash {
    fn from_key<KeyT: Hash>(key: &KeyT) -> ResourceHash {
        ResourceHash(Fnv1a32Hasher::hash_of(key))
    }
}

struct CachedResource<T> {
    resource: Arc<T>,
    last_used_frame: u64,
}

struct RendererResourceManagerInner {
    device_context: RhiDeviceContext,
    config: RendererResourceManagerConfig,
    root_signatures: FnvHashMap<ResourceHash, CachedResource<RhiRootSignature>>,
    resource_groups: FnvHashMap<ResourceHash, CachedResource<RhiResourceGroup>>,
    drop_sink: ResourceDropSink<Arc<RhiResourceGroup>>,
    frame_index: u64,
}

impl Drop for RendererResourceManagerInner {
    fn drop(&mut self) {
        self.drop_sink.destroy();
    }
}

/// Caches RHI objects that many users share: root signatures keyed by their definition and
/// resource groups keyed by the root signature, root parameter index and bound resources.
/// Resource groups nobody holds on to anymore are freed by periodic garbage collection.
#[derive(Clone)]
pub struct RendererResourceManager {
    inner: Arc<Mutex<RendererResourceManagerInner>>,
}

impl RendererResourceManager {
    pub fn new(
        device_context: &RhiDeviceContext,
        config: &RendererResourceManagerConfig,
    ) -> Self {
        RendererResourceManager {
            inner: Arc::new(Mutex::new(RendererResourceManagerInner {
                device_context: device_context.clone(),
                config: config.clone(),
                root_signatures: Default::default(),
                resource_groups: Default::default(),
                drop_sink: ResourceDropSink::new(config.max_in_flight_frames),
                frame_index: 0,
            })),
        }
    }

    pub fn device_context(&self) -> RhiDeviceContext {
        self.inner.lock().unwrap().device_context.clone()
    }

    pub fn get_or_create_root_signature(
        &self,
        root_signature_def: &RhiRootSignatureDef,
    ) -> RhiResult<Arc<RhiRootSignature>> {
        let hash = ResourceHash::from_key(root_signature_def);
        let mut inner = self.inner.lock().unwrap();
        let frame_index = inner.frame_index;
        if let Some(cached) = inner.root_signatures.get_mut(&hash) {
            // Guard against a hash collision handing out the wrong layout
            if cached.resource.root_signature_def() == root_signature_def {
                cached.last_used_frame = frame_index;
                return Ok(cached.resource.clone());
            }
            log::warn!("Root signature hash collision on {:?}", hash);
        }

        log::trace!("Creating root signature {:?}", hash);
        let root_signature = Arc::new(
            inner
                .device_context
                .create_root_signature(root_signature_def)?,
        );
        inner.root_signatures.insert(
            hash,
            CachedResource {
                resource: root_signature.clone(),
                last_used_frame: frame_index,
            },
        );
        Ok(root_signature)
    }

    pub fn get_or_create_resource_group(
        &self,
        root_signature: &Arc<RhiRootSignature>,
        root_parameter_index: u32,
        resources: &[RhiGroupResource],
    ) -> RhiResult<Arc<RhiResourceGroup>> {
        let resource_ids: Vec<_> = resources.iter().map(|x| x.object_id()).collect();
        let hash = ResourceHash::from_key(&(
            root_signature.object_id(),
            root_parameter_index,
            &resource_ids,
        ));

        let mut inner = self.inner.lock().unwrap();
        let frame_index = inner.frame_index;
        if let Some(cached) = inner.resource_groups.get_mut(&hash) {
            let matches = cached.resource.root_parameter_index() == root_parameter_index
                && cached
                    .resource
                    .resources()
                    .iter()
                    .map(|x| x.object_id())
                    .eq(resource_ids.iter().copied());
            if matches {
                cached.last_used_frame = frame_index;
                return Ok(cached.resource.clone());
            }
            log::warn!("Resource group hash collision on {:?}", hash);
        }

        log::trace!(
            "Creating resource group {:?} for root parameter {}",
            hash,
            root_parameter_index
        );
        let resource_group = Arc::new(inner.device_context.create_resource_group(
            &RhiResourceGroupDef {
                root_signature,
                root_parameter_index,
                resources,
            },
        )?);
        inner.resource_groups.insert(
            hash,
            CachedResource {
                resource: resource_group.clone(),
                last_used_frame: frame_index,
            },
        );
        Ok(resource_group)
    }

    /// Call once per frame. Every `garbage_collection_interval_frames` frames, resource groups
    /// that only the cache still references and that weren't requested during the interval are
    /// retired. They are dropped once the GPU can no longer be using them.
    #[profiling::function]
    pub fn garbage_collection(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.frame_index += 1;

        let interval = inner.config.garbage_collection_interval_frames.max(1) as u64;
        if inner.frame_index % interval != 0 {
            return;
        }

        let oldest_kept_frame = inner.frame_index.saturating_sub(interval);
        let mut retired = Vec::new();
        inner.resource_groups.retain(|_, cached| {
            let unused = Arc::strong_count(&cached.resource) == 1
                && cached.last_used_frame < oldest_kept_frame;
            if unused {
                retired.push(cached.resource.clone());
            }
            !unused
        });

        if !retired.is_empty() {
            log::debug!("Garbage collected {} resource groups", retired.len());
        }

        for resource_group in retired {
            inner.drop_sink.retire(resource_group);
        }
    }

    pub fn on_frame_complete(&self) {
        self.inner.lock().unwrap().drop_sink.on_frame_complete();
    }

    pub fn metrics(&self) -> RendererResourceManagerMetrics {
        let inner = self.inner.lock().unwrap();
        RendererResourceManagerMetrics {
            cached_resource_groups: inner.resource_groups.len(),
            cached_root_signatures: inner.root_signatures.len(),
            retired_resource_groups: inner.drop_sink.number_of_retired_resources(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_api::null::RhiDeviceContextNull;
    use kiln_api::{
        RhiBufferDef, RhiDescriptorType, RhiRootParameter, RhiShaderStageFlags,
    };

    fn root_signature_def() -> RhiRootSignatureDef {
        RhiRootSignatureDef {
            parameters: vec![RhiRootParameter {
                descriptor_type: RhiDescriptorType::UniformBuffer,
                shader_visibility: RhiShaderStageFlags::ALL_GRAPHICS,
                descriptor_count: 1,
            }],
        }
    }

    #[test]
    fn test_root_signatures_are_shared() {
        let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
        let manager = RendererResourceManager::new(&device_context, &Default::default());

        let a = manager
            .get_or_create_root_signature(&root_signature_def())
            .unwrap();
        let b = manager
            .get_or_create_root_signature(&root_signature_def())
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.metrics().cached_root_signatures, 1);
    }

    #[test]
    fn test_unused_resource_groups_are_collected() {
        let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
        let null = device_context.null_device_context().unwrap().clone();
        let config = RendererResourceManagerConfig {
            garbage_collection_interval_frames: 2,
            max_in_flight_frames: 1,
        };
        let manager = RendererResourceManager::new(&device_context, &config);

        let root_signature = manager
            .get_or_create_root_signature(&root_signature_def())
            .unwrap();
        let buffer = Arc::new(
            device_context
                .create_buffer(&RhiBufferDef::for_dynamic_uniform_buffer(64))
                .unwrap(),
        );
        let resources = [RhiGroupResource::Buffer(buffer)];

        let held = manager
            .get_or_create_resource_group(&root_signature, 0, &resources)
            .unwrap();
        let again = manager
            .get_or_create_resource_group(&root_signature, 0, &resources)
            .unwrap();
        assert!(Arc::ptr_eq(&held, &again));
        drop(again);

        // Still referenced, survives collection
        for _ in 0..4 {
            manager.garbage_collection();
        }
        assert_eq!(manager.metrics().cached_resource_groups, 1);

        drop(held);
        for _ in 0..4 {
            manager.garbage_collection();
        }
        let metrics = manager.metrics();
        assert_eq!(metrics.cached_resource_groups, 0);
        assert_eq!(metrics.retired_resource_groups, 1);
        assert_eq!(null.stats().live_resource_groups, 1);

        manager.on_frame_complete();
        manager.on_frame_complete();
        assert_eq!(null.stats().live_resource_groups, 1);
        manager.on_frame_complete();
        assert_eq!(null.stats().live_resource_groups, 0);
    }
}
