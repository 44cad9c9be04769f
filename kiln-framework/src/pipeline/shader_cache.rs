use fnv::FnvHashMap;
use kiln_api::{RhiDeviceContext, RhiResult, RhiShader, RhiShaderStage};
use kiln_base::Fnv1a32Hasher;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Hash of the stage and the exact final source text
pub type ShaderCacheId = u32;

pub fn shader_cache_id(
    stage: RhiShaderStage,
    source_code: &str,
) -> ShaderCacheId {
    Fnv1a32Hasher::hash_of(&(stage, source_code))
}

/// Persisted form of a shader cache
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderCacheRecord {
    pub shader_cache_id: ShaderCacheId,
    pub stage: RhiShaderStage,
    pub source_code: String,
    pub bytecode: Option<Vec<u8>>,
}

struct ShaderCache {
    record: ShaderCacheRecord,
    shader: Option<Arc<RhiShader>>,
}

#[derive(Default)]
struct ShaderCacheManagerInner {
    caches: FnvHashMap<ShaderCacheId, ShaderCache>,
    dirty: bool,
}

/// Shares compiled shaders between every pipeline state that ends up with the same source. Safe
/// to use from the compiler threads.
#[derive(Clone, Default)]
pub struct ShaderCacheManager {
    inner: Arc<Mutex<ShaderCacheManagerInner>>,
}

impl ShaderCacheManager {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn number_of_shader_caches(&self) -> usize {
        self.inner.lock().unwrap().caches.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().unwrap().dirty
    }

    pub fn clear_dirty(&self) {
        self.inner.lock().unwrap().dirty = false;
    }

    /// Returns the existing shader for this source, else creates one from cached bytecode, else
    /// compiles it. Compilation happens without holding the lock.
    pub fn get_or_create_shader(
        &self,
        device_context: &RhiDeviceContext,
        stage: RhiShaderStage,
        source_code: &str,
    ) -> RhiResult<(ShaderCacheId, Arc<RhiShader>)> {
        let shader_cache_id = shader_cache_id(stage, source_code);

        let cached_bytecode = {
            let inner = self.inner.lock().unwrap();
            match inner.caches.get(&shader_cache_id) {
                Some(cache) if cache.record.source_code == source_code => {
                    if let Some(shader) = &cache.shader {
                        return Ok((shader_cache_id, shader.clone()));
                    }
                    cache.record.bytecode.clone()
                }
                Some(_) => {
                    log::warn!(
                        "Shader cache {} collides with different source, recompiling",
                        shader_cache_id
                    );
                    None
                }
                None => None,
            }
        };

        if let Some(bytecode) = cached_bytecode {
            match device_context.create_shader_from_bytecode(stage, &bytecode) {
                Ok(shader) => {
                    log::trace!("Created shader {} from cached bytecode", shader_cache_id);
                    let shader = self.insert(
                        shader_cache_id,
                        stage,
                        source_code,
                        Some(bytecode),
                        shader,
                        false,
                    );
                    return Ok((shader_cache_id, shader));
                }
                Err(error) => log::warn!(
                    "Cached bytecode of shader {} is unusable, recompiling: {}",
                    shader_cache_id,
                    error
                ),
            }
        }

        profiling::scope!("compile shader");
        let (bytecode, shader) = if device_context.device_info().supports_shader_bytecode {
            let bytecode = device_context.compile_shader_to_bytecode(stage, source_code)?;
            let shader = device_context.create_shader_from_bytecode(stage, &bytecode)?;
            (Some(bytecode), shader)
        } else {
            let shader = device_context.create_shader_from_source_code(stage, source_code)?;
            (None, shader)
        };

        log::trace!("Compiled {:?} shader {}", stage, shader_cache_id);
        let shader = self.insert(shader_cache_id, stage, source_code, bytecode, shader, true);
        Ok((shader_cache_id, shader))
    }

    // Another thread may have finished the same source first, in which case its shader wins
    fn insert(
        &self,
        shader_cache_id: ShaderCacheId,
        stage: RhiShaderStage,
        source_code: &str,
        bytecode: Option<Vec<u8>>,
        shader: RhiShader,
        mark_dirty: bool,
    ) -> Arc<RhiShader> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cache) = inner.caches.get(&shader_cache_id) {
            if let (Some(existing), true) = (&cache.shader, cache.record.source_code == source_code)
            {
                return existing.clone();
            }
        }

        let shader = Arc::new(shader);
        inner.caches.insert(
            shader_cache_id,
            ShaderCache {
                record: ShaderCacheRecord {
                    shader_cache_id,
                    stage,
                    source_code: source_code.to_string(),
                    bytecode,
                },
                shader: Some(shader.clone()),
            },
        );
        inner.dirty |= mark_dirty;
        shader
    }

    /// Snapshot of every shader cache for persisting
    pub fn records(&self) -> Vec<ShaderCacheRecord> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<_> = inner
            .caches
            .values()
            .map(|cache| cache.record.clone())
            .collect();
        records.sort_by_key(|record| record.shader_cache_id);
        records
    }

    /// Adds persisted records. Shaders are created from their bytecode the first time they are
    /// requested. Existing caches are kept.
    pub fn restore(
        &self,
        records: Vec<ShaderCacheRecord>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let mut restored = 0;
        for record in records {
            if shader_cache_id(record.stage, &record.source_code) != record.shader_cache_id {
                log::warn!(
                    "Skipping persisted shader cache {} with mismatching id",
                    record.shader_cache_id
                );
                continue;
            }

            inner
                .caches
                .entry(record.shader_cache_id)
                .or_insert_with(|| {
                    restored += 1;
                    ShaderCache {
                        record,
                        shader: None,
                    }
                });
        }
        log::debug!("Restored {} shader caches", restored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_api::null::{RhiDeviceContextNull, RhiNullDeviceConfig};

    const VERTEX_SOURCE: &str = "void main() { gl_Position = vec4(0.0); }";

    #[test]
    fn test_same_source_shares_shader() {
        let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
        let null = device_context.null_device_context().unwrap().clone();
        let manager = ShaderCacheManager::new();

        let (id_a, a) = manager
            .get_or_create_shader(&device_context, RhiShaderStage::Vertex, VERTEX_SOURCE)
            .unwrap();
        let (id_b, b) = manager
            .get_or_create_shader(&device_context, RhiShaderStage::Vertex, VERTEX_SOURCE)
            .unwrap();
        assert_eq!(id_a, id_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(null.stats().shader_compilations, 1);
        assert!(manager.is_dirty());

        // Same text for another stage is another shader
        let (id_c, _) = manager
            .get_or_create_shader(&device_context, RhiShaderStage::Fragment, VERTEX_SOURCE)
            .unwrap();
        assert_ne!(id_a, id_c);
        assert_eq!(manager.number_of_shader_caches(), 2);
    }

    #[test]
    fn test_restored_bytecode_skips_compilation() {
        let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
        let manager = ShaderCacheManager::new();
        manager
            .get_or_create_shader(&device_context, RhiShaderStage::Vertex, VERTEX_SOURCE)
            .unwrap();
        let records = manager.records();
        assert!(records[0].bytecode.is_some());

        let restarted = RhiDeviceContextNull::create_device_context(&Default::default());
        let null = restarted.null_device_context().unwrap().clone();
        let restored_manager = ShaderCacheManager::new();
        restored_manager.restore(records);
        assert!(!restored_manager.is_dirty());

        restored_manager
            .get_or_create_shader(&restarted, RhiShaderStage::Vertex, VERTEX_SOURCE)
            .unwrap();
        let stats = null.stats();
        assert_eq!(stats.shader_compilations, 0);
        assert_eq!(stats.shaders_created_from_bytecode, 1);
        assert!(!restored_manager.is_dirty());
    }

    #[test]
    fn test_without_bytecode_support() {
        let device_context = RhiDeviceContextNull::create_device_context(&RhiNullDeviceConfig {
            supports_shader_bytecode: false,
            ..Default::default()
        });
        let manager = ShaderCacheManager::new();
        manager
            .get_or_create_shader(&device_context, RhiShaderStage::Compute, "void main() {}")
            .unwrap();
        assert_eq!(manager.records()[0].bytecode, None);
    }

    #[test]
    fn test_compile_failure_is_not_cached() {
        let device_context = RhiDeviceContextNull::create_device_context(&Default::default());
        let manager = ShaderCacheManager::new();
        let result = manager.get_or_create_shader(
            &device_context,
            RhiShaderStage::Fragment,
            "void main() {\n#error missing semicolon\n}",
        );
        assert!(result.is_err());
        assert_eq!(manager.number_of_shader_caches(), 0);
    }
}
