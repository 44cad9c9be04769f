use crate::loaders::{LoaderTarget, ResourceLoaderTypeId};
use crate::resource::{PooledResource, ResourceCore};
use crate::resource_streamer::{LoadRequest, ResourceStreamerTx};
use crate::{AssetManager, LoadingState, ResourceId, ResourceListener, ResourcePayload};
use fnv::FnvHashMap;
use kiln_api::{RhiError, RhiResult};
use kiln_base::slab::PackedElementPool;
use kiln_base::{AssetId, ResourceDropSink};
use std::sync::{Arc, Mutex};

struct ResourceManagerInner<T: ResourcePayload> {
    pool: PackedElementPool<PooledResource<T>>,
    asset_id_to_resource_id: FnvHashMap<AssetId, ResourceId>,
    // Released and replaced payloads wait here until the GPU is done with them
    drop_sink: ResourceDropSink<T>,
    // `None` unless reload tracking is enabled
    reloaded_asset_ids: Option<Vec<AssetId>>,
}

impl<T: ResourcePayload> Drop for ResourceManagerInner<T> {
    fn drop(&mut self) {
        // The owner waits for the device to go idle before tearing down the managers
        self.drop_sink.destroy();
    }
}

struct Notification {
    listeners: Vec<Arc<dyn ResourceListener>>,
    resource_id: ResourceId,
    asset_id: AssetId,
    loading_state: LoadingState,
}

impl Notification {
    fn new(
        core: &ResourceCore,
        listeners: Vec<Arc<dyn ResourceListener>>,
    ) -> Self {
        Notification {
            listeners,
            resource_id: core.resource_id,
            asset_id: core.asset_id,
            loading_state: core.loading_state,
        }
    }

    // The resource keeps no listeners afterwards
    fn take_listeners(core: &mut ResourceCore) -> Self {
        let listeners = std::mem::take(&mut core.listeners);
        Self::new(core, listeners)
    }

    // Must be called after the manager lock is released
    fn send(self) {
        for listener in self.listeners {
            listener.on_loading_state_change(self.resource_id, self.asset_id, self.loading_state);
        }
    }
}

/// Maps asset ids to pooled resources of one type and feeds load requests to the resource
/// streamer. Cloning shares the manager.
///
/// Ids are handed out as soon as the pool slot exists. The resource is visible from then on but
/// only usable once its loading state is `Loaded`.
pub struct ResourceManagerTemplate<T: ResourcePayload> {
    inner: Arc<Mutex<ResourceManagerInner<T>>>,
    asset_manager: AssetManager,
    streamer_tx: ResourceStreamerTx,
}

impl<T: ResourcePayload> Clone for ResourceManagerTemplate<T> {
    fn clone(&self) -> Self {
        ResourceManagerTemplate {
            inner: self.inner.clone(),
            asset_manager: self.asset_manager.clone(),
            streamer_tx: self.streamer_tx.clone(),
        }
    }
}

impl<T: ResourcePayload> ResourceManagerTemplate<T> {
    pub fn new(
        asset_manager: &AssetManager,
        streamer_tx: &ResourceStreamerTx,
        maximum_number_of_resources: u32,
        max_in_flight_frames: u32,
    ) -> Self {
        let inner = ResourceManagerInner {
            pool: PackedElementPool::new(T::RESOURCE_TYPE_NAME, maximum_number_of_resources),
            asset_id_to_resource_id: Default::default(),
            drop_sink: ResourceDropSink::new(max_in_flight_frames),
            reloaded_asset_ids: None,
        };

        ResourceManagerTemplate {
            inner: Arc::new(Mutex::new(inner)),
            asset_manager: asset_manager.clone(),
            streamer_tx: streamer_tx.clone(),
        }
    }

    /// Remember the assets of resources that finished a reload, see `take_reloaded_asset_ids`
    pub fn enable_reload_tracking(&self) {
        let mut guard = self.inner.lock().unwrap();
        if guard.reloaded_asset_ids.is_none() {
            guard.reloaded_asset_ids = Some(Vec::new());
        }
    }

    /// Assets whose loaded content was replaced since the last call, by a reload or a commit over
    /// earlier content. Always empty unless reload tracking is enabled.
    pub fn take_reloaded_asset_ids(&self) -> Vec<AssetId> {
        self.inner
            .lock()
            .unwrap()
            .reloaded_asset_ids
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn number_of_resources(&self) -> u32 {
        self.inner.lock().unwrap().pool.number_of_elements()
    }

    pub fn maximum_number_of_resources(&self) -> u32 {
        self.inner.lock().unwrap().pool.maximum_number_of_elements()
    }

    /// Ids of every live resource, in pool order
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.inner
            .lock()
            .unwrap()
            .pool
            .iter()
            .map(|x| x.core.resource_id)
            .collect()
    }

    pub fn get_resource_by_asset_id(
        &self,
        asset_id: AssetId,
    ) -> Option<ResourceId> {
        self.inner
            .lock()
            .unwrap()
            .asset_id_to_resource_id
            .get(&asset_id)
            .copied()
    }

    pub fn is_resource_id_valid(
        &self,
        resource_id: ResourceId,
    ) -> bool {
        self.inner.lock().unwrap().pool.is_element_id_valid(resource_id)
    }

    pub fn loading_state(
        &self,
        resource_id: ResourceId,
    ) -> Option<LoadingState> {
        self.inner
            .lock()
            .unwrap()
            .pool
            .try_get_element_by_id(resource_id)
            .map(|x| x.core.loading_state)
    }

    pub fn asset_id(
        &self,
        resource_id: ResourceId,
    ) -> Option<AssetId> {
        self.inner
            .lock()
            .unwrap()
            .pool
            .try_get_element_by_id(resource_id)
            .map(|x| x.core.asset_id)
    }

    pub(crate) fn load_epoch(
        &self,
        resource_id: ResourceId,
    ) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .pool
            .try_get_element_by_id(resource_id)
            .map(|x| x.core.load_epoch)
    }

    /// Runs `f` on the payload while the manager is locked. `f` must not call back into this
    /// manager.
    pub fn with_resource<R, F: FnOnce(&T) -> R>(
        &self,
        resource_id: ResourceId,
        f: F,
    ) -> Option<R> {
        self.inner
            .lock()
            .unwrap()
            .pool
            .try_get_element_by_id(resource_id)
            .map(|x| f(&x.payload))
    }

    /// Reserve a resource for procedurally created content. It stays `Unloaded` until
    /// `commit_resource` hands it a payload.
    pub fn create_empty_resource_by_asset_id(
        &self,
        asset_id: AssetId,
    ) -> RhiResult<ResourceId> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if let Some(resource_id) = inner.asset_id_to_resource_id.get(&asset_id) {
            return Err(format!(
                "There already is a {} resource {:?} for asset {:?}",
                T::RESOURCE_TYPE_NAME,
                resource_id,
                asset_id
            )
            .into());
        }

        let resource = inner.pool.add_element().ok_or_else(|| {
            RhiError::CapacityExhausted(format!(
                "No {} resource left for asset {:?}",
                T::RESOURCE_TYPE_NAME,
                asset_id
            ))
        })?;
        resource.core.asset_id = asset_id;
        let resource_id = resource.core.resource_id;
        inner.asset_id_to_resource_id.insert(asset_id, resource_id);
        Ok(resource_id)
    }

    /// Make a procedurally created payload the content of the resource and mark it `Loaded`
    pub fn commit_resource(
        &self,
        resource_id: ResourceId,
        payload: T,
    ) -> bool {
        let notification = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let resource = match inner.pool.try_get_element_by_id_mut(resource_id) {
                Some(resource) => resource,
                None => return false,
            };

            if std::mem::replace(&mut resource.core.has_loaded_content, true) {
                if let Some(reloaded_asset_ids) = &mut inner.reloaded_asset_ids {
                    reloaded_asset_ids.push(resource.core.asset_id);
                }
            }

            // Anything still in flight for this resource is outdated now
            resource.core.load_epoch = resource.core.load_epoch.wrapping_add(1);
            resource.core.loading_state = LoadingState::Loaded;
            let previous = std::mem::replace(&mut resource.payload, payload);
            let notification = Notification::new(&resource.core, resource.core.listeners.clone());
            inner.drop_sink.retire(previous);
            notification
        };
        notification.send();
        true
    }

    /// Returns the id of the resource for the asset, creating it and submitting a load request if
    /// it is new or `reload` is set. The returned resource is at least `Loading`.
    ///
    /// Returns `ResourceId::INVALID` and queues nothing if the asset is unknown or the pool is
    /// exhausted.
    #[profiling::function]
    pub fn load_resource_by_asset_id(
        &self,
        asset_id: AssetId,
        listener: Option<Arc<dyn ResourceListener>>,
        reload: bool,
        loader_type_id: Option<ResourceLoaderTypeId>,
    ) -> ResourceId {
        let existing_resource_id = self.get_resource_by_asset_id(asset_id);
        if let Some(resource_id) = existing_resource_id {
            if !reload {
                if let Some(listener) = listener {
                    self.connect_listener(resource_id, listener);
                }
                return resource_id;
            }
        }

        let asset = match self.asset_manager.try_get_asset_by_asset_id(asset_id) {
            Some(asset) => asset,
            None => {
                log::warn!(
                    "Can't load {} {:?}, the asset is unknown",
                    T::RESOURCE_TYPE_NAME,
                    asset_id
                );
                return ResourceId::INVALID;
            }
        };

        let (resource_id, request, notification) = {
            let mut guard = self.inner.lock().unwrap();

            // Looked up again, another thread may have created or released the resource since
            let live_resource_id = guard
                .asset_id_to_resource_id
                .get(&asset_id)
                .copied()
                .filter(|x| guard.pool.is_element_id_valid(*x));
            if let Some(resource_id) = live_resource_id {
                if !reload {
                    drop(guard);
                    if let Some(listener) = listener {
                        self.connect_listener(resource_id, listener);
                    }
                    return resource_id;
                }
            }

            let inner = &mut *guard;
            let resource = match live_resource_id {
                Some(resource_id) => inner.pool.get_element_by_id_mut(resource_id),
                None => match inner.pool.add_element() {
                    Some(resource) => {
                        resource.core.asset_id = asset_id;
                        inner
                            .asset_id_to_resource_id
                            .insert(asset_id, resource.core.resource_id);
                        resource
                    }
                    None => {
                        // The pool logged the exhaustion
                        return ResourceId::INVALID;
                    }
                },
            };

            if let Some(listener) = listener {
                resource.core.connect_listener(listener);
            }

            let loader_type_id = loader_type_id
                .or(resource.core.loader_type_id)
                .unwrap_or(T::DEFAULT_LOADER_TYPE_ID);
            resource.core.loader_type_id = Some(loader_type_id);
            resource.core.load_epoch = resource.core.load_epoch.wrapping_add(1);
            resource.core.loading_state = LoadingState::Loading;

            let resource_id = resource.core.resource_id;
            let load_epoch = resource.core.load_epoch;
            let target = LoaderTarget::new(self.clone(), resource_id, asset_id, load_epoch);
            let request = match T::create_resource_loader(loader_type_id, target) {
                Some(loader) => Some(LoadRequest::new(asset, reload, load_epoch, loader)),
                None => {
                    log::error!(
                        "Loader type {:?} can't load {} {:?}",
                        loader_type_id,
                        T::RESOURCE_TYPE_NAME,
                        asset_id
                    );
                    resource.core.loading_state = LoadingState::Failed;
                    None
                }
            };

            let notification = if request.is_some() {
                Notification::new(&resource.core, resource.core.listeners.clone())
            } else {
                Notification::take_listeners(&mut resource.core)
            };
            (resource_id, request, notification)
        };

        notification.send();
        if let Some(request) = request {
            log::trace!(
                "Committing load request for {} {:?} {:?}",
                T::RESOURCE_TYPE_NAME,
                asset_id,
                resource_id
            );
            self.streamer_tx.commit_load_request(request);
        }
        resource_id
    }

    /// Load the asset of a live resource again with the loader type it was first loaded with
    pub fn reload_resource_by_asset_id(
        &self,
        asset_id: AssetId,
    ) -> ResourceId {
        match self.get_resource_by_asset_id(asset_id) {
            Some(_) => self.load_resource_by_asset_id(asset_id, None, true, None),
            None => {
                log::debug!(
                    "Ignoring reload of {} {:?}, it isn't loaded",
                    T::RESOURCE_TYPE_NAME,
                    asset_id
                );
                ResourceId::INVALID
            }
        }
    }

    /// Removes the resource. Its payload is destroyed after the frames in flight completed.
    pub fn release_resource_by_id(
        &self,
        resource_id: ResourceId,
    ) -> bool {
        let notification = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let resource = match inner.pool.try_get_element_by_id_mut(resource_id) {
                Some(resource) => resource,
                None => return false,
            };

            resource.core.loading_state = LoadingState::Unloading;
            let notification = Notification::take_listeners(&mut resource.core);
            let payload = std::mem::take(&mut resource.payload);
            inner.asset_id_to_resource_id.remove(&resource.core.asset_id);
            inner.drop_sink.retire(payload);
            inner.pool.remove_element(resource_id);
            notification
        };
        notification.send();
        true
    }

    /// A listener connected to a loaded resource is told right away. Failed resources don't keep
    /// listeners, they are told and dropped.
    pub fn connect_listener(
        &self,
        resource_id: ResourceId,
        listener: Arc<dyn ResourceListener>,
    ) -> bool {
        let notification = {
            let mut guard = self.inner.lock().unwrap();
            let resource = match guard.pool.try_get_element_by_id_mut(resource_id) {
                Some(resource) => resource,
                None => return false,
            };

            match resource.core.loading_state {
                LoadingState::Failed => Some(Notification::new(&resource.core, vec![listener])),
                LoadingState::Loaded => {
                    if resource.core.connect_listener(listener.clone()) {
                        Some(Notification::new(&resource.core, vec![listener]))
                    } else {
                        None
                    }
                }
                _ => {
                    resource.core.connect_listener(listener);
                    None
                }
            }
        };

        if let Some(notification) = notification {
            notification.send();
        }
        true
    }

    pub fn disconnect_listener(
        &self,
        resource_id: ResourceId,
        listener: &Arc<dyn ResourceListener>,
    ) -> bool {
        self.inner
            .lock()
            .unwrap()
            .pool
            .try_get_element_by_id_mut(resource_id)
            .map(|x| x.core.disconnect_listener(listener))
            .unwrap_or(false)
    }

    /// Call once per presented frame
    pub fn on_frame_complete(&self) {
        self.inner.lock().unwrap().drop_sink.on_frame_complete();
    }

    pub fn number_of_retired_resources(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .drop_sink
            .number_of_retired_resources()
    }

    // Result of a load. `None` means the load failed. Discarded if the load was superseded or the
    // resource released in the meantime.
    pub(crate) fn finish_load(
        &self,
        resource_id: ResourceId,
        load_epoch: u32,
        payload: Option<T>,
    ) -> bool {
        let notification = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            let resource = match inner.pool.try_get_element_by_id_mut(resource_id) {
                Some(resource) if resource.core.load_epoch == load_epoch => resource,
                _ => {
                    log::trace!(
                        "Discarding outdated load of {} {:?}",
                        T::RESOURCE_TYPE_NAME,
                        resource_id
                    );
                    return false;
                }
            };

            match payload {
                Some(payload) => {
                    if std::mem::replace(&mut resource.core.has_loaded_content, true) {
                        if let Some(reloaded_asset_ids) = &mut inner.reloaded_asset_ids {
                            reloaded_asset_ids.push(resource.core.asset_id);
                        }
                    }
                    resource.core.loading_state = LoadingState::Loaded;
                    let previous = std::mem::replace(&mut resource.payload, payload);
                    let notification =
                        Notification::new(&resource.core, resource.core.listeners.clone());
                    inner.drop_sink.retire(previous);
                    notification
                }
                None => {
                    resource.core.loading_state = LoadingState::Failed;
                    Notification::take_listeners(&mut resource.core)
                }
            }
        };

        let loaded = notification.loading_state == LoadingState::Loaded;
        notification.send();
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::ShaderPieceResource;
    use crate::AssetPackage;
    use kiln_base::WorkQueue;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingListener {
        notifications: Mutex<Vec<LoadingState>>,
    }

    impl ResourceListener for RecordingListener {
        fn on_loading_state_change(
            &self,
            _resource_id: ResourceId,
            _asset_id: AssetId,
            loading_state: LoadingState,
        ) {
            self.notifications.lock().unwrap().push(loading_state);
        }
    }

    struct TestSetup {
        manager: ResourceManagerTemplate<ShaderPieceResource>,
        queue: WorkQueue<LoadRequest>,
        known_asset: AssetId,
    }

    fn setup(maximum_number_of_resources: u32) -> TestSetup {
        let _ = env_logger::builder().is_test(true).try_init();
        let asset_manager = AssetManager::new();
        let mut package = AssetPackage::new("Test");
        let known_asset = package.add_asset("Example/ShaderPiece/Lighting.shader_piece");
        package.add_asset("Example/ShaderPiece/Fog.shader_piece");
        asset_manager.mount_asset_package(package);

        let queue = WorkQueue::new();
        let streamer_tx = ResourceStreamerTx::new(queue.clone(), Arc::new(AtomicUsize::new(0)));
        let manager = ResourceManagerTemplate::new(
            &asset_manager,
            &streamer_tx,
            maximum_number_of_resources,
            1,
        );
        TestSetup {
            manager,
            queue,
            known_asset,
        }
    }

    #[test]
    fn test_double_load_submits_once() {
        let setup = setup(8);
        let first = setup
            .manager
            .load_resource_by_asset_id(setup.known_asset, None, false, None);
        let second = setup
            .manager
            .load_resource_by_asset_id(setup.known_asset, None, false, None);
        assert_eq!(first, second);
        assert_eq!(setup.queue.queued_count(), 1);
        assert_eq!(
            setup.manager.loading_state(first),
            Some(LoadingState::Loading)
        );
        assert_eq!(setup.manager.get_resource_by_asset_id(setup.known_asset), Some(first));

        // Reload reuses the id and submits a second request
        let reloaded = setup.manager.reload_resource_by_asset_id(setup.known_asset);
        assert_eq!(reloaded, first);
        assert_eq!(setup.queue.queued_count(), 2);
        let requests = setup.queue.drain();
        assert!(requests[1].reload);
        assert_eq!(requests[1].loader_type_id, requests[0].loader_type_id);
    }

    #[test]
    fn test_concurrent_loads_submit_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let asset_manager = AssetManager::new();
        let mut package = AssetPackage::new("Test");
        let asset_ids: Vec<_> = (0..64)
            .map(|i| package.add_asset(&format!("Example/ShaderPiece/Piece{}.shader_piece", i)))
            .collect();
        asset_manager.mount_asset_package(package);

        let queue = WorkQueue::new();
        let streamer_tx = ResourceStreamerTx::new(queue.clone(), Arc::new(AtomicUsize::new(0)));
        let manager = ResourceManagerTemplate::<ShaderPieceResource>::new(
            &asset_manager,
            &streamer_tx,
            64,
            1,
        );

        const THREAD_COUNT: usize = 8;
        let barrier = Arc::new(std::sync::Barrier::new(THREAD_COUNT));
        let threads: Vec<_> = (0..THREAD_COUNT)
            .map(|_| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                let asset_ids = asset_ids.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    asset_ids
                        .iter()
                        .map(|asset_id| {
                            manager.load_resource_by_asset_id(*asset_id, None, false, None)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<ResourceId>> =
            threads.into_iter().map(|x| x.join().unwrap()).collect();
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
        assert_eq!(manager.number_of_resources(), 64);
        assert_eq!(queue.queued_count(), 64);
        for request in queue.drain() {
            assert!(!request.reload);
            assert_eq!(
                manager.load_epoch(request.resource_id),
                Some(request.load_epoch)
            );
        }
    }

    #[test]
    fn test_reload_tracking() {
        let setup = setup(8);
        let resource_id = setup
            .manager
            .load_resource_by_asset_id(setup.known_asset, None, false, None);
        let epoch = setup.manager.load_epoch(resource_id).unwrap();
        setup
            .manager
            .finish_load(resource_id, epoch, Some(Default::default()));

        // Not tracked until enabled
        setup.manager.reload_resource_by_asset_id(setup.known_asset);
        setup
            .manager
            .finish_load(resource_id, epoch + 1, Some(Default::default()));
        assert!(setup.manager.take_reloaded_asset_ids().is_empty());

        setup.manager.enable_reload_tracking();
        setup.manager.reload_resource_by_asset_id(setup.known_asset);
        // A failed reload keeps the old content
        assert!(!setup.manager.finish_load(resource_id, epoch + 2, None));
        assert_eq!(
            setup.manager.loading_state(resource_id),
            Some(LoadingState::Failed)
        );
        assert!(setup.manager.take_reloaded_asset_ids().is_empty());

        setup.manager.reload_resource_by_asset_id(setup.known_asset);
        setup.manager.reload_resource_by_asset_id(setup.known_asset);
        // Only the latest of the two reloads counts
        assert!(!setup
            .manager
            .finish_load(resource_id, epoch + 3, Some(Default::default())));
        assert!(setup.manager.take_reloaded_asset_ids().is_empty());
        assert!(setup
            .manager
            .finish_load(resource_id, epoch + 4, Some(Default::default())));
        assert_eq!(setup.manager.take_reloaded_asset_ids(), vec![setup.known_asset]);
        assert!(setup.manager.take_reloaded_asset_ids().is_empty());

        // The first load of a resource is no reload, committing over loaded content is
        let procedural = AssetId::from_virtual_path("Procedural");
        let procedural_id = setup
            .manager
            .create_empty_resource_by_asset_id(procedural)
            .unwrap();
        setup.manager.commit_resource(procedural_id, Default::default());
        assert!(setup.manager.take_reloaded_asset_ids().is_empty());
        setup.manager.commit_resource(procedural_id, Default::default());
        assert_eq!(setup.manager.take_reloaded_asset_ids(), vec![procedural]);
        setup.queue.drain();
    }

    #[test]
    fn test_unknown_asset_queues_nothing() {
        let setup = setup(8);
        let resource_id = setup.manager.load_resource_by_asset_id(
            AssetId::from_virtual_path("Example/ShaderPiece/Missing"),
            None,
            false,
            None,
        );
        assert!(!resource_id.is_valid());
        assert_eq!(setup.queue.queued_count(), 0);
        assert_eq!(setup.manager.number_of_resources(), 0);
    }

    #[test]
    fn test_capacity_exhaustion() {
        let setup = setup(1);
        let first = setup
            .manager
            .load_resource_by_asset_id(setup.known_asset, None, false, None);
        assert!(first.is_valid());

        let second = setup.manager.load_resource_by_asset_id(
            AssetId::from_virtual_path("Example/ShaderPiece/Fog"),
            None,
            false,
            None,
        );
        assert!(!second.is_valid());
        assert_eq!(setup.queue.queued_count(), 1);
        assert_eq!(
            setup.manager.loading_state(first),
            Some(LoadingState::Loading)
        );
        assert!(matches!(
            setup
                .manager
                .create_empty_resource_by_asset_id(AssetId::from_virtual_path("Procedural")),
            Err(RhiError::CapacityExhausted(_))
        ));
    }

    #[test]
    fn test_superseded_load_is_discarded() {
        let setup = setup(8);
        let listener = Arc::new(RecordingListener::default());
        let resource_id = setup.manager.load_resource_by_asset_id(
            setup.known_asset,
            Some(listener.clone()),
            false,
            None,
        );
        let first_epoch = setup.manager.load_epoch(resource_id).unwrap();
        setup.manager.reload_resource_by_asset_id(setup.known_asset);

        let stale = ShaderPieceResource {
            source_code: "stale".to_string(),
        };
        assert!(!setup
            .manager
            .finish_load(resource_id, first_epoch, Some(stale)));

        let current = ShaderPieceResource {
            source_code: "current".to_string(),
        };
        assert!(setup
            .manager
            .finish_load(resource_id, first_epoch + 1, Some(current)));
        assert_eq!(
            setup
                .manager
                .with_resource(resource_id, |x| x.source_code.clone())
                .unwrap(),
            "current"
        );
        assert_eq!(
            *listener.notifications.lock().unwrap(),
            vec![
                LoadingState::Loading,
                LoadingState::Loading,
                LoadingState::Loaded
            ]
        );
    }

    #[test]
    fn test_listeners() {
        let setup = setup(8);
        let resource_id = setup
            .manager
            .create_empty_resource_by_asset_id(AssetId::from_virtual_path("Procedural"))
            .unwrap();
        assert_eq!(
            setup.manager.loading_state(resource_id),
            Some(LoadingState::Unloaded)
        );
        assert!(setup
            .manager
            .create_empty_resource_by_asset_id(AssetId::from_virtual_path("Procedural"))
            .is_err());

        let early = Arc::new(RecordingListener::default());
        let early_dyn: Arc<dyn ResourceListener> = early.clone();
        assert!(setup.manager.connect_listener(resource_id, early_dyn.clone()));
        assert!(setup
            .manager
            .commit_resource(resource_id, Default::default()));
        assert_eq!(*early.notifications.lock().unwrap(), vec![LoadingState::Loaded]);

        // Connecting to a loaded resource notifies immediately
        let late = Arc::new(RecordingListener::default());
        setup.manager.connect_listener(resource_id, late.clone());
        assert_eq!(*late.notifications.lock().unwrap(), vec![LoadingState::Loaded]);

        assert!(setup.manager.disconnect_listener(resource_id, &early_dyn));
        assert!(!setup.manager.disconnect_listener(resource_id, &early_dyn));
        assert!(setup.manager.release_resource_by_id(resource_id));
        assert_eq!(early.notifications.lock().unwrap().len(), 1);
        assert_eq!(
            *late.notifications.lock().unwrap(),
            vec![LoadingState::Loaded, LoadingState::Unloading]
        );
    }

    #[test]
    fn test_release_defers_destruction() {
        let setup = setup(8);
        let resource_id = setup
            .manager
            .load_resource_by_asset_id(setup.known_asset, None, false, None);
        let epoch = setup.manager.load_epoch(resource_id).unwrap();
        setup
            .manager
            .finish_load(resource_id, epoch, Some(Default::default()));
        // The empty payload the resource started with
        assert_eq!(setup.manager.number_of_retired_resources(), 1);

        assert!(setup.manager.release_resource_by_id(resource_id));
        assert!(!setup.manager.is_resource_id_valid(resource_id));
        assert!(setup
            .manager
            .get_resource_by_asset_id(setup.known_asset)
            .is_none());
        assert_eq!(setup.manager.number_of_retired_resources(), 2);

        // A result arriving after release is dropped
        assert!(!setup
            .manager
            .finish_load(resource_id, epoch, Some(Default::default())));

        for _ in 0..3 {
            setup.manager.on_frame_complete();
        }
        assert_eq!(setup.manager.number_of_retired_resources(), 0);

        // The slot is reused with a new generation
        let reloaded = setup
            .manager
            .load_resource_by_asset_id(setup.known_asset, None, false, None);
        assert_eq!(reloaded.index(), resource_id.index());
        assert_ne!(reloaded, resource_id);
        setup.queue.drain();
    }
}
