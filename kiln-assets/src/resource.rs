use crate::loaders::{LoaderTarget, ResourceLoader, ResourceLoaderTypeId};
use kiln_base::slab::{PackedElement, PackedElementId};
use kiln_base::AssetId;
use std::sync::Arc;

/// Pool id of a resource, `(generation << 16) | index`
pub type ResourceId = PackedElementId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoadingState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Failed,
}

impl LoadingState {
    /// Loaded or failed, nothing is in flight for the resource
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadingState::Loaded | LoadingState::Failed)
    }
}

impl Default for LoadingState {
    fn default() -> Self {
        LoadingState::Unloaded
    }
}

/// Gets told about loading state changes of the resources it is connected to. Called without any
/// resource manager lock held, so implementations may call back into the managers.
pub trait ResourceListener: Send + Sync {
    fn on_loading_state_change(
        &self,
        resource_id: ResourceId,
        asset_id: AssetId,
        loading_state: LoadingState,
    );
}

/// Payload of a pooled resource. The payload owns everything loaded for the asset, including RHI
/// objects, and is handed to the drop sink when released or replaced.
pub trait ResourcePayload: Default + Send + 'static {
    const RESOURCE_TYPE_NAME: &'static str;

    /// Used when a load doesn't name a loader type
    const DEFAULT_LOADER_TYPE_ID: ResourceLoaderTypeId;

    /// Returns `None` if this resource type can't be loaded by the given loader type
    fn create_resource_loader(
        loader_type_id: ResourceLoaderTypeId,
        target: LoaderTarget<Self>,
    ) -> Option<ResourceLoader>;
}

/// Bookkeeping shared by every resource type
#[derive(Default)]
pub struct ResourceCore {
    pub resource_id: ResourceId,
    pub asset_id: AssetId,
    pub loading_state: LoadingState,
    pub loader_type_id: Option<ResourceLoaderTypeId>,
    /// Incremented for every accepted load, results of older loads are discarded
    pub load_epoch: u32,
    // Set once a load or commit succeeded, later ones replace loaded content
    pub(crate) has_loaded_content: bool,
    pub(crate) listeners: Vec<Arc<dyn ResourceListener>>,
}

impl ResourceCore {
    pub fn number_of_listeners(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn connect_listener(
        &mut self,
        listener: Arc<dyn ResourceListener>,
    ) -> bool {
        if self.listeners.iter().any(|x| Arc::ptr_eq(x, &listener)) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    pub(crate) fn disconnect_listener(
        &mut self,
        listener: &Arc<dyn ResourceListener>,
    ) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|x| !Arc::ptr_eq(x, listener));
        self.listeners.len() != before
    }
}

/// Element of a resource manager's pool
#[derive(Default)]
pub struct PooledResource<T: ResourcePayload> {
    pub core: ResourceCore,
    pub payload: T,
}

impl<T: ResourcePayload> PackedElement for PooledResource<T> {
    fn initialize_element(
        &mut self,
        id: PackedElementId,
    ) {
        self.core = ResourceCore {
            resource_id: id,
            ..Default::default()
        };
    }

    fn deinitialize_element(&mut self) {
        self.core = Default::default();
        self.payload = Default::default();
    }
}
