use crate::loaders::{LoaderDispatchContext, ResourceLoader, ResourceLoaderTypeId};
use crate::{Asset, ResourceId, ResourceManagers};
use crossbeam_channel::{Receiver, Sender};
use kiln_api::{RhiDeviceContext, RhiResult};
use kiln_base::{FileManager, WorkQueue, WorkerThreads};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceStreamerConfig {
    /// Threads running the processing stage. Deserialization has a thread of its own.
    pub number_of_worker_threads: usize,
    pub maximum_number_of_dispatches_per_frame: usize,
}

impl Default for ResourceStreamerConfig {
    fn default() -> Self {
        ResourceStreamerConfig {
            number_of_worker_threads: 2,
            maximum_number_of_dispatches_per_frame: 16,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadRequestState {
    Queued,
    Deserializing,
    Processing,
    ReadyForDispatch,
    Dispatching,
    Complete,
    Failed,
}

/// One load of one asset into one resource
pub struct LoadRequest {
    pub asset: Asset,
    pub loader_type_id: ResourceLoaderTypeId,
    pub reload: bool,
    pub resource_id: ResourceId,
    pub load_epoch: u32,
    pub(crate) loader: ResourceLoader,
    pub(crate) state: LoadRequestState,
}

impl LoadRequest {
    pub(crate) fn new(
        asset: Asset,
        reload: bool,
        load_epoch: u32,
        loader: ResourceLoader,
    ) -> Self {
        LoadRequest {
            asset,
            loader_type_id: loader.loader_type_id(),
            reload,
            resource_id: loader.resource_id(),
            load_epoch,
            loader,
            state: LoadRequestState::Queued,
        }
    }

    pub fn state(&self) -> LoadRequestState {
        self.state
    }
}

/// Submits load requests to a `ResourceStreamer` from any thread. Held by every resource manager.
#[derive(Clone)]
pub struct ResourceStreamerTx {
    deserialization_queue: WorkQueue<LoadRequest>,
    number_of_in_flight_load_requests: Arc<AtomicUsize>,
}

impl ResourceStreamerTx {
    pub(crate) fn new(
        deserialization_queue: WorkQueue<LoadRequest>,
        number_of_in_flight_load_requests: Arc<AtomicUsize>,
    ) -> Self {
        ResourceStreamerTx {
            deserialization_queue,
            number_of_in_flight_load_requests,
        }
    }

    /// Never blocks
    pub(crate) fn commit_load_request(
        &self,
        request: LoadRequest,
    ) {
        // Counted before it becomes visible to the workers
        self.number_of_in_flight_load_requests
            .fetch_add(1, Ordering::SeqCst);
        self.deserialization_queue.push(request);
    }
}

struct StreamerShared {
    file_manager: Arc<dyn FileManager>,
    deserialization_queue: WorkQueue<LoadRequest>,
    processing_queue: WorkQueue<LoadRequest>,
    dispatch_tx: Sender<LoadRequest>,
    shutting_down: AtomicBool,
}

impl StreamerShared {
    fn deserialize(
        &self,
        request: &mut LoadRequest,
    ) -> RhiResult<()> {
        request.state = LoadRequestState::Deserializing;
        let bytes = self.file_manager.read_file(&request.asset.virtual_filename)?;
        request.loader.on_deserialization(&bytes)
    }

    fn process_deserialization_request(
        &self,
        mut request: LoadRequest,
    ) {
        profiling::scope!("deserialize resource");
        if !request.loader.is_current() {
            // Superseded, dispatch drops it
            self.send_to_dispatch(request);
            return;
        }

        match self.deserialize(&mut request) {
            Ok(()) if request.loader.has_processing() => {
                request.state = LoadRequestState::Processing;
                self.processing_queue.push(request);
            }
            Ok(()) => self.send_to_dispatch(request),
            Err(error) => self.forward_failure(request, &error),
        }
    }

    fn process_processing_request(
        &self,
        mut request: LoadRequest,
    ) {
        profiling::scope!("process resource");
        match request.loader.on_processing() {
            Ok(()) => self.send_to_dispatch(request),
            Err(error) => self.forward_failure(request, &error),
        }
    }

    fn send_to_dispatch(
        &self,
        mut request: LoadRequest,
    ) {
        if request.state != LoadRequestState::Failed {
            request.state = LoadRequestState::ReadyForDispatch;
        }
        // The receiver only goes away after the threads were joined
        let _ = self.dispatch_tx.send(request);
    }

    // The resource is marked failed by dispatch on the owning thread
    fn forward_failure(
        &self,
        mut request: LoadRequest,
        error: &kiln_api::RhiError,
    ) {
        log::error!(
            "Failed to load {} {} ({:?}): {}",
            request.loader.resource_type_name(),
            request.asset.virtual_filename,
            request.asset.asset_id,
            error
        );
        request.state = LoadRequestState::Failed;
        self.send_to_dispatch(request);
    }
}

fn deserialization_thread_main(
    shared: Arc<StreamerShared>,
    shutdown_rx: Receiver<()>,
) {
    profiling::register_thread!();
    while let Some(request) = shared.deserialization_queue.pop_or_shutdown(&shutdown_rx) {
        if shared.shutting_down.load(Ordering::Acquire) {
            shared.deserialization_queue.complete_one();
            break;
        }

        shared.process_deserialization_request(request);
        shared.deserialization_queue.complete_one();
    }
}

fn processing_thread_main(
    shared: Arc<StreamerShared>,
    shutdown_rx: Receiver<()>,
) {
    profiling::register_thread!();
    while let Some(request) = shared.processing_queue.pop_or_shutdown(&shutdown_rx) {
        if shared.shutting_down.load(Ordering::Acquire) {
            shared.processing_queue.complete_one();
            break;
        }

        shared.process_processing_request(request);
        shared.processing_queue.complete_one();
    }
}

/// Moves load requests from the resource managers through deserialization and processing on
/// worker threads to dispatch on the thread owning the device.
///
/// A request whose loader isn't fully loaded after dispatch waits in a dependency list which is
/// re-polled at the start of every dispatch. Requests of superseded loads are dropped without
/// touching the resource.
pub struct ResourceStreamer {
    device_context: RhiDeviceContext,
    shared: Arc<StreamerShared>,
    number_of_in_flight_load_requests: Arc<AtomicUsize>,
    dispatch_rx: Receiver<LoadRequest>,
    ready_for_dispatch: VecDeque<LoadRequest>,
    waiting_for_dependencies: Vec<LoadRequest>,
    config: ResourceStreamerConfig,
    owning_thread: ThreadId,
    deserialization_thread: WorkerThreads,
    processing_threads: WorkerThreads,
}

impl ResourceStreamer {
    /// Must be created on the thread that dispatches
    pub fn new(
        device_context: &RhiDeviceContext,
        file_manager: Arc<dyn FileManager>,
        config: &ResourceStreamerConfig,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(StreamerShared {
            file_manager,
            deserialization_queue: WorkQueue::new(),
            processing_queue: WorkQueue::new(),
            dispatch_tx,
            shutting_down: AtomicBool::new(false),
        });

        let number_of_worker_threads = config.number_of_worker_threads.max(1);
        let deserialization_thread = WorkerThreads::spawn(
            "resource deserialization",
            1,
            &shared,
            deserialization_thread_main,
        );
        let processing_threads = WorkerThreads::spawn(
            "resource processing",
            number_of_worker_threads,
            &shared,
            processing_thread_main,
        );

        log::debug!(
            "Started resource streamer with {} processing threads",
            number_of_worker_threads
        );

        ResourceStreamer {
            device_context: device_context.clone(),
            shared,
            number_of_in_flight_load_requests: Arc::new(AtomicUsize::new(0)),
            dispatch_rx,
            ready_for_dispatch: Default::default(),
            waiting_for_dependencies: Default::default(),
            config: ResourceStreamerConfig {
                number_of_worker_threads,
                ..config.clone()
            },
            owning_thread: std::thread::current().id(),
            deserialization_thread,
            processing_threads,
        }
    }

    pub fn config(&self) -> &ResourceStreamerConfig {
        &self.config
    }

    /// Handed to the resource managers
    pub fn tx(&self) -> ResourceStreamerTx {
        ResourceStreamerTx::new(
            self.shared.deserialization_queue.clone(),
            self.number_of_in_flight_load_requests.clone(),
        )
    }

    pub fn commit_load_request(
        &self,
        request: LoadRequest,
    ) {
        self.tx().commit_load_request(request);
    }

    /// Requests that were committed and didn't reach a terminal state yet
    pub fn number_of_in_flight_load_requests(&self) -> usize {
        self.number_of_in_flight_load_requests
            .load(Ordering::SeqCst)
    }

    pub fn number_of_requests_waiting_for_dependencies(&self) -> usize {
        self.waiting_for_dependencies.len()
    }

    /// Owning thread, once per frame. Dispatches at most `maximum_number_of_dispatches_per_frame`
    /// requests and returns how many were dispatched.
    #[profiling::function]
    pub fn dispatch(
        &mut self,
        resource_managers: &ResourceManagers,
    ) -> usize {
        self.dispatch_with_limit(
            resource_managers,
            self.config.maximum_number_of_dispatches_per_frame,
        )
    }

    fn dispatch_with_limit(
        &mut self,
        resource_managers: &ResourceManagers,
        limit: usize,
    ) -> usize {
        debug_assert_eq!(
            std::thread::current().id(),
            self.owning_thread,
            "Resources must be dispatched on the thread that created the streamer"
        );

        self.poll_waiting_requests(resource_managers);

        let device_context = self.device_context.clone();
        let context = LoaderDispatchContext {
            device_context: &device_context,
            resource_managers,
        };

        let mut dispatched = 0;
        while dispatched < limit {
            let mut request = match self.ready_for_dispatch.pop_front() {
                Some(request) => request,
                None => match self.dispatch_rx.try_recv() {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };

            if request.state == LoadRequestState::Failed {
                self.fail_request(request);
                continue;
            }

            if !request.loader.is_current() {
                self.discard_request(request);
                continue;
            }

            request.state = LoadRequestState::Dispatching;
            dispatched += 1;
            match request.loader.on_dispatch(&context) {
                Ok(()) => {
                    if request.loader.is_fully_loaded(&context) {
                        self.finalize_request(request);
                    } else {
                        log::trace!(
                            "{} {} waits for its dependencies",
                            request.loader.resource_type_name(),
                            request.asset.virtual_filename
                        );
                        self.waiting_for_dependencies.push(request);
                    }
                }
                Err(error) => {
                    log::error!(
                        "Failed to dispatch {} {} ({:?}): {}",
                        request.loader.resource_type_name(),
                        request.asset.virtual_filename,
                        request.asset.asset_id,
                        error
                    );
                    self.fail_request(request);
                }
            }
        }

        dispatched
    }

    // Returns how many requests left the waiting list
    fn poll_waiting_requests(
        &mut self,
        resource_managers: &ResourceManagers,
    ) -> usize {
        if self.waiting_for_dependencies.is_empty() {
            return 0;
        }

        let device_context = self.device_context.clone();
        let context = LoaderDispatchContext {
            device_context: &device_context,
            resource_managers,
        };

        let waiting = std::mem::take(&mut self.waiting_for_dependencies);
        let number_of_waiting_requests = waiting.len();
        for request in waiting {
            if !request.loader.is_current() {
                self.discard_request(request);
            } else if request.loader.is_fully_loaded(&context) {
                self.finalize_request(request);
            } else {
                self.waiting_for_dependencies.push(request);
            }
        }
        number_of_waiting_requests - self.waiting_for_dependencies.len()
    }

    fn finalize_request(
        &self,
        mut request: LoadRequest,
    ) {
        request.state = LoadRequestState::Complete;
        log::trace!(
            "Loaded {} {}",
            request.loader.resource_type_name(),
            request.asset.virtual_filename
        );
        request.loader.finalize();
        self.retire_request();
    }

    fn fail_request(
        &self,
        request: LoadRequest,
    ) {
        request.loader.fail();
        self.retire_request();
    }

    fn discard_request(
        &self,
        request: LoadRequest,
    ) {
        log::trace!(
            "Dropping superseded load of {} {}",
            request.loader.resource_type_name(),
            request.asset.virtual_filename
        );
        self.retire_request();
    }

    fn retire_request(&self) {
        self.number_of_in_flight_load_requests
            .fetch_sub(1, Ordering::SeqCst);
    }

    /// Owning thread. Blocks until every request committed so far, and everything those requests
    /// load in turn, reached a terminal state.
    #[profiling::function]
    pub fn flush_all_queues(
        &mut self,
        resource_managers: &ResourceManagers,
    ) {
        loop {
            self.dispatch_with_limit(resource_managers, usize::MAX);

            let number_of_in_flight_load_requests = self.number_of_in_flight_load_requests();
            if number_of_in_flight_load_requests == 0 {
                break;
            }

            if number_of_in_flight_load_requests == self.waiting_for_dependencies.len() {
                if self.poll_waiting_requests(resource_managers) > 0 {
                    continue;
                }

                // Everything left waits on dependencies that will never settle
                for request in std::mem::take(&mut self.waiting_for_dependencies) {
                    log::error!(
                        "{} {} can't be completed, its dependencies never finish loading",
                        request.loader.resource_type_name(),
                        request.asset.virtual_filename
                    );
                    self.fail_request(request);
                }
                continue;
            }

            if let Ok(request) = self.dispatch_rx.recv_timeout(Duration::from_millis(1)) {
                self.ready_for_dispatch.push_back(request);
            }
        }
    }
}

impl Drop for ResourceStreamer {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        self.deserialization_thread.stop();
        self.processing_threads.stop();

        let dropped = self.shared.deserialization_queue.drain().len()
            + self.shared.processing_queue.drain().len()
            + self.dispatch_rx.try_iter().count()
            + self.ready_for_dispatch.drain(..).count()
            + self.waiting_for_dependencies.drain(..).count();
        if dropped > 0 {
            log::debug!("Dropped {} load requests on shutdown", dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::mesh::tests::triangle;
    use crate::loaders::skeleton::tests::two_bones;
    use crate::loaders::texture::tests::checkerboard;
    use crate::loaders::{
        MeshResource, ShaderBlueprintFile, ShaderPieceFile, SkeletonResource, TextureResource,
    };
    use crate::{
        AssetManager, AssetPackage, LoadingState, ResourceListener, ResourcePoolConfig,
    };
    use kiln_api::null::RhiDeviceContextNull;
    use kiln_base::{AssetId, MemoryFileManager};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        notifications: Mutex<Vec<(AssetId, LoadingState)>>,
    }

    impl ResourceListener for RecordingListener {
        fn on_loading_state_change(
            &self,
            _resource_id: ResourceId,
            asset_id: AssetId,
            loading_state: LoadingState,
        ) {
            self.notifications
                .lock()
                .unwrap()
                .push((asset_id, loading_state));
        }
    }

    struct TestStreamer {
        device_context: RhiDeviceContext,
        file_manager: Arc<MemoryFileManager>,
        package: AssetPackage,
        asset_manager: AssetManager,
    }

    impl TestStreamer {
        fn new() -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            TestStreamer {
                device_context: RhiDeviceContextNull::create_device_context(&Default::default()),
                file_manager: Arc::new(MemoryFileManager::new("LocalData", true)),
                package: AssetPackage::new("Test"),
                asset_manager: AssetManager::new(),
            }
        }

        fn add_file(
            &mut self,
            virtual_filename: &str,
            bytes: Vec<u8>,
        ) -> AssetId {
            self.file_manager.insert_file(virtual_filename, bytes);
            self.package.add_asset(virtual_filename)
        }

        fn start(
            self,
            config: &ResourceStreamerConfig,
        ) -> (ResourceStreamer, ResourceManagers, RhiDeviceContext) {
            self.asset_manager.mount_asset_package(self.package);
            let streamer = ResourceStreamer::new(&self.device_context, self.file_manager, config);
            let resource_managers = ResourceManagers::new(
                &self.asset_manager,
                &streamer.tx(),
                &ResourcePoolConfig::default(),
            );
            (streamer, resource_managers, self.device_context)
        }
    }

    fn live_buffers(device_context: &RhiDeviceContext) -> usize {
        device_context
            .null_device_context()
            .unwrap()
            .stats()
            .live_buffers
    }

    #[test]
    fn test_mesh_waits_for_skeleton() {
        let mut test = TestStreamer::new();
        let skeleton = test.add_file("Example/Skeleton/Imrod.skeleton", two_bones().to_bytes().unwrap());
        let mesh = test.add_file(
            "Example/Mesh/Imrod.mesh",
            triangle(skeleton).to_bytes().unwrap(),
        );
        let (mut streamer, resource_managers, device_context) = test.start(&Default::default());

        let listener = Arc::new(RecordingListener::default());
        let mesh_id = resource_managers.mesh_manager.load_resource_by_asset_id(
            mesh,
            Some(listener.clone()),
            false,
            None,
        );
        // Visible right away, usable only once loaded
        assert!(mesh_id.is_valid());
        assert_eq!(
            resource_managers.mesh_manager.loading_state(mesh_id),
            Some(LoadingState::Loading)
        );
        assert!(resource_managers
            .mesh_manager
            .with_resource(mesh_id, |x: &MeshResource| x.vertex_buffer.is_none())
            .unwrap());

        streamer.flush_all_queues(&resource_managers);
        assert_eq!(streamer.number_of_in_flight_load_requests(), 0);

        let skeleton_id = resource_managers
            .skeleton_manager
            .get_resource_by_asset_id(skeleton)
            .unwrap();
        assert_eq!(
            resource_managers.skeleton_manager.loading_state(skeleton_id),
            Some(LoadingState::Loaded)
        );
        assert_eq!(
            resource_managers.mesh_manager.loading_state(mesh_id),
            Some(LoadingState::Loaded)
        );
        assert_eq!(
            resource_managers
                .skeleton_manager
                .with_resource(skeleton_id, |x: &SkeletonResource| x.number_of_bones())
                .unwrap(),
            2
        );
        assert_eq!(
            resource_managers
                .mesh_manager
                .with_resource(mesh_id, |x| (x.skeleton_resource_id, x.number_of_indices))
                .unwrap(),
            (skeleton_id, 3)
        );
        assert_eq!(live_buffers(&device_context), 2);
        assert_eq!(
            *listener.notifications.lock().unwrap(),
            vec![(mesh, LoadingState::Loading), (mesh, LoadingState::Loaded)]
        );

        // Released buffers survive the frames in flight
        resource_managers.mesh_manager.release_resource_by_id(mesh_id);
        assert_eq!(live_buffers(&device_context), 2);
        for _ in 0..4 {
            resource_managers.on_frame_complete();
        }
        assert_eq!(live_buffers(&device_context), 0);
    }

    #[test]
    fn test_failure_notifies_once() {
        let mut test = TestStreamer::new();
        let mut broken = checkerboard();
        broken.data.pop();
        let texture = test.add_file(
            "Example/Texture/Broken.texture",
            broken.to_bytes().unwrap(),
        );
        let truncated = test.add_file("Example/Texture/Truncated.texture", vec![1, 2, 3]);
        // Registered but not on disk
        let missing = test.package.add_asset("Example/Texture/Missing.texture");
        let (mut streamer, resource_managers, _device_context) = test.start(&Default::default());

        let listener = Arc::new(RecordingListener::default());
        let texture_manager = &resource_managers.texture_manager;
        let ids: Vec<ResourceId> = [texture, truncated, missing]
            .iter()
            .map(|asset_id| {
                texture_manager.load_resource_by_asset_id(
                    *asset_id,
                    Some(listener.clone()),
                    false,
                    None,
                )
            })
            .collect();
        streamer.flush_all_queues(&resource_managers);

        for resource_id in &ids {
            assert_eq!(
                texture_manager.loading_state(*resource_id),
                Some(LoadingState::Failed)
            );
            assert!(texture_manager
                .with_resource(*resource_id, |x: &TextureResource| x.texture.is_none())
                .unwrap());
        }
        let notifications = listener.notifications.lock().unwrap().clone();
        for asset_id in &[texture, truncated, missing] {
            let failed = notifications
                .iter()
                .filter(|x| **x == (*asset_id, LoadingState::Failed))
                .count();
            assert_eq!(failed, 1);
        }

        // Listeners got detached, a reload reports to nobody
        let count = notifications.len();
        texture_manager.reload_resource_by_asset_id(texture);
        streamer.flush_all_queues(&resource_managers);
        assert_eq!(listener.notifications.lock().unwrap().len(), count);
    }

    #[test]
    fn test_reload_replaces_content() {
        let mut test = TestStreamer::new();
        let piece_path = "Example/ShaderPiece/Lighting.shader_piece";
        let piece = test.add_file(
            piece_path,
            ShaderPieceFile {
                source_code: "old".to_string(),
            }
            .to_bytes().unwrap(),
        );
        let file_manager = test.file_manager.clone();
        let (mut streamer, resource_managers, _device_context) = test.start(&Default::default());
        let shader_piece_manager = &resource_managers.shader_piece_manager;

        let resource_id = shader_piece_manager.load_resource_by_asset_id(piece, None, false, None);
        streamer.flush_all_queues(&resource_managers);
        assert_eq!(
            shader_piece_manager
                .with_resource(resource_id, |x| x.source_code.clone())
                .unwrap(),
            "old"
        );

        file_manager.insert_file(
            piece_path,
            ShaderPieceFile {
                source_code: "new".to_string(),
            }
            .to_bytes().unwrap(),
        );
        // Issued twice, only the newest result is kept
        shader_piece_manager.reload_resource_by_asset_id(piece);
        let reloaded = shader_piece_manager.reload_resource_by_asset_id(piece);
        assert_eq!(reloaded, resource_id);
        streamer.flush_all_queues(&resource_managers);

        assert_eq!(
            shader_piece_manager.loading_state(resource_id),
            Some(LoadingState::Loaded)
        );
        assert_eq!(
            shader_piece_manager
                .with_resource(resource_id, |x| x.source_code.clone())
                .unwrap(),
            "new"
        );
        assert_eq!(shader_piece_manager.number_of_resources(), 1);
    }

    #[test]
    fn test_dispatch_limit() {
        let mut test = TestStreamer::new();
        let pieces: Vec<AssetId> = (0..5)
            .map(|index| {
                test.add_file(
                    &format!("Example/ShaderPiece/Piece{}.shader_piece", index),
                    ShaderPieceFile {
                        source_code: format!("piece {}", index),
                    }
                    .to_bytes().unwrap(),
                )
            })
            .collect();
        let blueprint = test.add_file(
            "Example/ShaderBlueprint/Lit.shader_blueprint",
            ShaderBlueprintFile {
                included_shader_piece_asset_ids: pieces.clone(),
                source_code: "@includepiece(Piece0)".to_string(),
            }
            .to_bytes().unwrap(),
        );
        let config = ResourceStreamerConfig {
            number_of_worker_threads: 1,
            maximum_number_of_dispatches_per_frame: 2,
        };
        let (mut streamer, resource_managers, _device_context) = test.start(&config);

        let blueprint_id = resource_managers
            .shader_blueprint_manager
            .load_resource_by_asset_id(blueprint, None, false, None);
        while streamer.number_of_in_flight_load_requests() > 0 {
            assert!(streamer.dispatch(&resource_managers) <= 2);
            std::thread::yield_now();
        }

        assert_eq!(
            resource_managers
                .shader_blueprint_manager
                .loading_state(blueprint_id),
            Some(LoadingState::Loaded)
        );
        assert_eq!(resource_managers.shader_piece_manager.number_of_resources(), 5);
        for resource_id in resource_managers.shader_piece_manager.resource_ids() {
            assert_eq!(
                resource_managers.shader_piece_manager.loading_state(resource_id),
                Some(LoadingState::Loaded)
            );
        }
    }
}
