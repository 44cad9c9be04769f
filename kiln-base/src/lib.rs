//! Lowest level crate of `kiln`. Includes the packed element pool used by every resource manager,
//! string ids, the staged work queue shared by the streaming and pipeline compilation threads,
//! and a few other utilities

pub mod slab;

pub mod memory;

mod string_id;
pub use string_id::fnv1a_32;
pub use string_id::AssetId;
pub use string_id::Fnv1a32Hasher;
pub use string_id::StringId;

mod work_queue;
pub use work_queue::WorkQueue;

mod thread_pool;
pub use thread_pool::ThreadPool;

mod worker_threads;
pub use worker_threads::WorkerThreads;

mod drop_sink;
pub use drop_sink::ResourceDropSink;

pub mod file_format;

mod file_manager;
pub use file_manager::FileManager;
pub use file_manager::MemoryFileManager;
pub use file_manager::NativeFileManager;
