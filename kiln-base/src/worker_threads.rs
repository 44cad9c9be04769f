use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A fixed set of named OS threads sharing one state object. Every thread receives a shutdown
/// receiver that disconnects once `stop` is called, after which the threads are joined.
pub struct WorkerThreads {
    name: String,
    shutdown_tx: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerThreads {
    pub fn spawn<T: Send + Sync + 'static>(
        name: &str,
        count: usize,
        shared: &Arc<T>,
        thread_main: fn(Arc<T>, Receiver<()>),
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let mut threads = Vec::with_capacity(count);
        for thread_index in 0..count {
            let shared = shared.clone();
            let shutdown_rx = shutdown_rx.clone();
            let spawn_result = std::thread::Builder::new()
                .name(format!("{} {}", name, thread_index))
                .spawn(move || thread_main(shared, shutdown_rx));

            match spawn_result {
                Ok(thread) => threads.push(thread),
                Err(e) => log::error!("Failed to spawn {} thread: {:?}", name, e),
            }
        }

        WorkerThreads {
            name: name.to_string(),
            shutdown_tx: Some(shutdown_tx),
            threads,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    pub fn number_of_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn stop(&mut self) {
        drop(self.shutdown_tx.take());
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("A {} thread panicked", self.name);
            }
        }
    }
}

impl Drop for WorkerThreads {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wait_for_shutdown(
        counter: Arc<AtomicUsize>,
        shutdown_rx: Receiver<()>,
    ) {
        counter.fetch_add(1, Ordering::SeqCst);
        // Returns Err once the sender is dropped
        let _ = shutdown_rx.recv();
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_stop_joins_every_thread() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut threads = WorkerThreads::spawn("test worker", 3, &counter, wait_for_shutdown);
        assert!(threads.is_running());
        assert_eq!(threads.number_of_threads(), 3);

        threads.stop();
        assert!(!threads.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 6);

        // Stopping twice is a no-op
        threads.stop();
    }
}
