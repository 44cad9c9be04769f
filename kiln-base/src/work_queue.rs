use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};

struct WorkQueueInner<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    // Items pushed but not yet completed by a consumer, including the ones being worked on
    pending: Mutex<usize>,
    idle: Condvar,
}

/// One stage of a producer/consumer pipeline. Items are pushed from any thread and popped by
/// worker threads, which call `complete_one` once they are done with an item (usually after
/// handing it to the next stage). `wait_until_idle` is a barrier that returns once every pushed
/// item has been completed.
pub struct WorkQueue<T> {
    inner: Arc<WorkQueueInner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        WorkQueue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        WorkQueue {
            inner: Arc::new(WorkQueueInner {
                tx,
                rx,
                pending: Mutex::new(0),
                idle: Condvar::new(),
            }),
        }
    }

    /// Never blocks
    pub fn push(
        &self,
        item: T,
    ) {
        *self.inner.pending.lock().unwrap() += 1;
        // Can't fail, we hold the receiver ourselves
        let _ = self.inner.tx.send(item);
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.rx.try_recv().ok()
    }

    /// Blocks until an item is available or `shutdown_rx` becomes ready. Dropping the sender of
    /// `shutdown_rx` releases every thread waiting here.
    pub fn pop_or_shutdown(
        &self,
        shutdown_rx: &Receiver<()>,
    ) -> Option<T> {
        crossbeam_channel::select! {
            recv(self.inner.rx) -> item => item.ok(),
            recv(shutdown_rx) -> _ => None,
        }
    }

    /// Must be called exactly once for every popped item
    pub fn complete_one(&self) {
        let mut pending = self.inner.pending.lock().unwrap();
        assert!(*pending > 0, "completed more items than were pushed");
        *pending -= 1;
        if *pending == 0 {
            self.inner.idle.notify_all();
        }
    }

    pub fn pending_count(&self) -> usize {
        *self.inner.pending.lock().unwrap()
    }

    /// Items waiting to be popped
    pub fn queued_count(&self) -> usize {
        self.inner.rx.len()
    }

    pub fn wait_until_idle(&self) {
        let mut pending = self.inner.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.inner.idle.wait(pending).unwrap();
        }
    }

    /// Pop everything still queued without processing it
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.inner.rx.try_iter().collect();
        for _ in &items {
            self.complete_one();
        }
        items
    }
}
