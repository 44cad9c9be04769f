use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;

type Task<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// Runs a batch of independent tasks across a bounded number of OS threads. Used for work that
/// is split into a handful of parallel pieces, like compiling the shader stages of one pipeline.
pub struct ThreadPool<R: Send + 'static> {
    tasks: Vec<Task<R>>,
    maximum_number_of_threads: usize,
    name: String,
}

impl<R: Send + 'static> ThreadPool<R> {
    pub fn new(
        name: &str,
        maximum_number_of_threads: usize,
    ) -> Self {
        ThreadPool {
            tasks: Default::default(),
            maximum_number_of_threads: maximum_number_of_threads.max(1),
            name: name.to_string(),
        }
    }

    pub fn queue_task<F: FnOnce() -> R + Send + 'static>(
        &mut self,
        task: F,
    ) {
        self.tasks.push(Box::new(task));
    }

    pub fn number_of_queued_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Run every queued task and block until all of them finished. Results are returned in the
    /// order the tasks were queued.
    pub fn process(&mut self) -> Vec<R> {
        let tasks = std::mem::take(&mut self.tasks);
        run_tasks(&self.name, self.maximum_number_of_threads, tasks)
    }

    /// Run every queued task and return immediately. The callback receives the results (in
    /// queue order) on a detached thread once all tasks finished.
    pub fn process_with_callback<F: FnOnce(Vec<R>) + Send + 'static>(
        &mut self,
        callback: F,
    ) {
        let tasks = std::mem::take(&mut self.tasks);
        let name = self.name.clone();
        let maximum_number_of_threads = self.maximum_number_of_threads;
        let spawn_result = std::thread::Builder::new()
            .name(format!("{} callback", name))
            .spawn(move || {
                profiling::register_thread!();
                let results = run_tasks(&name, maximum_number_of_threads, tasks);
                callback(results);
            });

        if let Err(e) = spawn_result {
            log::error!("Failed to spawn thread pool callback thread: {:?}", e);
        }
    }
}

fn run_tasks<R: Send + 'static>(
    name: &str,
    maximum_number_of_threads: usize,
    tasks: Vec<Task<R>>,
) -> Vec<R> {
    profiling::scope!("ThreadPool::run_tasks");
    let task_count = tasks.len();
    if task_count == 0 {
        return Vec::new();
    }

    // Not worth a thread for a single task
    if task_count == 1 || maximum_number_of_threads == 1 {
        return tasks.into_iter().map(|task| task()).collect();
    }

    let (task_tx, task_rx): (Sender<(usize, Task<R>)>, Receiver<(usize, Task<R>)>) =
        crossbeam_channel::unbounded();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, R)>();
    for task in tasks.into_iter().enumerate() {
        let _ = task_tx.send(task);
    }
    drop(task_tx);

    let thread_count = task_count.min(maximum_number_of_threads);
    let mut threads: Vec<JoinHandle<()>> = Vec::with_capacity(thread_count);
    for thread_index in 0..thread_count {
        let task_rx = task_rx.clone();
        let result_tx = result_tx.clone();
        let spawn_result = std::thread::Builder::new()
            .name(format!("{} {}", name, thread_index))
            .spawn(move || {
                profiling::register_thread!();
                for (index, task) in task_rx.iter() {
                    let _ = result_tx.send((index, task()));
                }
            });

        match spawn_result {
            Ok(thread) => threads.push(thread),
            Err(e) => log::error!("Failed to spawn thread pool thread: {:?}", e),
        }
    }
    // If no thread could be spawned, run what is left here
    if threads.is_empty() {
        for (index, task) in task_rx.try_iter() {
            let _ = result_tx.send((index, task()));
        }
    }
    drop(result_tx);

    let mut results: Vec<Option<R>> = (0..task_count).map(|_| None).collect();
    for (index, result) in result_rx.iter() {
        results[index] = Some(result);
    }

    for thread in threads {
        if thread.join().is_err() {
            log::error!("A {} thread panicked", name);
        }
    }

    results.into_iter().flatten().collect()
}
