//! Serial task queue backed by a small pool of named worker threads.
//!
//! FIFO order, lock-protected append + condvar signal. With one worker the
//! queue is strictly serial (used for event publication); with N workers
//! tasks start in submission order but may overlap.
//!
//! `enqueue()` never blocks and is safe to call from inside a running task:
//! the queue lock is never held while a task executes.

use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueueShared {
    tasks: Mutex<VecDeque<Task>>,
    task_ready: Condvar,
    terminated: AtomicBool,
}

/// FIFO task queue drained by `num_threads` workers.
///
/// # Example
/// ```ignore
/// let queue = TaskQueue::serial("framewire-events");
/// assert!(queue.enqueue(|| log::info!("runs on framewire-events")));
/// queue.terminate();
/// assert!(!queue.enqueue(|| unreachable!()));
/// ```
pub struct TaskQueue {
    shared: Arc<QueueShared>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>, // Thread handles for shutdown
    name: String,
}

impl TaskQueue {
    /// Create queue with `num_threads` workers (at least one).
    ///
    /// Workers are named `{name}-{n}`.
    pub fn new(num_threads: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        let num_threads = num_threads.max(1);
        let shared = Arc::new(QueueShared {
            tasks: Mutex::new(VecDeque::new()),
            task_ready: Condvar::new(),
            terminated: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let shared = Arc::clone(&shared);
            let thread_name = format!("{}-{}", name, worker_id);
            let spawned = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || Self::run(&shared, &thread_name));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!("Failed to spawn worker {}-{}: {}", name, worker_id, e),
            }
        }

        trace!("TaskQueue '{}' initialized: {} threads", name, handles.len());

        Self {
            shared,
            handles: Mutex::new(handles),
            name,
        }
    }

    /// Single-worker queue: strict one-at-a-time execution.
    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(1, name)
    }

    /// Append task to the queue.
    ///
    /// Returns `false` (task dropped, never run) once the queue is terminated.
    pub fn enqueue<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            // Checked under the lock so terminate() can't slip in between
            if self.shared.terminated.load(Ordering::Acquire) {
                return false;
            }
            tasks.push_back(Box::new(task));
        }
        self.shared.task_ready.notify_one();
        true
    }

    /// Close the queue and wake every worker. Idempotent.
    ///
    /// Tasks still queued are discarded (their captures are dropped here).
    pub fn terminate(&self) {
        let discarded = {
            let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            if self.shared.terminated.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *tasks)
        };
        self.shared.task_ready.notify_all();

        if !discarded.is_empty() {
            debug!("TaskQueue '{}' terminated with {} pending tasks discarded", self.name, discarded.len());
        }
        drop(discarded);
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    /// Number of tasks waiting for a worker
    pub fn pending(&self) -> usize {
        self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn run(shared: &QueueShared, thread_name: &str) {
        trace!("Worker {} started", thread_name);
        loop {
            let task = {
                let mut tasks = shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    if shared.terminated.load(Ordering::Acquire) {
                        trace!("Worker {} stopped", thread_name);
                        return;
                    }
                    if let Some(task) = tasks.pop_front() {
                        break task;
                    }
                    tasks = shared.task_ready.wait(tasks).unwrap_or_else(|e| e.into_inner());
                }
            };
            task();
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.terminate();

        // Wait with timeout: a task blocked forever must not hang shutdown
        let deadline = Instant::now() + Duration::from_millis(500);
        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        let num_threads = handles.len();

        for handle in handles {
            // Last Arc dropped from inside one of our own tasks
            if handle.thread().id() == current {
                continue;
            }
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("TaskQueue '{}' shutdown timeout reached, detaching workers", self.name);
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("TaskQueue '{}': all {} workers stopped", self.name, num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_serial_fifo_order() {
        let queue = TaskQueue::serial("test-fifo");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            assert!(queue.enqueue(move || seen.lock().unwrap().push(i)));
        }
        assert!(wait_until(|| seen.lock().unwrap().len() == 50));
        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_enqueue_after_terminate_fails() {
        let queue = TaskQueue::serial("test-terminated");
        queue.terminate();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        assert!(!queue.enqueue(move || r.store(true, Ordering::SeqCst)));
        thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_terminate_idempotent() {
        let queue = TaskQueue::new(2, "test-idem");
        queue.terminate();
        let after_first = (queue.is_terminated(), queue.pending());
        queue.terminate();
        assert_eq!(after_first, (queue.is_terminated(), queue.pending()));
        assert!(queue.is_terminated());
    }

    #[test]
    fn test_reentrant_enqueue() {
        let queue = Arc::new(TaskQueue::serial("test-reentrant"));
        let counter = Arc::new(AtomicUsize::new(0));

        let q = Arc::clone(&queue);
        let c = Arc::clone(&counter);
        assert!(queue.enqueue(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c2 = Arc::clone(&c);
            assert!(q.enqueue(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 2));
    }

    #[test]
    fn test_each_task_runs_once() {
        let queue = TaskQueue::new(4, "test-once");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let c = Arc::clone(&counter);
            queue.enqueue(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(wait_until(|| counter.load(Ordering::SeqCst) == 200));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }
}
