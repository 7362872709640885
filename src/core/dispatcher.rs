//! Thread-affine dispatcher: every task runs on the thread that created it.
//!
//! The engine is not thread-safe and must always be driven from one thread.
//! `AffinityDispatcher` pins work to that thread and mints an
//! [`AffinityToken`] for each task it runs. The token is `!Send`, so holding
//! one proves the caller is on the owning thread; player commands demand it.
//!
//! Two submission paths:
//! - `dispatch()`: runs inline when already on the owner thread, else queues
//! - `post()`: always queues, used from engine callbacks to avoid reentrancy
//!
//! Something on the owner thread has to pump the queue: either `run()`
//! (blocking loop, see [`AffinityDispatcher::spawn`]) or `process_tasks()`
//! driven by a host message loop through a [`WakeSignal`].

use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

pub type AffinityTask = Box<dyn FnOnce(&AffinityToken) + Send + 'static>;

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Proof of running on a dispatcher's owner thread.
///
/// Cannot be constructed outside this module and cannot leave the thread
/// (`!Send + !Sync`).
#[derive(Debug)]
pub struct AffinityToken {
    dispatcher_id: u64,
    _not_send: PhantomData<*const ()>,
}

impl AffinityToken {
    fn new(dispatcher_id: u64) -> Self {
        Self {
            dispatcher_id,
            _not_send: PhantomData,
        }
    }

    pub fn dispatcher_id(&self) -> u64 {
        self.dispatcher_id
    }
}

/// Platform wake primitive (message window, event loop proxy, ...).
///
/// Invoked after a task is queued from a foreign thread. The implementation
/// must arrange for `process_tasks()` to be called on the owner thread.
pub trait WakeSignal: Send + Sync {
    fn wake(&self);
}

struct DispatchState {
    tasks: VecDeque<AffinityTask>,
    terminated: bool,
}

pub struct AffinityDispatcher {
    id: u64,
    owner: ThreadId,
    state: Mutex<DispatchState>,
    task_ready: Condvar,
    wake_signal: Option<Arc<dyn WakeSignal>>,
}

impl std::fmt::Debug for AffinityDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityDispatcher")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl AffinityDispatcher {
    /// Bind a new dispatcher to the calling thread.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Bind to the calling thread and notify `signal` whenever work is queued.
    pub fn with_wake_signal(signal: Arc<dyn WakeSignal>) -> Arc<Self> {
        Self::build(Some(signal))
    }

    fn build(wake_signal: Option<Arc<dyn WakeSignal>>) -> Arc<Self> {
        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        trace!("AffinityDispatcher {} bound to {:?}", id, thread::current().id());
        Arc::new(Self {
            id,
            owner: thread::current().id(),
            state: Mutex::new(DispatchState {
                tasks: VecDeque::new(),
                terminated: false,
            }),
            task_ready: Condvar::new(),
            wake_signal,
        })
    }

    /// Spawn a dedicated affinity thread running the pump loop.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<AffinityThread> {
        let name = name.into();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let dispatcher = AffinityDispatcher::new();
            if tx.send(Arc::clone(&dispatcher)).is_err() {
                return;
            }
            dispatcher.run();
        })?;

        let dispatcher = rx.recv().map_err(|_| {
            std::io::Error::other(format!("affinity thread '{}' exited during startup", name))
        })?;

        Ok(AffinityThread {
            dispatcher,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn runs_on_current_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Mint a token if called on the owner thread.
    pub fn token(&self) -> Option<AffinityToken> {
        self.runs_on_current_thread().then(|| AffinityToken::new(self.id))
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).terminated
    }

    /// Number of queued tasks not yet run
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).tasks.len()
    }

    /// Run `task` on the owner thread: inline if already there, else queued.
    ///
    /// Returns `false` (task never runs) after `terminate()`.
    pub fn dispatch<F>(&self, task: F) -> bool
    where
        F: FnOnce(&AffinityToken) + Send + 'static,
    {
        if self.runs_on_current_thread() {
            if self.is_terminated() {
                return false;
            }
            task(&AffinityToken::new(self.id));
            return true;
        }
        self.post(task)
    }

    /// Queue `task` for the owner thread, never running it inline.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&AffinityToken) + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.terminated {
                return false;
            }
            state.tasks.push_back(Box::new(task));
        }
        self.task_ready.notify_all();
        if let Some(signal) = &self.wake_signal {
            signal.wake();
        }
        true
    }

    /// Run every task queued so far. Owner thread only.
    ///
    /// Tasks posted while this batch runs wait for the next call.
    /// Returns the number of tasks executed.
    pub fn process_tasks(&self) -> usize {
        if !self.runs_on_current_thread() {
            warn!("AffinityDispatcher {}: process_tasks() called off the owner thread", self.id);
            return 0;
        }
        let batch = std::mem::take(&mut self.state.lock().unwrap_or_else(|e| e.into_inner()).tasks);
        let count = batch.len();
        let token = AffinityToken::new(self.id);
        for task in batch {
            task(&token);
        }
        count
    }

    /// Wait up to `timeout` for work, then run it. Owner thread only.
    pub fn pump(&self, timeout: Duration) -> usize {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.tasks.is_empty() && !state.terminated {
                let _ = self
                    .task_ready
                    .wait_timeout_while(state, timeout, |s| s.tasks.is_empty() && !s.terminated)
                    .unwrap_or_else(|e| e.into_inner());
            }
        }
        self.process_tasks()
    }

    /// Blocking pump loop for a dedicated affinity thread.
    ///
    /// Returns after `terminate()`, once the remaining tasks are drained.
    pub fn run(&self) {
        if !self.runs_on_current_thread() {
            warn!("AffinityDispatcher {}: run() called off the owner thread", self.id);
            return;
        }
        trace!("AffinityDispatcher {} loop started", self.id);
        loop {
            let terminated = {
                let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let state = self
                    .task_ready
                    .wait_while(state, |s| s.tasks.is_empty() && !s.terminated)
                    .unwrap_or_else(|e| e.into_inner());
                state.terminated
            };
            self.process_tasks();
            if terminated {
                // post() fails from here on, so this drain is final
                self.process_tasks();
                break;
            }
        }
        trace!("AffinityDispatcher {} loop stopped", self.id);
    }

    /// Close the dispatcher. Idempotent.
    ///
    /// On the owner thread, remaining tasks are run before returning.
    /// From any other thread the owner is woken and drains in `run()`.
    pub fn terminate(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.terminated {
                return;
            }
            state.terminated = true;
        }
        self.task_ready.notify_all();
        if let Some(signal) = &self.wake_signal {
            signal.wake();
        }

        if self.runs_on_current_thread() {
            let drained = self.process_tasks();
            debug!("AffinityDispatcher {} terminated, drained {} tasks", self.id, drained);
        } else {
            debug!("AffinityDispatcher {} terminated from foreign thread", self.id);
        }
    }
}

impl Drop for AffinityDispatcher {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if !state.tasks.is_empty() {
            warn!(
                "AffinityDispatcher {} dropped with {} unprocessed tasks",
                self.id,
                state.tasks.len()
            );
        }
    }
}

/// Dedicated thread owning an [`AffinityDispatcher`].
///
/// Dropping it terminates the dispatcher and joins the thread.
pub struct AffinityThread {
    dispatcher: Arc<AffinityDispatcher>,
    handle: Option<JoinHandle<()>>,
}

impl AffinityThread {
    pub fn dispatcher(&self) -> &Arc<AffinityDispatcher> {
        &self.dispatcher
    }

    /// Terminate the dispatcher and wait for its thread to drain and exit.
    pub fn shutdown(&mut self) {
        self.dispatcher.terminate();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for AffinityThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn test_inline_on_owner_thread() {
        let dispatcher = AffinityDispatcher::new();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        assert!(dispatcher.dispatch(move |_| r.store(true, Ordering::SeqCst)));
        // Ran synchronously, nothing queued
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_post_never_inline() {
        let dispatcher = AffinityDispatcher::new();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        assert!(dispatcher.post(move |_| r.store(true, Ordering::SeqCst)));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(dispatcher.process_tasks(), 1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_foreign_dispatch_runs_on_owner() {
        let affinity = AffinityDispatcher::spawn("test-affinity").unwrap();
        let dispatcher = Arc::clone(affinity.dispatcher());
        assert!(!dispatcher.runs_on_current_thread());

        let (tx, rx) = crossbeam_channel::bounded(1);
        let d = Arc::clone(&dispatcher);
        assert!(dispatcher.dispatch(move |token| {
            let _ = tx.send((d.runs_on_current_thread(), token.dispatcher_id()));
        }));
        let (on_owner, id) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(on_owner);
        assert_eq!(id, dispatcher.id());
    }

    #[test]
    fn test_token_only_on_owner() {
        let dispatcher = AffinityDispatcher::new();
        assert!(dispatcher.token().is_some());

        let d = Arc::clone(&dispatcher);
        let off_thread = thread::spawn(move || d.token().is_none()).join().unwrap();
        assert!(off_thread);
    }

    #[test]
    fn test_terminate_drains_on_owner() {
        let dispatcher = AffinityDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&counter);
            dispatcher.post(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        dispatcher.terminate();
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        // Second terminate: same observable state
        dispatcher.terminate();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(dispatcher.is_terminated());
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_dispatch_after_terminate_fails() {
        let dispatcher = AffinityDispatcher::new();
        dispatcher.terminate();
        let ran = Arc::new(AtomicBool::new(false));
        let r1 = Arc::clone(&ran);
        let r2 = Arc::clone(&ran);
        assert!(!dispatcher.dispatch(move |_| r1.store(true, Ordering::SeqCst)));
        assert!(!dispatcher.post(move |_| r2.store(true, Ordering::SeqCst)));
        dispatcher.process_tasks();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wake_signal_invoked() {
        struct CountingSignal(AtomicUsize);
        impl WakeSignal for CountingSignal {
            fn wake(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let signal = Arc::new(CountingSignal(AtomicUsize::new(0)));
        let dispatcher = AffinityDispatcher::with_wake_signal(signal.clone());
        let d = Arc::clone(&dispatcher);
        thread::spawn(move || {
            d.dispatch(|_| {});
        })
        .join()
        .unwrap();
        assert_eq!(signal.0.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.process_tasks(), 1);
    }

    #[test]
    fn test_shutdown_drains_foreign_posts() {
        let mut affinity = AffinityDispatcher::spawn("test-drain").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            affinity.dispatcher().post(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        affinity.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
