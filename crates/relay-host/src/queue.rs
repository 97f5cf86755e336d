//! The host loop and its scheduling handle.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::callback::ThreadSafeCallback;
use crate::error::HostError;
use crate::{HostResult, HOST_THREAD_NAME};

/// A unit of work executed on the host thread.
pub(crate) type Job = Box<dyn FnOnce(&mut CallbackTable) + Send>;

pub(crate) enum HostTask {
    Run(Job),
    Shutdown,
}

/// Callbacks owned by the host thread, keyed by id.
///
/// Each entry holds a `Box<dyn FnMut(T) + Send>` for the callback's
/// argument type `T`.
#[derive(Default)]
pub(crate) struct CallbackTable {
    entries: HashMap<u64, Box<dyn Any + Send>>,
}

impl CallbackTable {
    pub(crate) fn insert<T: 'static>(&mut self, id: u64, callback: Box<dyn FnMut(T) + Send>) {
        self.entries.insert(id, Box::new(callback));
    }

    pub(crate) fn get_mut<T: 'static>(&mut self, id: u64) -> Option<&mut Box<dyn FnMut(T) + Send>> {
        self.entries
            .get_mut(&id)
            .and_then(|entry| entry.downcast_mut::<Box<dyn FnMut(T) + Send>>())
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Host loop configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// How often an idle loop wakes to check for shutdown.
    pub tick: Duration,

    /// Name of the thread spawned by [`HostRuntime::spawn`].
    pub thread_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            thread_name: HOST_THREAD_NAME.to_string(),
        }
    }
}

pub(crate) struct Shared {
    tx: Sender<HostTask>,
    host_thread: OnceLock<ThreadId>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_host_thread(&self) -> bool {
        self.host_thread.get() == Some(&thread::current().id())
    }

    pub(crate) fn submit(&self, job: Job) -> HostResult<()> {
        if self.is_closed() {
            return Err(HostError::QueueClosed);
        }
        self.tx
            .send(HostTask::Run(job))
            .map_err(|_| HostError::QueueClosed)
    }
}

/// Handle for scheduling work onto the host loop.
///
/// Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct HostHandle {
    shared: Arc<Shared>,
}

impl HostHandle {
    /// Register a callback that will only ever run on the host thread.
    pub fn register<T, F>(&self, name: impl Into<String>, callback: F) -> HostResult<ThreadSafeCallback<T>>
    where
        T: 'static,
        F: FnMut(T) + Send + 'static,
    {
        let name = name.into();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let boxed: Box<dyn FnMut(T) + Send> = Box::new(callback);

        self.shared.submit(Box::new(move |table: &mut CallbackTable| {
            table.insert(id, boxed);
        }))?;

        debug!(%name, id, "Registered host callback");
        Ok(ThreadSafeCallback::new(id, name, Arc::clone(&self.shared)))
    }

    /// Queue a closure to run on the host thread without waiting for it.
    pub fn post<F>(&self, f: F) -> HostResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.submit(Box::new(move |_table: &mut CallbackTable| f()))
    }

    /// Ask the host loop to exit.
    ///
    /// Work queued before the request still runs. Work submitted afterwards
    /// is rejected or dropped, which fails its blocked callers with
    /// [`HostError::QueueClosed`].
    pub fn shutdown(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!("Host queue shutdown requested");
            let _ = self.shared.tx.send(HostTask::Shutdown);
        }
    }

    /// Returns true once shutdown has been requested.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns true if the caller is running on the host thread.
    pub fn is_host_thread(&self) -> bool {
        self.shared.is_host_thread()
    }
}

/// The single-threaded host loop.
///
/// Every registered callback and posted closure runs inside
/// [`HostLoop::run`], one at a time, in submission order.
pub struct HostLoop {
    rx: Receiver<HostTask>,
    shared: Arc<Shared>,
    table: CallbackTable,
    config: HostConfig,
}

impl HostLoop {
    /// Create a loop and the handle used to feed it.
    pub fn new(config: HostConfig) -> (Self, HostHandle) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            tx,
            host_thread: OnceLock::new(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let handle = HostHandle {
            shared: Arc::clone(&shared),
        };

        let host_loop = Self {
            rx,
            shared,
            table: CallbackTable::default(),
            config,
        };

        (host_loop, handle)
    }

    /// Run the loop on the current thread until shutdown (blocking).
    #[instrument(name = "host_loop", skip(self))]
    pub fn run(mut self) {
        if self.shared.host_thread.set(thread::current().id()).is_err() {
            warn!("Host loop already bound to another thread");
            return;
        }

        info!("Host loop starting");
        let mut executed: u64 = 0;

        loop {
            match self.rx.recv_timeout(self.config.tick) {
                Ok(HostTask::Run(job)) => {
                    job(&mut self.table);
                    executed += 1;
                    trace!(executed, "Host task complete");
                }
                Ok(HostTask::Shutdown) => {
                    debug!("Shutdown task received");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.is_closed() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.shared.closed.store(true, Ordering::SeqCst);

        let mut dropped = 0usize;
        while let Ok(task) = self.rx.try_recv() {
            if let HostTask::Run(job) = task {
                drop(job);
                dropped += 1;
            }
        }

        info!(
            executed,
            dropped,
            callbacks = self.table.len(),
            "Host loop stopped"
        );
    }
}

/// A host loop running on its own thread.
pub struct HostRuntime {
    handle: HostHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HostRuntime {
    /// Spawn the host loop on a dedicated thread.
    pub fn spawn(config: HostConfig) -> HostResult<Self> {
        let thread_name = config.thread_name.clone();
        let (host_loop, handle) = HostLoop::new(config);

        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || host_loop.run())?;

        Ok(Self {
            handle,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Handle for scheduling work onto this runtime.
    pub fn handle(&self) -> &HostHandle {
        &self.handle
    }

    /// Stop the loop and wait for its thread to exit.
    pub fn shutdown(&self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("Host loop thread panicked");
            }
        }
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
