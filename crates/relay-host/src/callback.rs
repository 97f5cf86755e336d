//! Thread-safe handles to host callbacks.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::HostError;
use crate::queue::{CallbackTable, Shared};
use crate::HostResult;

struct CallbackInner {
    id: u64,
    name: String,
    shared: Arc<Shared>,
}

impl Drop for CallbackInner {
    fn drop(&mut self) {
        let id = self.id;
        let released = self.shared.submit(Box::new(move |table: &mut CallbackTable| {
            table.remove(id);
        }));

        match released {
            Ok(()) => debug!(name = %self.name, id, "Released host callback"),
            Err(_) => trace!(name = %self.name, id, "Host gone; callback released with the loop"),
        }
    }
}

/// A callback that lives on the host thread and can be called from any
/// thread.
///
/// Clones share one registration; the callback is unregistered when the
/// last clone is dropped.
pub struct ThreadSafeCallback<T> {
    inner: Arc<CallbackInner>,
    _args: PhantomData<fn(T)>,
}

impl<T: 'static> ThreadSafeCallback<T> {
    pub(crate) fn new(id: u64, name: String, shared: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(CallbackInner { id, name, shared }),
            _args: PhantomData,
        }
    }

    /// Call the host callback with `args` and wait for it to return.
    pub fn blocking_call(&self, args: T) -> HostResult<()>
    where
        T: Send,
    {
        self.call_on_host(args, |callback, args| callback(args))
    }

    /// Move `data` to the host thread, convert it there with `marshal`,
    /// call the callback and wait for it to return.
    ///
    /// `data` stays alive until the callback has returned and is dropped
    /// on the host thread before this call returns, so anything it owns
    /// is held for the whole call and released by the time the caller
    /// resumes.
    pub fn blocking_call_with<D, M>(&self, data: D, marshal: M) -> HostResult<()>
    where
        D: Send + 'static,
        M: FnOnce(&D) -> T + Send + 'static,
    {
        self.call_on_host(data, move |callback, data| {
            callback(marshal(&data));
            drop(data);
        })
    }

    fn call_on_host<D, F>(&self, data: D, invoke: F) -> HostResult<()>
    where
        D: Send + 'static,
        F: FnOnce(&mut Box<dyn FnMut(T) + Send>, D) + Send + 'static,
    {
        if self.inner.shared.is_host_thread() {
            return Err(HostError::Reentrant(self.inner.name.clone()));
        }

        let id = self.inner.id;
        let name = self.inner.name.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<HostResult<()>>(1);

        self.inner.shared.submit(Box::new(move |table: &mut CallbackTable| {
            let outcome = match table.get_mut::<T>(id) {
                Some(callback) => panic::catch_unwind(AssertUnwindSafe(move || invoke(callback, data)))
                    .map_err(|_| {
                        warn!(%name, "Host callback panicked");
                        HostError::CallbackPanicked(name)
                    }),
                None => {
                    drop((data, invoke));
                    Err(HostError::Released(name))
                }
            };
            let _ = done_tx.send(outcome);
        }))?;

        done_rx.recv().map_err(|_| HostError::QueueClosed)?
    }

    /// Name given at registration.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registration id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns true if both handles refer to the same registration.
    pub fn same_callback(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for ThreadSafeCallback<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _args: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ThreadSafeCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeCallback")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}
