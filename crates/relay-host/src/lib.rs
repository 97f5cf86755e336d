//! Host runtime callback queue.
//!
//! The host runtime executes all of its callbacks on one thread. Other
//! threads reach it through [`ThreadSafeCallback`] handles, whose calls
//! are queued to the host loop and block the caller until the callback has
//! run and returned.

mod callback;
mod error;
mod queue;

pub use callback::ThreadSafeCallback;
pub use error::HostError;
pub use queue::{HostConfig, HostHandle, HostLoop, HostRuntime};

/// Result type for host queue operations.
pub type HostResult<T> = Result<T, HostError>;

/// Default name of the host loop thread.
pub const HOST_THREAD_NAME: &str = "host-queue";
