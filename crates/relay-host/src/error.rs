//! Error types for the host queue.

use thiserror::Error;

/// Errors that can occur when calling into the host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The host loop has shut down; the call was never executed.
    #[error("Host callback queue is closed")]
    QueueClosed,

    /// A blocking call was made from the host thread itself.
    #[error("Blocking call to '{0}' from the host thread would deadlock")]
    Reentrant(String),

    /// The callback panicked while running on the host thread.
    #[error("Host callback '{0}' panicked")]
    CallbackPanicked(String),

    /// The callback was released before the call ran.
    #[error("Host callback '{0}' has been released")]
    Released(String),

    /// The host loop thread could not be spawned.
    #[error("Failed to spawn host loop thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl HostError {
    /// Returns true if the host is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::QueueClosed)
    }
}
