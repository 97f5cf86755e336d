//! Error types for the relay output.

use relay_engine::EngineError;
use relay_host::HostError;
use thiserror::Error;

/// Errors that can occur setting up or driving a relay output.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No engine output handle was supplied.
    #[error("Output handle missing")]
    MissingOutput,

    /// A required host callback was not supplied.
    #[error("Missing {0} callback")]
    MissingCallback(&'static str),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine refused to start the output.
    #[error("could not start output")]
    StartFailed,

    /// Engine error.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Host queue error.
    #[error(transparent)]
    Host(#[from] HostError),
}
