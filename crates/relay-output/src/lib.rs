//! Packet relay output.
//!
//! A custom engine output whose hooks forward every encoded packet and the
//! end-of-stream signal to callbacks running on the host thread. Each
//! hand-off blocks the engine's capture thread until the host callback has
//! returned, which is the relay's only backpressure.

mod definition;
mod error;
mod session;
mod stream_output;

pub use definition::{load_stream_output, RelayCallbacks, StreamOutputDefinition};
pub use error::RelayError;
pub use session::{
    CallbackUpdate, DataCallback, RelaySession, SessionConfig, SessionMonitor, StopCallback,
};
pub use stream_output::{DataHandler, StopHandler, StreamOutput};

/// Type id the relay output registers under.
pub const STREAM_OUTPUT_ID: &str = "stream_output";

/// Display name of the relay output type.
pub const STREAM_OUTPUT_NAME: &str = "Stream Output";

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
