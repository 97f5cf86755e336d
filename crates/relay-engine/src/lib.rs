//! Loopback media engine.
//!
//! This crate models the engine side of the relay: the output plugin
//! interface, an explicit registry of output types, outputs with their own
//! capture threads, and encoder handles that gate when capture may begin.
//! It moves already-encoded packets; it never encodes.

mod encoder;
mod engine;
mod error;
mod metrics;
mod output;
mod plugin;
mod registry;
mod settings;

pub use encoder::{AudioEncoder, AudioEncoderConfig, H264Profile, VideoEncoder, VideoEncoderConfig};
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use metrics::{CaptureMetrics, CaptureStats};
pub use output::Output;
pub use plugin::{OutputDefinition, OutputHandle, OutputInstance, OutputRef};
pub use registry::{OutputRegistry, Registration};
pub use settings::OutputSettings;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
