//! Output plugin interface.
//!
//! An output type is described by an [`OutputDefinition`] registered with
//! the engine. Creating an output of that type yields an
//! [`OutputInstance`] whose hooks the engine calls at fixed lifecycle
//! points. Dropping the instance is the destroy hook.

use std::sync::Arc;

use relay_types::Packet;

use crate::settings::OutputSettings;
use crate::EngineResult;

/// The engine-side output an instance was created for.
///
/// Instances call back into the engine through this handle to manage
/// data capture.
pub trait OutputHandle: Send + Sync {
    /// Name given to the output at creation.
    fn name(&self) -> &str;

    /// Whether capture can begin: not already capturing and at least one
    /// encoder assigned.
    fn can_begin_data_capture(&self) -> bool;

    /// Initialize every encoder assigned to the output.
    fn initialize_encoders(&self) -> bool;

    /// Start routing encoded packets to the instance.
    fn begin_data_capture(&self) -> bool;

    /// Stop routing encoded packets to the instance.
    fn end_data_capture(&self);
}

/// Shared pointer to an engine output.
pub type OutputRef = Arc<dyn OutputHandle>;

/// A registered output type.
pub trait OutputDefinition: Send + Sync {
    /// Unique type id used to create outputs.
    fn id(&self) -> &'static str;

    /// Human readable name.
    fn display_name(&self) -> &'static str;

    /// Create an instance for `output`.
    fn create(
        &self,
        settings: &OutputSettings,
        output: OutputRef,
    ) -> EngineResult<Box<dyn OutputInstance>>;

    /// Settings applied before user settings at create time.
    fn defaults(&self) -> OutputSettings {
        OutputSettings::new()
    }
}

/// One live output of a registered type.
pub trait OutputInstance: Send + Sync {
    /// Begin output. Called on the thread that started the output.
    fn start(&self) -> bool;

    /// End output. Called on the output's capture thread.
    fn stop(&self, ts: u64);

    /// Handle one encoded packet. Called on the output's capture thread.
    fn encoded_packet(&self, packet: &Packet);

    /// Apply new settings.
    fn update(&self, settings: &OutputSettings);
}
