//! Engine plugin definition for the relay output.

use std::sync::Arc;

use tracing::debug;

use relay_engine::{
    EngineError, EngineResult, OutputDefinition, OutputInstance, OutputRef, OutputRegistry,
    OutputSettings, Registration,
};
use relay_types::Packet;

use crate::session::{
    CallbackUpdate, DataCallback, RelaySession, SessionConfig, SessionMonitor, StopCallback,
};
use crate::{STREAM_OUTPUT_ID, STREAM_OUTPUT_NAME};

/// Host context carried in the settings extension slot.
///
/// At create time both endpoints are required. At update time any endpoint
/// present replaces the current one.
#[derive(Clone, Default)]
pub struct RelayCallbacks {
    pub on_data: Option<DataCallback>,
    pub on_stop: Option<StopCallback>,
    pub monitor: Option<SessionMonitor>,
}

impl RelayCallbacks {
    pub fn new(on_data: DataCallback, on_stop: StopCallback) -> Self {
        Self {
            on_data: Some(on_data),
            on_stop: Some(on_stop),
            monitor: None,
        }
    }

    /// Report session state and counters through `monitor`.
    pub fn with_monitor(mut self, monitor: SessionMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

/// The `stream_output` output type.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamOutputDefinition;

impl OutputDefinition for StreamOutputDefinition {
    fn id(&self) -> &'static str {
        STREAM_OUTPUT_ID
    }

    fn display_name(&self) -> &'static str {
        STREAM_OUTPUT_NAME
    }

    fn create(
        &self,
        settings: &OutputSettings,
        output: OutputRef,
    ) -> EngineResult<Box<dyn OutputInstance>> {
        let callbacks = settings
            .extension::<RelayCallbacks>()
            .ok_or_else(|| create_error("relay callbacks not attached to settings"))?;

        let session = RelaySession::new(SessionConfig {
            output: Some(output),
            on_data: callbacks.on_data.clone(),
            on_stop: callbacks.on_stop.clone(),
            monitor: callbacks.monitor.clone(),
        })
        .map_err(|e| create_error(e.to_string()))?;

        Ok(Box::new(StreamOutputInstance { session }))
    }
}

fn create_error(message: impl Into<String>) -> EngineError {
    EngineError::OutputCreate {
        id: STREAM_OUTPUT_ID.to_string(),
        message: message.into(),
    }
}

/// Register the relay output type with `registry` if it is not there yet.
pub fn load_stream_output(registry: &OutputRegistry) -> Registration {
    registry.register_once(STREAM_OUTPUT_ID, || {
        Arc::new(StreamOutputDefinition) as Arc<dyn OutputDefinition>
    })
}

/// Engine hooks for one relay output. Dropping it destroys the session.
struct StreamOutputInstance {
    session: RelaySession,
}

impl OutputInstance for StreamOutputInstance {
    fn start(&self) -> bool {
        self.session.start()
    }

    fn stop(&self, ts: u64) {
        self.session.stop(ts);
    }

    fn encoded_packet(&self, packet: &Packet) {
        self.session.on_packet(packet);
    }

    fn update(&self, settings: &OutputSettings) {
        let Some(callbacks) = settings.extension::<RelayCallbacks>() else {
            debug!("Update carried no relay callbacks");
            return;
        };

        self.session.update(CallbackUpdate {
            on_data: callbacks.on_data.clone(),
            on_stop: callbacks.on_stop.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use relay_engine::{Engine, EngineConfig};
    use relay_host::{HostConfig, HostRuntime};
    use relay_types::HostPacket;

    use super::*;

    #[test]
    fn test_load_registers_once() {
        let registry = OutputRegistry::new();
        let first = load_stream_output(&registry);
        let second = load_stream_output(&registry);

        assert_eq!(first.id(), "stream_output");
        assert_eq!(second.display_name(), "Stream Output");
        assert!(Arc::ptr_eq(first.definition(), second.definition()));
        assert_eq!(registry.ids(), vec!["stream_output"]);
    }

    #[test]
    fn test_registries_are_independent() {
        let a = OutputRegistry::new();
        let b = OutputRegistry::new();
        load_stream_output(&a);
        assert!(a.contains(STREAM_OUTPUT_ID));
        assert!(!b.contains(STREAM_OUTPUT_ID));
    }

    #[test]
    fn test_create_requires_callbacks() {
        let engine = Engine::new(EngineConfig::default());
        load_stream_output(engine.registry());

        let missing = engine.create_output(STREAM_OUTPUT_ID, "relay", OutputSettings::new());
        assert!(matches!(missing, Err(EngineError::OutputCreate { .. })));

        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let on_data = runtime
            .handle()
            .register("onData", |_packet: HostPacket| {})
            .unwrap();
        let partial = RelayCallbacks {
            on_data: Some(on_data),
            ..Default::default()
        };
        let settings = OutputSettings::new().with_extension(partial);
        match engine.create_output(STREAM_OUTPUT_ID, "relay", settings) {
            Err(EngineError::OutputCreate { message, .. }) => {
                assert!(message.contains("onStop"), "{message}")
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("output created without a stop callback"),
        }
    }

    #[test]
    fn test_create_with_callbacks() {
        let engine = Engine::new(EngineConfig::default());
        load_stream_output(engine.registry());
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();

        let on_data = runtime.handle().register("onData", |_: HostPacket| {}).unwrap();
        let on_stop = runtime.handle().register("onStop", |()| {}).unwrap();
        let monitor = SessionMonitor::new();
        let settings = OutputSettings::new()
            .with_extension(RelayCallbacks::new(on_data, on_stop).with_monitor(monitor.clone()));

        let output = engine
            .create_output(STREAM_OUTPUT_ID, "relay", settings)
            .unwrap();
        assert_eq!(output.id(), "stream_output");
        assert_eq!(monitor.state(), relay_types::SessionState::Created);

        output.close();
        assert_eq!(monitor.state(), relay_types::SessionState::Destroyed);
    }
}
