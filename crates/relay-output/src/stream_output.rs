//! Host-facing relay output.

use tracing::{debug, info, instrument, warn};

use relay_engine::{AudioEncoder, Engine, Output, OutputSettings, VideoEncoder};
use relay_host::HostHandle;
use relay_types::{HostPacket, RelayStats, SessionState};

use crate::definition::{load_stream_output, RelayCallbacks};
use crate::error::RelayError;
use crate::session::{DataCallback, SessionMonitor, StopCallback};
use crate::{RelayResult, STREAM_OUTPUT_ID};

/// Boxed host data handler, for replacing callbacks after creation.
pub type DataHandler = Box<dyn FnMut(HostPacket) + Send>;

/// Boxed host stop handler.
pub type StopHandler = Box<dyn FnMut() + Send>;

/// A relay output as seen from the host.
///
/// Owns the engine output. The data and stop handlers run on the host
/// thread; the engine's capture thread waits for each of them to return.
pub struct StreamOutput {
    output: Output,
    host: HostHandle,
    monitor: SessionMonitor,
}

impl StreamOutput {
    /// Create a relay output named `name` whose packets go to `on_data`
    /// and whose end of stream goes to `on_stop`.
    pub fn new<D, S>(
        engine: &Engine,
        host: &HostHandle,
        name: &str,
        on_data: D,
        on_stop: S,
    ) -> RelayResult<Self>
    where
        D: FnMut(HostPacket) + Send + 'static,
        S: FnMut() + Send + 'static,
    {
        if name.is_empty() {
            return Err(RelayError::InvalidArgument(
                "output name must not be empty".into(),
            ));
        }

        load_stream_output(engine.registry());

        let on_data = register_data(host, name, on_data)?;
        let on_stop = register_stop(host, name, on_stop)?;
        let monitor = SessionMonitor::new();
        let callbacks = RelayCallbacks::new(on_data, on_stop).with_monitor(monitor.clone());

        let output = engine.create_output(
            STREAM_OUTPUT_ID,
            name,
            OutputSettings::new().with_extension(callbacks),
        )?;

        info!(%name, "Stream output created");

        Ok(Self {
            output,
            host: host.clone(),
            monitor,
        })
    }

    pub fn name(&self) -> &str {
        self.output.name()
    }

    pub fn set_video_encoder(&self, encoder: &VideoEncoder) {
        self.output.set_video_encoder(encoder);
    }

    /// Assign an audio encoder to track `idx` (0 to 5).
    pub fn set_audio_encoder(&self, encoder: &AudioEncoder, idx: usize) -> RelayResult<()> {
        self.output.set_audio_encoder(encoder, idx)?;
        Ok(())
    }

    /// Select the audio mix the output carries.
    pub fn set_mixer(&self, idx: usize) -> RelayResult<()> {
        self.output.set_mixer(idx)?;
        Ok(())
    }

    /// Replace the data and/or stop handler. A packet already being
    /// delivered finishes on the old handler.
    pub fn update_settings(
        &self,
        on_data: Option<DataHandler>,
        on_stop: Option<StopHandler>,
    ) -> RelayResult<()> {
        let name = self.output.name();
        let callbacks = RelayCallbacks {
            on_data: on_data
                .map(|f| register_data(&self.host, name, f))
                .transpose()?,
            on_stop: on_stop
                .map(|f| register_stop(&self.host, name, f))
                .transpose()?,
            monitor: None,
        };

        debug!(
            output = %name,
            on_data = callbacks.on_data.is_some(),
            on_stop = callbacks.on_stop.is_some(),
            "Updating stream output callbacks"
        );
        self.output
            .update(&OutputSettings::new().with_extension(callbacks));
        Ok(())
    }

    /// Start relaying.
    #[instrument(name = "stream_output_start", skip(self), fields(output = %self.output.name()))]
    pub fn start(&self) -> RelayResult<()> {
        if self.output.start() {
            Ok(())
        } else {
            Err(RelayError::StartFailed)
        }
    }

    /// Ask the engine to stop. The stop handler runs once every packet
    /// already queued has been delivered.
    pub fn stop(&self) {
        self.output.stop();
    }

    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    pub fn stats(&self) -> RelayStats {
        self.monitor.snapshot()
    }

    /// The underlying engine output.
    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Tear down and wait for the capture thread.
    ///
    /// On the host thread the teardown is detached instead, since stopping
    /// an active output waits for the stop handler to run there.
    pub fn close(self) {
        if self.host.is_host_thread() {
            if self.output.is_active() {
                warn!(output = %self.output.name(), "Closing active output on the host thread; teardown detached");
            }
            drop(self);
            return;
        }
        self.output.close();
    }
}

fn register_data<F>(host: &HostHandle, name: &str, on_data: F) -> RelayResult<DataCallback>
where
    F: FnMut(HostPacket) + Send + 'static,
{
    Ok(host.register(format!("{name}:onData"), on_data)?)
}

fn register_stop<F>(host: &HostHandle, name: &str, mut on_stop: F) -> RelayResult<StopCallback>
where
    F: FnMut() + Send + 'static,
{
    Ok(host.register(format!("{name}:onStop"), move |()| on_stop())?)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use relay_engine::EngineConfig;
    use relay_host::{HostConfig, HostRuntime};

    use super::*;

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_empty_name_rejected() {
        let engine = Engine::new(EngineConfig::default());
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();

        let result = StreamOutput::new(&engine, runtime.handle(), "", |_| {}, || {});
        assert!(matches!(result, Err(RelayError::InvalidArgument(_))));
    }

    #[test]
    fn test_new_registers_output_type() {
        let engine = Engine::new(EngineConfig::default());
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();

        let a = StreamOutput::new(&engine, runtime.handle(), "a", |_| {}, || {}).unwrap();
        let b = StreamOutput::new(&engine, runtime.handle(), "b", |_| {}, || {}).unwrap();

        assert_eq!(engine.registry().ids(), vec![STREAM_OUTPUT_ID]);
        assert_eq!(a.name(), "a");
        assert_eq!(b.state(), SessionState::Created);
    }

    #[test]
    fn test_start_without_encoders_fails() {
        let engine = Engine::new(EngineConfig::default());
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let output = StreamOutput::new(&engine, runtime.handle(), "relay", |_| {}, || {}).unwrap();

        assert!(matches!(output.start(), Err(RelayError::StartFailed)));
        assert_eq!(output.state(), SessionState::Created);
    }

    #[test]
    fn test_close_on_host_thread_does_not_block() {
        let engine = Engine::new(EngineConfig::default());
        engine.reset_video(Default::default()).unwrap();
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let output = StreamOutput::new(&engine, runtime.handle(), "relay", |_| {}, move || {
            let _ = stop_tx.try_send(());
        })
        .unwrap();
        let video = engine
            .create_video_encoder("obs_x264", "video", Default::default())
            .unwrap();
        output.set_video_encoder(&video);
        output.start().unwrap();

        let (closed_tx, closed_rx) = crossbeam_channel::bounded::<()>(1);
        runtime
            .handle()
            .post(move || {
                output.close();
                let _ = closed_tx.send(());
            })
            .unwrap();

        let wait = Duration::from_secs(5);
        closed_rx.recv_timeout(wait).unwrap();
        stop_rx.recv_timeout(wait).unwrap();
        wait_until(|| engine.active_outputs() == 0);
    }

    #[test]
    fn test_track_index_checked() {
        let engine = Engine::new(EngineConfig::default());
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let output = StreamOutput::new(&engine, runtime.handle(), "relay", |_| {}, || {}).unwrap();
        let audio = engine
            .create_audio_encoder("ffmpeg_aac", "aac", 0, Default::default())
            .unwrap();

        assert!(matches!(
            output.set_audio_encoder(&audio, 6),
            Err(RelayError::Engine(_))
        ));
        output.set_audio_encoder(&audio, 5).unwrap();
        assert!(output.set_mixer(6).is_err());
        output.set_mixer(0).unwrap();
    }
}
