//! Engine outputs and their capture threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use relay_types::{Packet, PacketType, VideoSettings, MAX_AUDIO_MIXES};

use crate::encoder::{initialize_all, AudioEncoder, VideoEncoder};
use crate::error::EngineError;
use crate::metrics::{CaptureMetrics, CaptureStats};
use crate::plugin::{OutputHandle, OutputInstance, OutputRef};
use crate::registry::Registration;
use crate::settings::OutputSettings;
use crate::EngineResult;

/// Work for an output's capture thread.
enum CaptureEvent {
    Packet(Packet),
    Stop(u64),
    Shutdown,
}

/// State shared between an [`Output`], its capture thread and its
/// instance.
struct OutputCore {
    id: &'static str,
    name: String,
    settings: RwLock<OutputSettings>,
    instance: RwLock<Option<Box<dyn OutputInstance>>>,
    video_encoder: RwLock<Option<VideoEncoder>>,
    audio_encoders: RwLock<Vec<Option<AudioEncoder>>>,
    mixers: AtomicUsize,
    capturing: AtomicBool,
    active: AtomicBool,
    active_outputs: Arc<AtomicUsize>,
    /// The engine's video pipeline; held shared while capture begins so a
    /// reset cannot slip in between its check and its install.
    video: Arc<RwLock<Option<VideoSettings>>>,
    metrics: CaptureMetrics,
}

impl OutputCore {
    fn mix_selected(&self, idx: usize) -> bool {
        self.mixers.load(Ordering::SeqCst) & (1 << idx) != 0
    }

    /// Audio encoders on selected tracks.
    fn assigned_audio(&self) -> Vec<AudioEncoder> {
        self.audio_encoders
            .read()
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.mix_selected(*idx))
            .filter_map(|(_, encoder)| encoder.clone())
            .collect()
    }

    fn encoders_ready(&self) -> bool {
        let video_ready = self
            .video_encoder
            .read()
            .as_ref()
            .map_or(true, VideoEncoder::is_initialized);
        video_ready && self.assigned_audio().iter().all(AudioEncoder::is_initialized)
    }

    fn forward(&self, packet: Packet) {
        self.metrics.record_received();

        if !self.capturing.load(Ordering::SeqCst) {
            self.metrics.record_discarded();
            trace!(output = %self.name, "Discarding packet: not capturing");
            return;
        }

        if packet.packet_type() == PacketType::Audio && !self.mix_selected(packet.track_idx()) {
            self.metrics.record_discarded();
            trace!(output = %self.name, track = packet.track_idx(), "Discarding packet: mix not selected");
            return;
        }

        let instance = self.instance.read();
        let Some(instance) = instance.as_ref() else {
            self.metrics.record_discarded();
            return;
        };

        instance.encoded_packet(&packet);
        self.metrics.record_forwarded(packet.len() as u64);

        if packet.ref_count() > 1 {
            self.metrics.record_retained();
            warn!(
                output = %self.name,
                refs = packet.ref_count(),
                "Packet still referenced after encoded_packet returned"
            );
        }
    }

    fn stop_instance(&self, ts: u64) {
        if !self.active.swap(false, Ordering::SeqCst) {
            debug!(output = %self.name, "Stop ignored: output not active");
            return;
        }

        if let Some(instance) = self.instance.read().as_ref() {
            instance.stop(ts);
        }

        self.end_data_capture();
        self.metrics.record_stop();
        info!(output = %self.name, ts, "Output stopped");
    }

    fn destroy_instance(&self) {
        let instance = self.instance.write().take();
        if instance.is_some() {
            drop(instance);
            debug!(output = %self.name, "Output instance destroyed");
        }
    }
}

impl OutputHandle for OutputCore {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_begin_data_capture(&self) -> bool {
        if self.capturing.load(Ordering::SeqCst) {
            return false;
        }
        self.video_encoder.read().is_some() || !self.assigned_audio().is_empty()
    }

    fn initialize_encoders(&self) -> bool {
        let video = self.video_encoder.read().clone();
        initialize_all(video.as_ref(), &self.assigned_audio())
    }

    fn begin_data_capture(&self) -> bool {
        let _video = self.video.read();
        if !self.encoders_ready() {
            warn!(output = %self.name, "Cannot begin capture: encoders not initialized");
            return false;
        }
        if self.capturing.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.active_outputs.fetch_add(1, Ordering::SeqCst);
        info!(output = %self.name, "Data capture started");
        true
    }

    fn end_data_capture(&self) {
        if self.capturing.swap(false, Ordering::SeqCst) {
            self.active_outputs.fetch_sub(1, Ordering::SeqCst);
            info!(output = %self.name, "Data capture ended");
        }
    }
}

/// An output created by the engine.
///
/// Packets given to [`Output::deliver`] and stop requests are processed in
/// order on the output's capture thread. Dropping the output tears it down
/// on that thread as well, so dropping never waits on the instance.
pub struct Output {
    core: Arc<OutputCore>,
    tx: Sender<CaptureEvent>,
    thread: Option<JoinHandle<()>>,
    epoch: Instant,
}

impl Output {
    pub(crate) fn create(
        registration: &Registration,
        name: &str,
        settings: OutputSettings,
        capacity: usize,
        active_outputs: Arc<AtomicUsize>,
        video: Arc<RwLock<Option<VideoSettings>>>,
        epoch: Instant,
    ) -> EngineResult<Self> {
        let definition = registration.definition();
        let mut merged = definition.defaults();
        merged.merge(&settings);

        let core = Arc::new(OutputCore {
            id: registration.id(),
            name: name.to_string(),
            settings: RwLock::new(merged.clone()),
            instance: RwLock::new(None),
            video_encoder: RwLock::new(None),
            audio_encoders: RwLock::new(vec![None; MAX_AUDIO_MIXES]),
            mixers: AtomicUsize::new(1),
            capturing: AtomicBool::new(false),
            active: AtomicBool::new(false),
            active_outputs,
            video,
            metrics: CaptureMetrics::default(),
        });

        let handle: OutputRef = core.clone();
        let instance = definition.create(&merged, handle)?;
        *core.instance.write() = Some(instance);

        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let thread_core = Arc::clone(&core);
        let thread = thread::Builder::new()
            .name(format!("output-{}", name))
            .spawn(move || capture_loop(thread_core, rx))?;

        info!(id = registration.id(), %name, "Output created");

        Ok(Self {
            core,
            tx,
            thread: Some(thread),
            epoch,
        })
    }

    /// Output type id.
    pub fn id(&self) -> &'static str {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn set_video_encoder(&self, encoder: &VideoEncoder) {
        *self.core.video_encoder.write() = Some(encoder.clone());
        debug!(output = %self.core.name, encoder = %encoder.name(), "Video encoder set");
    }

    pub fn video_encoder(&self) -> Option<VideoEncoder> {
        self.core.video_encoder.read().clone()
    }

    /// Assign an audio encoder to track `idx`.
    pub fn set_audio_encoder(&self, encoder: &AudioEncoder, idx: usize) -> EngineResult<()> {
        if idx >= MAX_AUDIO_MIXES {
            return Err(EngineError::InvalidArgument(format!(
                "audio track {} out of range (max {})",
                idx,
                MAX_AUDIO_MIXES - 1
            )));
        }

        let mut encoders = self.core.audio_encoders.write();
        if let Some(existing) = encoders[idx].as_ref() {
            if existing.same_encoder(encoder) {
                return Ok(());
            }
        }
        encoders[idx] = Some(encoder.clone());
        debug!(output = %self.core.name, encoder = %encoder.name(), idx, "Audio encoder set");
        Ok(())
    }

    pub fn audio_encoder(&self, idx: usize) -> Option<AudioEncoder> {
        self.core.audio_encoders.read().get(idx).cloned().flatten()
    }

    /// Select a single audio track. Audio encoders on other tracks neither
    /// gate start nor have their packets forwarded.
    pub fn set_mixer(&self, idx: usize) -> EngineResult<()> {
        if idx >= MAX_AUDIO_MIXES {
            return Err(EngineError::InvalidArgument(format!(
                "audio mix {} out of range (max {})",
                idx,
                MAX_AUDIO_MIXES - 1
            )));
        }
        self.set_mixers(1 << idx);
        Ok(())
    }

    /// Select audio tracks by bit mask; bit `n` selects track `n`.
    pub fn set_mixers(&self, mask: usize) {
        let mask = mask & ((1 << MAX_AUDIO_MIXES) - 1);
        self.core.mixers.store(mask, Ordering::SeqCst);
        debug!(output = %self.core.name, mask, "Audio mixers set");
    }

    pub fn mixers(&self) -> usize {
        self.core.mixers.load(Ordering::SeqCst)
    }

    /// Merge `settings` into the output's settings and pass the result to
    /// the instance's update hook.
    pub fn update(&self, settings: &OutputSettings) {
        let merged = {
            let mut current = self.core.settings.write();
            current.merge(settings);
            current.clone()
        };

        if let Some(instance) = self.core.instance.read().as_ref() {
            instance.update(&merged);
        }
    }

    pub fn settings(&self) -> OutputSettings {
        self.core.settings.read().clone()
    }

    /// Current settings values as JSON.
    pub fn settings_json(&self) -> String {
        self.core.settings.read().to_json()
    }

    /// Start the output. Runs the instance's start hook on this thread.
    #[instrument(name = "output_start", skip(self), fields(output = %self.core.name))]
    pub fn start(&self) -> bool {
        if self.core.active.load(Ordering::SeqCst) {
            warn!("Output already active");
            return false;
        }

        let started = match self.core.instance.read().as_ref() {
            Some(instance) => instance.start(),
            None => false,
        };

        if started {
            self.core.active.store(true, Ordering::SeqCst);
            info!("Output started");
        } else {
            warn!("Output failed to start");
        }
        started
    }

    /// Request a stop. The stop hook runs on the capture thread after
    /// every packet already queued. Never blocks the caller.
    #[instrument(name = "output_stop", skip(self), fields(output = %self.core.name))]
    pub fn stop(&self) {
        if !self.core.active.load(Ordering::SeqCst) {
            debug!("Stop ignored: output not active");
            return;
        }

        let ts = self.timestamp();
        self.send_control(CaptureEvent::Stop(ts));
    }

    /// Queue an encoded packet for the capture thread.
    ///
    /// Blocks while the capture channel is full. The engine hands over the
    /// last reference, so the instance must not keep the packet.
    pub fn deliver(&self, packet: Packet) -> EngineResult<()> {
        self.tx
            .send(CaptureEvent::Packet(packet))
            .map_err(|_| EngineError::OutputClosed)
    }

    pub fn is_active(&self) -> bool {
        self.core.active.load(Ordering::SeqCst)
    }

    pub fn is_capturing(&self) -> bool {
        self.core.capturing.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        self.core.metrics.snapshot()
    }

    /// Tear the output down and wait for its capture thread.
    ///
    /// Must not be called from a thread the instance's stop hook waits on.
    pub fn close(mut self) {
        let _ = self.tx.send(CaptureEvent::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(output = %self.core.name, "Capture thread panicked");
            }
        }
    }

    fn timestamp(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Queue a control event behind any pending packets.
    ///
    /// The capture thread may itself be blocked on the caller (a host
    /// callback stopping its own output), so a full channel hands the send
    /// to a short-lived thread instead of waiting.
    fn send_control(&self, event: CaptureEvent) {
        let event = match self.tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Disconnected(_)) => {
                warn!(output = %self.core.name, "Capture thread gone; control event not delivered");
                return;
            }
            Err(TrySendError::Full(event)) => event,
        };

        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("output-{}-control", self.core.name))
            .spawn(move || {
                let _ = tx.send(event);
            });
        if let Err(e) = spawned {
            warn!(output = %self.core.name, error = %e, "Failed to queue control event");
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.send_control(CaptureEvent::Shutdown);
        }
    }
}

/// Capture thread body.
fn capture_loop(core: Arc<OutputCore>, rx: Receiver<CaptureEvent>) {
    debug!(output = %core.name, "Capture loop starting");

    loop {
        match rx.recv() {
            Ok(CaptureEvent::Packet(packet)) => core.forward(packet),
            Ok(CaptureEvent::Stop(ts)) => core.stop_instance(ts),
            Ok(CaptureEvent::Shutdown) | Err(_) => break,
        }
    }

    if core.active.load(Ordering::SeqCst) {
        core.stop_instance(0);
    }
    core.destroy_instance();

    let stats = core.metrics.snapshot();
    info!(
        output = %core.name,
        received = stats.packets_received,
        forwarded = stats.packets_forwarded,
        discarded = stats.packets_discarded,
        "Capture loop stopped"
    );
}
