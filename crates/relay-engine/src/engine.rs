//! The loopback engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{info, instrument};

use relay_types::{AudioSettings, SpeakerLayout, VideoSettings, CAPTURE_CHANNEL_CAPACITY};

use crate::encoder::{AudioEncoder, AudioEncoderConfig, VideoEncoder, VideoEncoderConfig};
use crate::error::EngineError;
use crate::output::Output;
use crate::registry::OutputRegistry;
use crate::settings::OutputSettings;
use crate::EngineResult;

/// Engine startup configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Locale reported to plugins.
    pub locale: String,

    /// Capacity of each output's capture channel.
    pub capture_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            capture_channel_capacity: CAPTURE_CHANNEL_CAPACITY,
        }
    }
}

/// In-process media engine that owns outputs and encoders.
pub struct Engine {
    config: EngineConfig,
    registry: OutputRegistry,
    video: Arc<RwLock<Option<VideoSettings>>>,
    audio: RwLock<Option<AudioSettings>>,
    active_outputs: Arc<AtomicUsize>,
    epoch: Instant,
}

impl Engine {
    /// Start up an engine with no video or audio configured.
    pub fn new(config: EngineConfig) -> Self {
        info!(locale = %config.locale, "Engine starting");
        Self {
            config,
            registry: OutputRegistry::new(),
            video: Arc::new(RwLock::new(None)),
            audio: RwLock::new(None),
            active_outputs: Arc::new(AtomicUsize::new(0)),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Output types this engine can create.
    pub fn registry(&self) -> &OutputRegistry {
        &self.registry
    }

    /// Install a video pipeline.
    ///
    /// Fails while any output is capturing. Outputs cannot begin capture
    /// until the reset has finished.
    #[instrument(name = "reset_video", skip(self))]
    pub fn reset_video(&self, video: VideoSettings) -> EngineResult<()> {
        let mut current = self.video.write();
        let active = self.active_outputs();
        if active > 0 {
            return Err(EngineError::VideoActive(active));
        }

        validate_video(&video)?;
        info!(
            fps = video.fps,
            base = %format!("{}x{}", video.base_width, video.base_height),
            output = %format!("{}x{}", video.output_width, video.output_height),
            "Video reset"
        );
        *current = Some(video);
        Ok(())
    }

    /// Install an audio pipeline.
    #[instrument(name = "reset_audio", skip(self))]
    pub fn reset_audio(&self, audio: AudioSettings) -> EngineResult<()> {
        validate_audio(&audio)?;
        info!(
            sample_rate = audio.sample_rate,
            channels = audio.speakers.channels(),
            "Audio reset"
        );
        *self.audio.write() = Some(audio);
        Ok(())
    }

    pub fn video(&self) -> Option<VideoSettings> {
        self.video.read().clone()
    }

    pub fn audio(&self) -> Option<AudioSettings> {
        self.audio.read().clone()
    }

    /// Number of outputs currently capturing.
    pub fn active_outputs(&self) -> usize {
        self.active_outputs.load(Ordering::SeqCst)
    }

    /// Create an output of a registered type.
    pub fn create_output(
        &self,
        id: &str,
        name: &str,
        settings: OutputSettings,
    ) -> EngineResult<Output> {
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("output name must not be empty".into()));
        }

        let registration = self
            .registry
            .get(id)
            .ok_or_else(|| EngineError::UnknownOutput(id.to_string()))?;

        Output::create(
            &registration,
            name,
            settings,
            self.config.capture_channel_capacity,
            Arc::clone(&self.active_outputs),
            Arc::clone(&self.video),
            self.epoch,
        )
    }

    /// Create a video encoder bound to the current video pipeline, if any.
    pub fn create_video_encoder(
        &self,
        id: &str,
        name: &str,
        config: VideoEncoderConfig,
    ) -> EngineResult<VideoEncoder> {
        check_encoder_ids(id, name)?;
        Ok(VideoEncoder::new(id, name, config, self.video()))
    }

    /// Create an audio encoder for `mix_idx`, bound to the current audio
    /// pipeline, if any.
    pub fn create_audio_encoder(
        &self,
        id: &str,
        name: &str,
        mix_idx: usize,
        config: AudioEncoderConfig,
    ) -> EngineResult<AudioEncoder> {
        check_encoder_ids(id, name)?;
        AudioEncoder::new(id, name, mix_idx, config, self.audio())
    }

    /// Bind a video encoder to the engine's current video pipeline.
    pub fn use_video(&self, encoder: &VideoEncoder) -> EngineResult<()> {
        let video = self.video().ok_or(EngineError::NoVideo)?;
        encoder.set_video(video);
        Ok(())
    }
}

fn check_encoder_ids(id: &str, name: &str) -> EngineResult<()> {
    if id.is_empty() || name.is_empty() {
        return Err(EngineError::InvalidArgument(
            "encoder id and name must not be empty".into(),
        ));
    }
    Ok(())
}

fn validate_video(video: &VideoSettings) -> EngineResult<()> {
    if video.fps == 0 {
        return Err(EngineError::InvalidVideo("fps must be non-zero".into()));
    }
    if video.base_width == 0 || video.base_height == 0 {
        return Err(EngineError::InvalidVideo("base size must be non-zero".into()));
    }
    if video.output_width == 0 || video.output_height == 0 {
        return Err(EngineError::InvalidVideo("output size must be non-zero".into()));
    }
    if video.output_width % 2 != 0 || video.output_height % 2 != 0 {
        return Err(EngineError::InvalidVideo("output size must be even".into()));
    }
    Ok(())
}

fn validate_audio(audio: &AudioSettings) -> EngineResult<()> {
    if !matches!(audio.sample_rate, 44100 | 48000) {
        return Err(EngineError::InvalidAudio(format!(
            "unsupported sample rate {}",
            audio.sample_rate
        )));
    }
    if audio.speakers == SpeakerLayout::Unknown {
        return Err(EngineError::InvalidAudio("unknown speaker layout".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_video_validates() {
        let engine = Engine::new(EngineConfig::default());

        let bad = VideoSettings {
            fps: 0,
            ..Default::default()
        };
        assert!(matches!(engine.reset_video(bad), Err(EngineError::InvalidVideo(_))));
        assert!(engine.video().is_none());

        engine.reset_video(VideoSettings::default()).unwrap();
        assert_eq!(engine.video(), Some(VideoSettings::default()));
    }

    #[test]
    fn test_reset_audio_validates() {
        let engine = Engine::new(EngineConfig::default());

        let bad = AudioSettings {
            sample_rate: 22050,
            ..Default::default()
        };
        assert!(matches!(engine.reset_audio(bad), Err(EngineError::InvalidAudio(_))));

        engine.reset_audio(AudioSettings::default()).unwrap();
        assert!(engine.audio().is_some());
    }

    #[test]
    fn test_encoders_bind_to_current_pipelines() {
        let engine = Engine::new(EngineConfig::default());

        let early = engine
            .create_video_encoder("obs_x264", "early", VideoEncoderConfig::default())
            .unwrap();
        assert!(early.initialize().is_err());
        assert!(matches!(engine.use_video(&early), Err(EngineError::NoVideo)));

        engine.reset_video(VideoSettings::default()).unwrap();
        engine.use_video(&early).unwrap();
        early.initialize().unwrap();

        let late = engine
            .create_video_encoder("obs_x264", "late", VideoEncoderConfig::default())
            .unwrap();
        late.initialize().unwrap();
    }

    #[test]
    fn test_unknown_output_type() {
        let engine = Engine::new(EngineConfig::default());
        assert!(matches!(
            engine.create_output("rtmp_output", "main", OutputSettings::new()),
            Err(EngineError::UnknownOutput(id)) if id == "rtmp_output"
        ));
        assert!(matches!(
            engine.create_output("rtmp_output", "", OutputSettings::new()),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
