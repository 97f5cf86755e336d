//! Encoder handles.
//!
//! The loopback engine does not encode anything itself. An encoder here
//! carries configuration, is bound to the engine's video or audio
//! pipeline, and must initialize successfully before an output using it
//! can begin capture. It also stamps the packets produced on its behalf.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use relay_types::{AudioSettings, Packet, PacketType, VideoSettings, MAX_AUDIO_MIXES};

use crate::error::EngineError;
use crate::EngineResult;

/// Video encoding configuration.
#[derive(Debug, Clone)]
pub struct VideoEncoderConfig {
    /// Width in pixels (0 = engine output width).
    pub width: u32,

    /// Height in pixels (0 = engine output height).
    pub height: u32,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: u32,

    /// H.264 profile.
    pub profile: H264Profile,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            bitrate_kbps: 2500,
            keyframe_interval_secs: 2,
            profile: H264Profile::High,
        }
    }
}

/// H.264 profile levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

/// Audio encoding configuration.
#[derive(Debug, Clone)]
pub struct AudioEncoderConfig {
    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self { bitrate_kbps: 160 }
    }
}

struct VideoEncoderInner {
    id: String,
    name: String,
    config: RwLock<VideoEncoderConfig>,
    video: RwLock<Option<VideoSettings>>,
    initialized: AtomicBool,
}

/// Handle to a video encoder. Clones refer to the same encoder.
#[derive(Clone)]
pub struct VideoEncoder {
    inner: Arc<VideoEncoderInner>,
}

impl VideoEncoder {
    pub(crate) fn new(
        id: &str,
        name: &str,
        config: VideoEncoderConfig,
        video: Option<VideoSettings>,
    ) -> Self {
        Self {
            inner: Arc::new(VideoEncoderInner {
                id: id.to_string(),
                name: name.to_string(),
                config: RwLock::new(config),
                video: RwLock::new(video),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bind the encoder to a video pipeline.
    pub fn set_video(&self, video: VideoSettings) {
        *self.inner.video.write() = Some(video);
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    /// Replace the configuration. Takes effect at the next initialization.
    pub fn update(&self, config: VideoEncoderConfig) {
        *self.inner.config.write() = config;
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    pub fn config(&self) -> VideoEncoderConfig {
        self.inner.config.read().clone()
    }

    /// Effective frame size and rate.
    pub fn dimensions(&self) -> Option<(u32, u32, u32)> {
        let video = self.inner.video.read().clone()?;
        let config = self.inner.config.read();
        let width = if config.width == 0 { video.output_width } else { config.width };
        let height = if config.height == 0 { video.output_height } else { config.height };
        Some((width, height, video.fps))
    }

    /// Initialize the encoder if it is not already.
    pub fn initialize(&self) -> EngineResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let (width, height, fps) = self
            .dimensions()
            .ok_or_else(|| EngineError::encoder_init(self.name(), "no video pipeline bound"))?;
        let config = self.config();

        if width == 0 || height == 0 {
            return Err(EngineError::encoder_init(self.name(), "frame size must be non-zero"));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(EngineError::encoder_init(self.name(), "frame size must be even"));
        }
        if fps == 0 {
            return Err(EngineError::encoder_init(self.name(), "fps must be non-zero"));
        }
        if config.bitrate_kbps == 0 {
            return Err(EngineError::encoder_init(self.name(), "bitrate must be non-zero"));
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        info!(
            name = %self.name(),
            id = %self.id(),
            width,
            height,
            fps,
            bitrate_kbps = config.bitrate_kbps,
            profile = ?config.profile,
            "Video encoder initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Wrap an encoded video payload as a packet from this encoder.
    pub fn packet(&self, data: impl Into<Bytes>, pts: i64, keyframe: bool) -> Packet {
        Packet::with_timing(PacketType::Video, data, pts, pts, keyframe, 0)
    }

    pub(crate) fn same_encoder(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct AudioEncoderInner {
    id: String,
    name: String,
    mix_idx: usize,
    config: RwLock<AudioEncoderConfig>,
    audio: RwLock<Option<AudioSettings>>,
    initialized: AtomicBool,
}

/// Handle to an audio encoder. Clones refer to the same encoder.
#[derive(Clone)]
pub struct AudioEncoder {
    inner: Arc<AudioEncoderInner>,
}

impl AudioEncoder {
    pub(crate) fn new(
        id: &str,
        name: &str,
        mix_idx: usize,
        config: AudioEncoderConfig,
        audio: Option<AudioSettings>,
    ) -> EngineResult<Self> {
        if mix_idx >= MAX_AUDIO_MIXES {
            return Err(EngineError::InvalidArgument(format!(
                "audio mix index {} out of range (max {})",
                mix_idx,
                MAX_AUDIO_MIXES - 1
            )));
        }

        Ok(Self {
            inner: Arc::new(AudioEncoderInner {
                id: id.to_string(),
                name: name.to_string(),
                mix_idx,
                config: RwLock::new(config),
                audio: RwLock::new(audio),
                initialized: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Audio mix this encoder reads from.
    pub fn mix_idx(&self) -> usize {
        self.inner.mix_idx
    }

    /// Bind the encoder to an audio pipeline.
    pub fn set_audio(&self, audio: AudioSettings) {
        *self.inner.audio.write() = Some(audio);
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    pub fn update(&self, config: AudioEncoderConfig) {
        *self.inner.config.write() = config;
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    pub fn config(&self) -> AudioEncoderConfig {
        self.inner.config.read().clone()
    }

    /// Initialize the encoder if it is not already.
    pub fn initialize(&self) -> EngineResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let audio = self
            .inner
            .audio
            .read()
            .clone()
            .ok_or_else(|| EngineError::encoder_init(self.name(), "no audio pipeline bound"))?;
        let config = self.config();

        if audio.speakers.channels() == 0 {
            return Err(EngineError::encoder_init(self.name(), "unknown speaker layout"));
        }
        if config.bitrate_kbps == 0 {
            return Err(EngineError::encoder_init(self.name(), "bitrate must be non-zero"));
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        info!(
            name = %self.name(),
            id = %self.id(),
            mix = self.mix_idx(),
            sample_rate = audio.sample_rate,
            channels = audio.speakers.channels(),
            bitrate_kbps = config.bitrate_kbps,
            "Audio encoder initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Wrap an encoded audio payload as a packet from this encoder.
    pub fn packet(&self, data: impl Into<Bytes>, pts: i64) -> Packet {
        Packet::with_timing(PacketType::Audio, data, pts, pts, true, self.mix_idx())
    }

    pub(crate) fn same_encoder(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Initialize a set of encoders, logging the first failure.
pub(crate) fn initialize_all(
    video: Option<&VideoEncoder>,
    audio: &[AudioEncoder],
) -> bool {
    if video.is_none() && audio.is_empty() {
        warn!("No encoders assigned");
        return false;
    }

    if let Some(encoder) = video {
        if let Err(e) = encoder.initialize() {
            warn!("{}", e);
            return false;
        }
    }

    for encoder in audio {
        if let Err(e) = encoder.initialize() {
            warn!("{}", e);
            return false;
        }
    }

    debug!(audio = audio.len(), video = video.is_some(), "Encoders initialized");
    true
}
