//! Serializable relay configuration.

use serde::{Deserialize, Serialize};

use crate::{CAPTURE_CHANNEL_CAPACITY, HOST_TICK_MS};

/// Video canvas configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoSettings {
    /// Frames per second (numerator, denominator is always 1).
    pub fps: u32,

    /// Canvas width in pixels.
    pub base_width: u32,

    /// Canvas height in pixels.
    pub base_height: u32,

    /// Scaled output width in pixels.
    pub output_width: u32,

    /// Scaled output height in pixels.
    pub output_height: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            base_width: 1920,
            base_height: 1080,
            output_width: 1280,
            output_height: 720,
        }
    }
}

/// Speaker layouts, numbered as the engine numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerLayout {
    Unknown,
    Mono,
    Stereo,
    TwoPointOne,
    FourPointZero,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
}

impl SpeakerLayout {
    /// Number of audio channels for this layout.
    pub fn channels(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::TwoPointOne => 3,
            Self::FourPointZero => 4,
            Self::FourPointOne => 5,
            Self::FivePointOne => 6,
            Self::SevenPointOne => 8,
        }
    }

    /// Parse the engine's integer layout code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            3 => Some(Self::TwoPointOne),
            4 => Some(Self::FourPointZero),
            5 => Some(Self::FourPointOne),
            6 => Some(Self::FivePointOne),
            8 => Some(Self::SevenPointOne),
            _ => None,
        }
    }
}

/// Audio pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioSettings {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Speaker layout.
    pub speakers: SpeakerLayout,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            speakers: SpeakerLayout::Stereo,
        }
    }
}

/// Encoder parameters used when the relay creates its own encoders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncoderSettings {
    /// Video encoder id registered with the engine.
    pub video_encoder_id: String,

    /// Audio encoder id registered with the engine.
    pub audio_encoder_id: String,

    /// Video bitrate in kbps.
    pub video_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            video_encoder_id: "obs_x264".to_string(),
            audio_encoder_id: "ffmpeg_aac".to_string(),
            video_bitrate_kbps: 2500,
            audio_bitrate_kbps: 160,
            keyframe_interval_secs: 2,
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    /// Host loop wake-up interval in milliseconds.
    pub host_tick_ms: u64,

    /// Capacity of each output's capture channel.
    pub capture_channel_capacity: usize,

    /// Video canvas.
    pub video: VideoSettings,

    /// Audio pipeline.
    pub audio: AudioSettings,

    /// Encoders attached to relay outputs.
    pub encoders: EncoderSettings,

    /// Synthetic packets the demo relays.
    pub demo_packet_count: u64,

    /// Delay between synthetic packets in milliseconds.
    pub demo_packet_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host_tick_ms: HOST_TICK_MS,
            capture_channel_capacity: CAPTURE_CHANNEL_CAPACITY,
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            encoders: EncoderSettings::default(),
            demo_packet_count: 90,
            demo_packet_interval_ms: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RelayConfig =
            serde_json::from_str(r#"{ "hostTickMs": 20, "audio": { "sampleRate": 44100, "speakers": "mono" } }"#)
                .unwrap();

        assert_eq!(config.host_tick_ms, 20);
        assert_eq!(config.capture_channel_capacity, CAPTURE_CHANNEL_CAPACITY);
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.speakers.channels(), 1);
        assert_eq!(config.video, VideoSettings::default());
    }

    #[test]
    fn test_partial_nested_settings() {
        let config: RelayConfig =
            serde_json::from_str(r#"{ "video": { "fps": 60 }, "encoders": { "videoBitrateKbps": 6000 } }"#)
                .unwrap();

        assert_eq!(config.video.fps, 60);
        assert_eq!(config.video.output_width, 1280);
        assert_eq!(config.encoders.video_bitrate_kbps, 6000);
        assert_eq!(config.encoders.audio_encoder_id, "ffmpeg_aac");
    }

    #[test]
    fn test_speaker_codes() {
        assert_eq!(SpeakerLayout::from_code(2), Some(SpeakerLayout::Stereo));
        assert_eq!(SpeakerLayout::from_code(8), Some(SpeakerLayout::SevenPointOne));
        assert_eq!(SpeakerLayout::from_code(7), None);
    }
}
