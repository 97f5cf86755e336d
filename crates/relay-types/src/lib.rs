//! Shared types for the packet relay.
//!
//! This crate defines the values that cross crate boundaries: encoded
//! packets, session lifecycle states, delivery statistics and the
//! serializable configuration.

mod config;
mod packet;
mod state;
mod stats;

pub use config::{AudioSettings, EncoderSettings, RelayConfig, SpeakerLayout, VideoSettings};
pub use packet::{HostPacket, Packet, PacketType};
pub use state::{SessionState, StopReason};
pub use stats::RelayStats;

/// Default wake-up interval of the host loop in milliseconds.
pub const HOST_TICK_MS: u64 = 100;

/// Default capacity of an output's capture channel.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 8;

/// Number of audio mixes an output can carry.
pub const MAX_AUDIO_MIXES: usize = 6;
