//! Encoded packet types.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Kind of encoder that produced a packet.
///
/// The discriminants are the integer tags handed to host callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum PacketType {
    /// Audio encoder output.
    Audio = 0,

    /// Video encoder output.
    Video = 1,
}

impl PacketType {
    /// Integer tag passed to host callbacks.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Parse an integer tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Audio),
            1 => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug)]
struct PacketInner {
    data: Bytes,
    packet_type: PacketType,
    pts: i64,
    dts: i64,
    keyframe: bool,
    track_idx: usize,
}

/// An immutable, reference-counted encoded packet.
///
/// Cloning takes a new reference; dropping a clone releases it. The
/// producer may reuse the payload once [`Packet::ref_count`] is back to one.
#[derive(Debug, Clone)]
pub struct Packet {
    inner: Arc<PacketInner>,
}

impl Packet {
    /// Create a packet owning `data`.
    pub fn new(packet_type: PacketType, data: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(PacketInner {
                data: data.into(),
                packet_type,
                pts: 0,
                dts: 0,
                keyframe: false,
                track_idx: 0,
            }),
        }
    }

    /// Create a packet with timing and track information.
    pub fn with_timing(
        packet_type: PacketType,
        data: impl Into<Bytes>,
        pts: i64,
        dts: i64,
        keyframe: bool,
        track_idx: usize,
    ) -> Self {
        Self {
            inner: Arc::new(PacketInner {
                data: data.into(),
                packet_type,
                pts,
                dts,
                keyframe,
                track_idx,
            }),
        }
    }

    /// Encoded payload.
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    pub fn packet_type(&self) -> PacketType {
        self.inner.packet_type
    }

    pub fn pts(&self) -> i64 {
        self.inner.pts
    }

    pub fn dts(&self) -> i64 {
        self.inner.dts
    }

    pub fn is_keyframe(&self) -> bool {
        self.inner.keyframe
    }

    /// Audio mix or video track the packet belongs to.
    pub fn track_idx(&self) -> usize {
        self.inner.track_idx
    }

    /// Number of live references to this packet.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/// The payload handed to a host data callback.
///
/// The buffer is a copy made on the host thread, so the host never
/// aliases memory owned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPacket {
    /// Copied packet payload.
    pub buffer: Bytes,

    /// Integer packet type tag.
    pub type_tag: u32,
}

impl HostPacket {
    /// Copy a packet into host memory.
    pub fn copy_from(packet: &Packet) -> Self {
        Self {
            buffer: Bytes::copy_from_slice(packet.data()),
            type_tag: packet.packet_type().tag(),
        }
    }

    /// Decoded packet type, if the tag is known.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_tag(self.type_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_count_tracks_clones() {
        let packet = Packet::new(PacketType::Video, vec![0u8, 0, 0, 1, 0x65]);
        assert_eq!(packet.ref_count(), 1);

        let reference = packet.clone();
        assert_eq!(packet.ref_count(), 2);

        drop(reference);
        assert_eq!(packet.ref_count(), 1);
    }

    #[test]
    fn test_host_packet_does_not_share_payload() {
        let packet = Packet::new(PacketType::Audio, vec![0xFFu8, 0xF1, 0x50]);
        let host = HostPacket::copy_from(&packet);

        assert_eq!(host.buffer.as_ref(), packet.data());
        assert_eq!(host.type_tag, 0);
        assert_eq!(host.packet_type(), Some(PacketType::Audio));
        assert_ne!(host.buffer.as_ptr(), packet.data().as_ptr());
        assert_eq!(packet.ref_count(), 1);
    }

    #[test]
    fn test_packet_type_tags() {
        assert_eq!(PacketType::Audio.tag(), 0);
        assert_eq!(PacketType::Video.tag(), 1);
        assert_eq!(PacketType::from_tag(1), Some(PacketType::Video));
        assert_eq!(PacketType::from_tag(7), None);
    }
}
