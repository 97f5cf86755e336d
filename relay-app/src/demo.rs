//! Synthetic relay session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use relay_engine::{AudioEncoderConfig, CaptureStats, Engine, EngineConfig, VideoEncoderConfig};
use relay_host::{HostConfig, HostRuntime};
use relay_output::StreamOutput;
use relay_types::{HostPacket, PacketType, RelayConfig, RelayStats};

const OUTPUT_NAME: &str = "demo";
const AAC_FRAME_SAMPLES: u64 = 1024;
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// What the host callbacks saw.
#[derive(Debug, Default)]
struct HostTally {
    video_packets: AtomicU64,
    audio_packets: AtomicU64,
    bytes: AtomicU64,
}

impl HostTally {
    fn record(&self, packet: &HostPacket) {
        match packet.packet_type() {
            Some(PacketType::Video) => self.video_packets.fetch_add(1, Ordering::Relaxed),
            Some(PacketType::Audio) => self.audio_packets.fetch_add(1, Ordering::Relaxed),
            None => 0,
        };
        self.bytes.fetch_add(packet.buffer.len() as u64, Ordering::Relaxed);
    }
}

/// Host-side totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostTotals {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub bytes: u64,
}

/// Result of a demo run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoReport {
    pub elapsed_ms: u64,
    pub relay: RelayStats,
    pub capture: CaptureStats,
    pub host: HostTotals,
}

/// Relay `config.demo_packet_count` video frames, with audio frames
/// interleaved at the audio rate, and wait for the stop notification.
pub fn run(config: &RelayConfig) -> Result<DemoReport> {
    let runtime = HostRuntime::spawn(HostConfig {
        tick: Duration::from_millis(config.host_tick_ms.max(1)),
        ..Default::default()
    })
    .context("Failed to start host loop")?;

    let engine = Engine::new(EngineConfig {
        capture_channel_capacity: config.capture_channel_capacity,
        ..Default::default()
    });
    engine
        .reset_video(config.video.clone())
        .context("Failed to reset video")?;
    engine
        .reset_audio(config.audio.clone())
        .context("Failed to reset audio")?;

    let video = engine.create_video_encoder(
        &config.encoders.video_encoder_id,
        "demo_video",
        VideoEncoderConfig {
            bitrate_kbps: config.encoders.video_bitrate_kbps,
            keyframe_interval_secs: config.encoders.keyframe_interval_secs,
            ..Default::default()
        },
    )?;
    let audio = engine.create_audio_encoder(
        &config.encoders.audio_encoder_id,
        "demo_audio",
        0,
        AudioEncoderConfig {
            bitrate_kbps: config.encoders.audio_bitrate_kbps,
        },
    )?;

    let tally = Arc::new(HostTally::default());
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let sink = Arc::clone(&tally);
    let output = StreamOutput::new(
        &engine,
        runtime.handle(),
        OUTPUT_NAME,
        move |packet: HostPacket| sink.record(&packet),
        move || {
            let _ = stop_tx.try_send(());
        },
    )?;

    output.set_video_encoder(&video);
    output.set_audio_encoder(&audio, 0)?;
    output.set_mixer(0)?;

    let started = Instant::now();
    output.start().context("Relay output refused to start")?;

    let fps = u64::from(config.video.fps.max(1));
    let frame_duration_ns = 1_000_000_000 / fps;
    let keyframe_every = fps * u64::from(config.encoders.keyframe_interval_secs.max(1));
    let video_frame_bytes = frame_bytes(config.encoders.video_bitrate_kbps, fps);
    let audio_frames_per_sec = u64::from(config.audio.sample_rate) / AAC_FRAME_SAMPLES;
    let audio_frame_bytes = frame_bytes(config.encoders.audio_bitrate_kbps, audio_frames_per_sec.max(1));
    let audio_frame_ns = AAC_FRAME_SAMPLES * 1_000_000_000 / u64::from(config.audio.sample_rate.max(1));
    let interval = Duration::from_millis(config.demo_packet_interval_ms);

    let mut audio_pts: u64 = 0;
    for frame in 0..config.demo_packet_count {
        let pts = frame * frame_duration_ns;
        let keyframe = frame % keyframe_every == 0;
        output
            .output()
            .deliver(video.packet(vec![frame as u8; video_frame_bytes], pts as i64, keyframe))?;

        while audio_pts <= pts {
            output
                .output()
                .deliver(audio.packet(vec![0xFF; audio_frame_bytes], audio_pts as i64))?;
            audio_pts += audio_frame_ns.max(1);
        }

        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    debug!(frames = config.demo_packet_count, "All frames queued");

    output.stop();
    if stop_rx.recv_timeout(STOP_TIMEOUT).is_err() {
        bail!("Timed out waiting for the stop notification");
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let relay = output.stats();
    let capture = output.output().stats();
    output.close();
    runtime.shutdown();

    if relay.delivery_failures > 0 {
        warn!(failures = relay.delivery_failures, "Some packets were not delivered");
    }
    info!(
        delivered = relay.packets_delivered,
        dropped = relay.packets_dropped,
        avg_wait_us = relay.average_wait_micros(),
        "Relay finished"
    );

    Ok(DemoReport {
        elapsed_ms,
        relay,
        capture,
        host: HostTotals {
            video_packets: tally.video_packets.load(Ordering::Relaxed),
            audio_packets: tally.audio_packets.load(Ordering::Relaxed),
            bytes: tally.bytes.load(Ordering::Relaxed),
        },
    })
}

/// Payload size of one frame at `bitrate_kbps` and `per_sec` frames per second.
fn frame_bytes(bitrate_kbps: u32, per_sec: u64) -> usize {
    ((u64::from(bitrate_kbps) * 1000 / 8) / per_sec.max(1)).max(1) as usize
}
