//! The relay session: one per relay output instance.
//!
//! The engine calls [`RelaySession::start`] on the thread that started the
//! output and everything else on the output's capture thread. Host
//! callbacks only ever run on the host thread; every call into them waits
//! for the callback to return.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use relay_engine::OutputRef;
use relay_host::ThreadSafeCallback;
use relay_types::{HostPacket, Packet, RelayStats, SessionState, StopReason};

use crate::error::RelayError;
use crate::RelayResult;

/// Host endpoint receiving packet copies.
pub type DataCallback = ThreadSafeCallback<HostPacket>;

/// Host endpoint told once capture has ended.
pub type StopCallback = ThreadSafeCallback<()>;

#[derive(Default)]
struct MonitorInner {
    state: AtomicU8,
    packets_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    packets_dropped: AtomicU64,
    delivery_failures: AtomicU64,
    host_wait_micros: AtomicU64,
    callback_swaps: AtomicU64,
}

/// Shared view of a session's state and delivery counters.
///
/// Clones observe the same session. The host side keeps one so it can
/// read statistics while the session itself is owned by the engine.
#[derive(Clone, Default)]
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn record_delivered(&self, bytes: usize, waited: Duration) {
        self.inner.packets_delivered.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
        self.record_wait(waited);
    }

    fn record_failure(&self, waited: Duration) {
        self.inner.delivery_failures.fetch_add(1, Ordering::Relaxed);
        self.record_wait(waited);
    }

    fn record_wait(&self, waited: Duration) {
        self.inner
            .host_wait_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.inner.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_swaps(&self, swaps: u64) {
        self.inner.callback_swaps.fetch_add(swaps, Ordering::Relaxed);
    }

    /// Get current counters.
    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            state: self.state(),
            packets_delivered: self.inner.packets_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.inner.bytes_delivered.load(Ordering::Relaxed),
            packets_dropped: self.inner.packets_dropped.load(Ordering::Relaxed),
            delivery_failures: self.inner.delivery_failures.load(Ordering::Relaxed),
            host_wait_micros: self.inner.host_wait_micros.load(Ordering::Relaxed),
            callback_swaps: self.inner.callback_swaps.load(Ordering::Relaxed),
        }
    }
}

/// Everything a session needs at creation.
#[derive(Default)]
pub struct SessionConfig {
    /// Engine output the session was created for.
    pub output: Option<OutputRef>,

    /// Data endpoint. Required.
    pub on_data: Option<DataCallback>,

    /// Stop endpoint. Required.
    pub on_stop: Option<StopCallback>,

    /// Monitor to report through. A fresh one is used if absent.
    pub monitor: Option<SessionMonitor>,
}

/// Replacement endpoints. Absent fields keep their current endpoint.
#[derive(Default)]
pub struct CallbackUpdate {
    pub on_data: Option<DataCallback>,
    pub on_stop: Option<StopCallback>,
}

struct Endpoints {
    on_data: DataCallback,
    on_stop: StopCallback,
}

/// Relays one engine output's packets to the host.
pub struct RelaySession {
    output: OutputRef,
    endpoints: RwLock<Endpoints>,
    /// Held shared for the length of a packet hand-off; stop takes it
    /// exclusively to wait out the one in flight.
    delivery: RwLock<()>,
    monitor: SessionMonitor,
}

impl RelaySession {
    /// Create a session in the `Created` state.
    pub fn new(config: SessionConfig) -> RelayResult<Self> {
        let output = config.output.ok_or(RelayError::MissingOutput)?;
        let on_data = config.on_data.ok_or(RelayError::MissingCallback("onData"))?;
        let on_stop = config.on_stop.ok_or(RelayError::MissingCallback("onStop"))?;
        let monitor = config.monitor.unwrap_or_default();
        monitor.set_state(SessionState::Created);

        debug!(output = %output.name(), "Relay session created");

        Ok(Self {
            output,
            endpoints: RwLock::new(Endpoints { on_data, on_stop }),
            delivery: RwLock::new(()),
            monitor,
        })
    }

    /// Begin capture.
    ///
    /// Returns false if the session is already running, the output cannot
    /// begin capture, or its encoders fail to initialize.
    #[instrument(name = "relay_start", skip(self), fields(output = %self.output.name()))]
    pub fn start(&self) -> bool {
        let state = self.state();
        if !state.can_start() {
            debug!(state = state.name(), "Start refused");
            return false;
        }

        if !self.output.can_begin_data_capture() {
            warn!("Output cannot begin data capture");
            return false;
        }

        if !self.output.initialize_encoders() {
            warn!("Encoder initialization failed");
            return false;
        }

        // Active before capture begins so the first packet is not dropped.
        if !self.monitor.transition(state, SessionState::Active) {
            debug!("Start raced with another state change");
            return false;
        }

        if !self.output.begin_data_capture() {
            self.monitor.set_state(state);
            warn!("Output refused to begin data capture");
            return false;
        }

        info!("Relay started");
        true
    }

    /// Hand one encoded packet to the host and wait for its callback.
    ///
    /// The session holds its own reference until the host callback has
    /// returned and has released it by the time this returns. Packets arriving while
    /// the session is not active are dropped.
    pub fn on_packet(&self, packet: &Packet) {
        let _delivery = self.delivery.read();

        let state = self.state();
        if !state.is_active() {
            self.monitor.record_dropped();
            trace!(state = state.name(), size = packet.len(), "Dropping packet");
            return;
        }

        let on_data = self.endpoints.read().on_data.clone();
        let started = Instant::now();
        let result = on_data.blocking_call_with(packet.clone(), HostPacket::copy_from);
        let waited = started.elapsed();

        match result {
            Ok(()) => {
                self.monitor.record_delivered(packet.len(), waited);
                trace!(
                    kind = %packet.packet_type(),
                    size = packet.len(),
                    keyframe = packet.is_keyframe(),
                    pts = packet.pts(),
                    "Packet relayed"
                );
            }
            Err(e) => {
                self.monitor.record_failure(waited);
                warn!(callback = %on_data.name(), error = %e, "Packet delivery failed");
            }
        }
    }

    /// End capture and tell the host.
    ///
    /// Waits for an in-flight packet to finish, ends capture at the engine,
    /// then calls the stop endpoint once. Does nothing unless active.
    #[instrument(name = "relay_stop", skip(self), fields(output = %self.output.name()))]
    pub fn stop(&self, ts: u64) {
        if !self.monitor.transition(SessionState::Active, SessionState::Stopping) {
            debug!(state = self.state().name(), "Stop ignored");
            return;
        }

        drop(self.delivery.write());
        self.output.end_data_capture();

        let on_stop = self.endpoints.read().on_stop.clone();
        let reason = match on_stop.blocking_call(()) {
            Ok(()) => StopReason::Requested,
            Err(e) => {
                self.monitor.record_failure(Duration::ZERO);
                warn!(callback = %on_stop.name(), error = %e, "Stop notification failed");
                if e.is_closed() {
                    StopReason::HostGone
                } else {
                    StopReason::Requested
                }
            }
        };

        self.monitor.set_state(SessionState::Stopped);
        info!(ts, reason = reason.message(), "Relay stopped");
    }

    /// Swap host endpoints. A packet already in flight finishes on the
    /// endpoint it started with.
    ///
    /// Returns the number of endpoints actually replaced.
    pub fn update(&self, update: CallbackUpdate) -> usize {
        let mut swapped = 0;
        {
            let mut endpoints = self.endpoints.write();
            if let Some(on_data) = update.on_data {
                if !endpoints.on_data.same_callback(&on_data) {
                    endpoints.on_data = on_data;
                    swapped += 1;
                }
            }
            if let Some(on_stop) = update.on_stop {
                if !endpoints.on_stop.same_callback(&on_stop) {
                    endpoints.on_stop = on_stop;
                    swapped += 1;
                }
            }
        }

        if swapped > 0 {
            self.monitor.record_swaps(swapped as u64);
            debug!(output = %self.output.name(), swapped, "Relay callbacks replaced");
        }
        swapped
    }

    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    pub fn stats(&self) -> RelayStats {
        self.monitor.snapshot()
    }

    pub fn monitor(&self) -> &SessionMonitor {
        &self.monitor
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        let state = self.state();
        if state.is_active() {
            warn!(output = %self.output.name(), "Relay session destroyed while active");
        }
        self.monitor.set_state(SessionState::Destroyed);
        debug!(
            output = %self.output.name(),
            reason = StopReason::Teardown.message(),
            "Relay session destroyed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    use crossbeam_channel::Receiver;
    use relay_host::{HostConfig, HostRuntime};
    use relay_types::PacketType;

    use super::*;

    #[derive(Default)]
    struct FakeOutput {
        refuse_begin: AtomicBool,
        fail_init: AtomicBool,
        capturing: AtomicBool,
        ends: AtomicUsize,
    }

    impl relay_engine::OutputHandle for FakeOutput {
        fn name(&self) -> &str {
            "fake"
        }

        fn can_begin_data_capture(&self) -> bool {
            !self.refuse_begin.load(Ordering::SeqCst) && !self.capturing.load(Ordering::SeqCst)
        }

        fn initialize_encoders(&self) -> bool {
            !self.fail_init.load(Ordering::SeqCst)
        }

        fn begin_data_capture(&self) -> bool {
            !self.capturing.swap(true, Ordering::SeqCst)
        }

        fn end_data_capture(&self) {
            self.capturing.store(false, Ordering::SeqCst);
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Data(&'static str, Vec<u8>, u32),
        Stop(&'static str),
    }

    struct Fixture {
        runtime: HostRuntime,
        output: Arc<FakeOutput>,
        seen: Receiver<Seen>,
        session: RelaySession,
    }

    fn endpoints(runtime: &HostRuntime, label: &'static str) -> (DataCallback, StopCallback, Receiver<Seen>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let data_tx = tx.clone();
        let on_data = runtime
            .handle()
            .register(format!("{label}:onData"), move |packet: HostPacket| {
                let _ = data_tx.send(Seen::Data(label, packet.buffer.to_vec(), packet.type_tag));
            })
            .unwrap();
        let on_stop = runtime
            .handle()
            .register(format!("{label}:onStop"), move |()| {
                let _ = tx.send(Seen::Stop(label));
            })
            .unwrap();
        (on_data, on_stop, rx)
    }

    fn fixture() -> Fixture {
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let output = Arc::new(FakeOutput::default());
        let (on_data, on_stop, seen) = endpoints(&runtime, "first");
        let session = RelaySession::new(SessionConfig {
            output: Some(output.clone()),
            on_data: Some(on_data),
            on_stop: Some(on_stop),
            monitor: None,
        })
        .unwrap();

        Fixture {
            runtime,
            output,
            seen,
            session,
        }
    }

    fn drain(rx: &Receiver<Seen>) -> Vec<Seen> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_new_requires_output_and_callbacks() {
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let (on_data, on_stop, _rx) = endpoints(&runtime, "x");

        let missing_output = RelaySession::new(SessionConfig {
            output: None,
            on_data: Some(on_data.clone()),
            on_stop: Some(on_stop.clone()),
            monitor: None,
        });
        assert!(matches!(missing_output, Err(RelayError::MissingOutput)));

        let output: OutputRef = Arc::new(FakeOutput::default());
        let missing_data = RelaySession::new(SessionConfig {
            output: Some(output.clone()),
            on_data: None,
            on_stop: Some(on_stop),
            monitor: None,
        });
        assert!(matches!(missing_data, Err(RelayError::MissingCallback("onData"))));

        let missing_stop = RelaySession::new(SessionConfig {
            output: Some(output),
            on_data: Some(on_data),
            on_stop: None,
            monitor: None,
        });
        assert!(matches!(missing_stop, Err(RelayError::MissingCallback("onStop"))));
    }

    #[test]
    fn test_start_refused_when_output_not_ready() {
        let fx = fixture();

        fx.output.refuse_begin.store(true, Ordering::SeqCst);
        assert!(!fx.session.start());
        assert_eq!(fx.session.state(), SessionState::Created);

        fx.output.refuse_begin.store(false, Ordering::SeqCst);
        fx.output.fail_init.store(true, Ordering::SeqCst);
        assert!(!fx.session.start());
        assert_eq!(fx.session.state(), SessionState::Created);
        assert!(!fx.output.capturing.load(Ordering::SeqCst));

        fx.session.on_packet(&Packet::new(PacketType::Video, vec![1u8]));
        fx.session.stop(0);
        fx.runtime.shutdown();
        assert!(drain(&fx.seen).is_empty());
        assert_eq!(fx.session.stats().packets_dropped, 1);
    }

    #[test]
    fn test_start_twice_returns_false() {
        let fx = fixture();
        assert!(fx.session.start());
        assert!(!fx.session.start());
        assert_eq!(fx.session.state(), SessionState::Active);
    }

    #[test]
    fn test_packets_are_copied_and_released() {
        let fx = fixture();
        assert!(fx.session.start());

        let packet = Packet::new(PacketType::Audio, vec![0xFF, 0xF1, 0x50]);
        fx.session.on_packet(&packet);
        assert_eq!(packet.ref_count(), 1);

        fx.session.stop(42);
        assert_eq!(
            drain(&fx.seen),
            vec![Seen::Data("first", vec![0xFF, 0xF1, 0x50], 0), Seen::Stop("first")]
        );

        let stats = fx.session.stats();
        assert_eq!(stats.state, SessionState::Stopped);
        assert_eq!(stats.packets_delivered, 1);
        assert_eq!(stats.bytes_delivered, 3);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let fx = fixture();
        assert!(fx.session.start());

        fx.session.stop(1);
        fx.session.stop(2);
        assert_eq!(drain(&fx.seen), vec![Seen::Stop("first")]);
        assert_eq!(fx.output.ends.load(Ordering::SeqCst), 1);
        assert!(!fx.output.capturing.load(Ordering::SeqCst));

        fx.session.on_packet(&Packet::new(PacketType::Video, vec![0u8; 4]));
        assert!(drain(&fx.seen).is_empty());
        assert_eq!(fx.session.stats().packets_dropped, 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let fx = fixture();
        assert!(fx.session.start());
        fx.session.stop(1);
        assert!(fx.session.start());
        fx.session.on_packet(&Packet::new(PacketType::Video, vec![7u8]));
        fx.session.stop(2);

        assert_eq!(
            drain(&fx.seen),
            vec![
                Seen::Stop("first"),
                Seen::Data("first", vec![7], 1),
                Seen::Stop("first"),
            ]
        );
    }

    #[test]
    fn test_packet_held_while_host_callback_runs() {
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        let on_data = runtime
            .handle()
            .register("held:onData", move |_packet: HostPacket| {
                let _ = entered_tx.send(());
                let _ = gate_rx.recv();
            })
            .unwrap();
        let on_stop = runtime.handle().register("held:onStop", |()| {}).unwrap();
        let session = Arc::new(
            RelaySession::new(SessionConfig {
                output: Some(Arc::new(FakeOutput::default())),
                on_data: Some(on_data),
                on_stop: Some(on_stop),
                monitor: None,
            })
            .unwrap(),
        );
        assert!(session.start());

        let packet = Packet::new(PacketType::Video, vec![1u8, 2, 3]);
        let capture = {
            let session = Arc::clone(&session);
            let packet = packet.clone();
            thread::spawn(move || session.on_packet(&packet))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Ours, the capture thread's, and the session's own reference.
        assert_eq!(packet.ref_count(), 3);

        gate_tx.send(()).unwrap();
        capture.join().unwrap();
        assert_eq!(packet.ref_count(), 1);
        assert_eq!(session.stats().packets_delivered, 1);
    }

    #[test]
    fn test_update_swaps_endpoints() {
        let fx = fixture();
        let (on_data, on_stop, second) = endpoints(&fx.runtime, "second");
        assert!(fx.session.start());

        fx.session.on_packet(&Packet::new(PacketType::Video, vec![1u8]));
        let swapped = fx.session.update(CallbackUpdate {
            on_data: Some(on_data.clone()),
            on_stop: None,
        });
        assert_eq!(swapped, 1);

        // Re-applying the current endpoint is not a swap.
        assert_eq!(
            fx.session.update(CallbackUpdate {
                on_data: Some(on_data),
                on_stop: None,
            }),
            0
        );

        fx.session.on_packet(&Packet::new(PacketType::Video, vec![2u8]));
        fx.session.update(CallbackUpdate {
            on_data: None,
            on_stop: Some(on_stop),
        });
        fx.session.stop(0);

        assert_eq!(drain(&fx.seen), vec![Seen::Data("first", vec![1], 1)]);
        assert_eq!(
            drain(&second),
            vec![Seen::Data("second", vec![2], 1), Seen::Stop("second")]
        );
        assert_eq!(fx.session.stats().callback_swaps, 2);
    }

    #[test]
    fn test_host_gone_counts_failures() {
        let fx = fixture();
        assert!(fx.session.start());
        fx.runtime.shutdown();

        let packet = Packet::new(PacketType::Video, vec![0u8; 16]);
        fx.session.on_packet(&packet);
        assert_eq!(packet.ref_count(), 1);
        fx.session.stop(0);

        let stats = fx.session.stats();
        assert_eq!(stats.packets_delivered, 0);
        assert_eq!(stats.delivery_failures, 2);
        assert_eq!(stats.state, SessionState::Stopped);
    }

    #[test]
    fn test_stop_waits_for_in_flight_packet() {
        let runtime = HostRuntime::spawn(HostConfig::default()).unwrap();
        let output = Arc::new(FakeOutput::default());
        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        let (order_tx, order_rx) = crossbeam_channel::unbounded();

        let data_order = order_tx.clone();
        let on_data = runtime
            .handle()
            .register("slow:onData", move |_packet: HostPacket| {
                let _ = entered_tx.send(());
                let _ = gate_rx.recv();
                let _ = data_order.send("data");
            })
            .unwrap();
        let on_stop = runtime
            .handle()
            .register("slow:onStop", move |()| {
                let _ = order_tx.send("stop");
            })
            .unwrap();

        let session = Arc::new(
            RelaySession::new(SessionConfig {
                output: Some(output),
                on_data: Some(on_data),
                on_stop: Some(on_stop),
                monitor: None,
            })
            .unwrap(),
        );
        assert!(session.start());

        let capture = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.on_packet(&Packet::new(PacketType::Video, vec![1u8])))
        };
        entered_rx.recv().unwrap();

        let stopper = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.stop(0))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(session.state(), SessionState::Stopping);

        gate_tx.send(()).unwrap();
        capture.join().unwrap();
        stopper.join().unwrap();

        assert_eq!(order_rx.try_iter().collect::<Vec<_>>(), vec!["data", "stop"]);
        assert_eq!(session.stats().packets_delivered, 1);
    }

    #[test]
    fn test_drop_marks_destroyed() {
        let fx = fixture();
        let monitor = fx.session.monitor().clone();
        assert!(fx.session.start());
        drop(fx.session);
        assert_eq!(monitor.state(), SessionState::Destroyed);
    }
}
