//! Delivery statistics.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;

/// Snapshot of a relay session's delivery counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayStats {
    /// Current session state.
    pub state: SessionState,

    /// Packets handed to the host data callback.
    pub packets_delivered: u64,

    /// Payload bytes handed to the host.
    pub bytes_delivered: u64,

    /// Packets dropped because the session was not active.
    pub packets_dropped: u64,

    /// Packets whose host call failed.
    pub delivery_failures: u64,

    /// Total time the capture thread spent blocked on the host, in microseconds.
    pub host_wait_micros: u64,

    /// Number of times the data callback was swapped.
    pub callback_swaps: u64,
}

impl RelayStats {
    /// Average time spent blocked per delivered packet, in microseconds.
    pub fn average_wait_micros(&self) -> f64 {
        if self.packets_delivered == 0 {
            0.0
        } else {
            self.host_wait_micros as f64 / self.packets_delivered as f64
        }
    }
}
