//! Relay session state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a relay session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Session allocated, capture not started.
    #[default]
    Created = 0,

    /// Capture running; packets are relayed to the host.
    Active = 1,

    /// Stop requested; new packets are dropped.
    Stopping = 2,

    /// Capture ended and the host has been told.
    Stopped = 3,

    /// Session torn down by the engine.
    Destroyed = 4,
}

impl SessionState {
    /// Returns true if packets should be relayed.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if `start` may be attempted from this state.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Created | Self::Stopped)
    }

    /// Decode from the atomic representation.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Destroyed,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Active => "Active",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
            Self::Destroyed => "Destroyed",
        }
    }
}

/// Why an output stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Host requested stop.
    Requested,

    /// The output is being destroyed.
    Teardown,

    /// The host queue went away.
    HostGone,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Requested => "Output stopped by host",
            Self::Teardown => "Output destroyed",
            Self::HostGone => "Host callback queue closed",
        }
    }
}
