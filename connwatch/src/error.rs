use std::time::Duration;

use crate::device::DeviceId;
use crate::messages::ConnectionKind;

/// Conditions returned by [`crate::Monitor`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// The transition did not happen before the deadline.
    #[error("device {device} did not become {kind} within {}s", format_secs(.timeout))]
    Timeout {
        device: DeviceId,
        kind: ConnectionKind,
        timeout: Duration,
    },

    #[error("event feed unavailable for device {device}: {reason}")]
    FeedUnavailable { device: DeviceId, reason: String },

    #[error("connectivity monitor for device {device} was stopped")]
    MonitorStopped { device: DeviceId },

    #[error("invalid device: {0}")]
    InvalidDevice(String),

    #[error("wait for device {device} to become {kind} was cancelled")]
    Cancelled {
        device: DeviceId,
        kind: ConnectionKind,
    },
}

impl MonitorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MonitorError::Timeout { .. })
    }

    /// True for failures of the monitoring machinery itself, as opposed to the
    /// device simply not doing what was expected.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            MonitorError::FeedUnavailable { .. } | MonitorError::MonitorStopped { .. }
        )
    }
}

/// Errors reported by [`crate::feed::EventFeed`] implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("event feed unavailable: {0}")]
    Unavailable(String),

    #[error("event feed disconnected: {0}")]
    Disconnected(String),

    #[error("not authorized to observe device {0}")]
    Unauthorized(DeviceId),
}

fn format_secs(d: &Duration) -> String {
    let secs = d.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", d.as_secs())
    } else {
        format!("{secs:.3}")
    }
}
