use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceId;

pub fn subject_connectivity(device: &DeviceId) -> String {
    format!("connwatch.device.{device}.connectivity")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Connected => f.write_str("connected"),
            ConnectionKind::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Why the connector closed its session, as reported alongside a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ServerDisconnected,
    ServerRedirected,
    DeviceTerminated,
    DeviceStopped,
    NoKeepalive,
    Abort,
    DeviceError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityEvent {
    pub device: DeviceId,
    pub kind: ConnectionKind,
    pub observed_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CloseReason>,
}

impl ConnectivityEvent {
    pub fn connected(device: DeviceId, observed_at_ms: u64) -> Self {
        ConnectivityEvent {
            device,
            kind: ConnectionKind::Connected,
            observed_at_ms,
            reason: None,
        }
    }

    pub fn disconnected(device: DeviceId, observed_at_ms: u64) -> Self {
        ConnectivityEvent {
            device,
            kind: ConnectionKind::Disconnected,
            observed_at_ms,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: CloseReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

impl From<ConnectivityEvent> for Vec<u8> {
    fn from(msg: ConnectivityEvent) -> Self {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_vec(&msg).unwrap_or_default()
    }
}

impl TryFrom<&[u8]> for ConnectivityEvent {
    type Error = serde_json::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        serde_json::from_slice(value)
    }
}
