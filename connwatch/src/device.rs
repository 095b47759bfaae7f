use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MonitorError;

const MAX_DEVICE_ID_LEN: usize = 64;

/// Identifier of one managed device.
///
/// The identifier is embedded verbatim in NATS subjects and SCI request bodies,
/// so only ASCII alphanumerics, `-`, `_` and `:` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Result<Self, MonitorError> {
        let id = id.into();

        if id.is_empty() {
            return Err(MonitorError::InvalidDevice("device id is empty".to_string()));
        }
        if id.len() > MAX_DEVICE_ID_LEN {
            return Err(MonitorError::InvalidDevice(format!(
                "device id longer than {MAX_DEVICE_ID_LEN} characters: {id}"
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':')))
        {
            return Err(MonitorError::InvalidDevice(format!(
                "device id {id:?} contains {c:?}"
            )));
        }

        Ok(DeviceId(id))
    }

    /// Render a raw 16 byte connector device id in its canonical
    /// `XXXXXXXX-XXXXXXXX-XXXXXXXX-XXXXXXXX` form.
    pub fn from_connector_bytes(bytes: [u8; 16]) -> Self {
        let groups: Vec<String> = bytes
            .chunks(4)
            .map(|chunk| chunk.iter().map(|b| format!("{b:02X}")).collect())
            .collect();

        DeviceId(groups.join("-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DeviceId::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
