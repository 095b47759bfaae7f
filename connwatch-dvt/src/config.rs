use std::time::Duration;

use connwatch::{Connwatch, DeviceId};

use crate::sci::SciClient;
use crate::suite::{DvtError, ScenarioTimeouts};

/// Target of a live device verification run, read from `DVT_*` variables.
#[derive(Debug, Clone)]
pub struct DvtConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub device: DeviceId,
    pub nats_url: String,
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,
    pub timeouts: ScenarioTimeouts,
}

impl DvtConfig {
    /// `Ok(None)` when `DVT_HOSTNAME` is unset, i.e. no device is configured.
    pub fn from_env() -> Result<Option<Self>, DvtError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, DvtError> {
        let Some(hostname) = lookup("DVT_HOSTNAME") else {
            return Ok(None);
        };
        let required = |key: &str| lookup(key).ok_or_else(|| DvtError::Config(format!("{key} is not set")));
        let secs = |key: &str, default: Duration| match lookup(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| DvtError::Config(format!("{key}={raw}: {e}"))),
        };

        let defaults = ScenarioTimeouts::default();
        Ok(Some(Self {
            hostname,
            username: required("DVT_USERNAME")?,
            password: required("DVT_PASSWORD")?,
            device: DeviceId::new(required("DVT_DEVICE_ID")?)?,
            nats_url: required("DVT_NATS_URL")?,
            nats_user: lookup("DVT_NATS_USER"),
            nats_password: lookup("DVT_NATS_PASSWORD"),
            timeouts: ScenarioTimeouts {
                disconnect: secs("DVT_DISCONNECT_TIMEOUT_SECS", defaults.disconnect)?,
                connect: secs("DVT_CONNECT_TIMEOUT_SECS", defaults.connect)?,
            },
        }))
    }

    pub fn sci_client(&self) -> SciClient {
        SciClient::new(&self.hostname, &self.username, &self.password)
    }

    pub async fn connect(&self) -> Result<Connwatch, connwatch::ConnectError> {
        match (&self.nats_user, &self.nats_password) {
            (Some(user), Some(pass)) => Connwatch::connect_with_auth(&self.nats_url, user, pass).await,
            _ => Connwatch::connect(&self.nats_url).await,
        }
    }
}
