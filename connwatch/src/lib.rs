//! Device connectivity monitoring for end-to-end device management tests.
//!
//! - [`Monitor`] - waits for a device to disconnect or reconnect
//! - [`feed`] - where connectivity events come from ([`feed::NatsFeed`])
//! - [`registry::MonitorRegistry`] - one shared monitor per device
//!
//! # Features
//!
//! - `test-utils` - in-memory feed and an ephemeral NATS server for tests

pub mod config;
pub mod device;
pub mod error;
pub mod feed;
pub mod messages;
pub mod monitor;
pub mod registry;

pub mod test_utils;

pub use config::{BackoffPolicy, MonitorConfig};
pub use device::DeviceId;
pub use error::{FeedError, MonitorError};
pub use messages::{ConnectionKind, ConnectivityEvent};
pub use monitor::{Monitor, Since, Transition, WaitOptions};

use feed::NatsFeed;

pub type ConnectError = async_nats::ConnectError;

/// Connection to the NATS bus carrying connectivity events.
pub struct Connwatch {
    nc: async_nats::Client,
}

impl Connwatch {
    pub async fn connect(url: &str) -> Result<Self, ConnectError> {
        Ok(Connwatch {
            nc: async_nats::connect(url).await?,
        })
    }

    pub async fn connect_with_auth(url: &str, user: &str, password: &str) -> Result<Self, ConnectError> {
        let nc = async_nats::ConnectOptions::with_user_and_password(user.into(), password.into())
            .connect(url)
            .await?;
        Ok(Connwatch { nc })
    }

    pub fn nc(&self) -> async_nats::Client {
        // NATS clone is fast
        self.nc.clone()
    }

    pub fn feed(&self) -> NatsFeed {
        NatsFeed::new(self.nc.clone())
    }
}
