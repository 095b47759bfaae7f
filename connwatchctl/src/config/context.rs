use color_eyre::eyre::{self, eyre, Result};
use connwatch::MonitorConfig;
use serde_derive::{Deserialize, Serialize};
use toml_edit::{Document, Item};

/// The [context] table of the config
#[derive(Debug, Deserialize, Serialize)]
pub struct Context {
    pub name: String,
    /// Management service host taking SCI requests
    pub sci_host: String,
    /// NATS server carrying connectivity events
    pub nats_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// NATS user; the password is read from CONNWATCH_NATS_PASSWORD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nats_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorConfig>,
}

impl Context {
    pub fn new(name: &str, sci_host: &str, nats_url: &str, username: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            sci_host: sci_host.to_owned(),
            nats_url: nats_url.to_owned(),
            username,
            nats_user: None,
            monitor: None,
        }
    }

    pub fn with_nats_user(mut self, nats_user: Option<String>) -> Self {
        self.nats_user = nats_user;
        self
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        self.monitor.clone().unwrap_or_default()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new("localhost", "localhost", "nats://localhost:4222", None)
    }
}

impl TryInto<Item> for Context {
    type Error = eyre::Report;

    fn try_into(self) -> Result<Item> {
        let doc = toml_edit::ser::to_string(&self)?.parse::<Document>()?;
        if doc.as_table().is_empty() {
            return Err(eyre!("Context struct doesn't map to TOML table?"));
        }

        Ok(Item::Table(doc.as_table().clone()))
    }
}
