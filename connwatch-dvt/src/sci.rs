use std::fmt;

use connwatch::DeviceId;
use futures::future::BoxFuture;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SciError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SCI API error: {status} - {message}")]
    Api { status: u16, message: String },
}

/// Connection control request understood by the management service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Drop the device's session; the device reconnects on its own.
    Disconnect,
    Reboot,
}

impl DeviceCommand {
    fn element(&self) -> &'static str {
        match self {
            DeviceCommand::Disconnect => "disconnect",
            DeviceCommand::Reboot => "reboot",
        }
    }

    /// The `sci_request` document targeting `device`.
    pub fn request_body(&self, device: &DeviceId) -> String {
        let op = self.element();
        format!(
            "<sci_request version=\"1.0\">\n  <{op}>\n    <targets>\n      <device id=\"{device}\"/>\n    </targets>\n  </{op}>\n</sci_request>"
        )
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element())
    }
}

/// Something that can deliver a [`DeviceCommand`] to a device.
pub trait CommandSender: Send + Sync {
    /// Submit `command` and return the raw response body.
    fn send<'a>(
        &'a self,
        command: DeviceCommand,
        device: &'a DeviceId,
    ) -> BoxFuture<'a, Result<String, SciError>>;
}

/// Client for the management service's SCI endpoint.
pub struct SciClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl SciClient {
    /// `host` may be a bare hostname (`http://` is assumed) or a full base URL.
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };

        Self {
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/ws/sci", self.base_url)
    }

    pub async fn send_command(
        &self,
        command: DeviceCommand,
        device: &DeviceId,
    ) -> Result<String, SciError> {
        debug!(%device, %command, endpoint = %self.endpoint(), "Posting SCI request");
        let resp = self
            .client
            .post(self.endpoint())
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(command.request_body(device))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SciError::Api {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        Ok(resp.text().await?)
    }
}

impl CommandSender for SciClient {
    fn send<'a>(
        &'a self,
        command: DeviceCommand,
        device: &'a DeviceId,
    ) -> BoxFuture<'a, Result<String, SciError>> {
        Box::pin(self.send_command(command, device))
    }
}
