use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use connwatch::registry::{MonitorLease, MonitorRegistry};
use connwatch::{ConnectionKind, DeviceId, Monitor, MonitorError, Since, Transition, WaitOptions};
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::sci::{CommandSender, DeviceCommand, SciError};

#[derive(Debug, thiserror::Error)]
pub enum DvtError {
    #[error(transparent)]
    Sci(#[from] SciError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A connection control test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Disconnect,
    Reboot,
}

impl Scenario {
    pub fn command(&self) -> DeviceCommand {
        match self {
            Scenario::Disconnect => DeviceCommand::Disconnect,
            Scenario::Reboot => DeviceCommand::Reboot,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Disconnect => f.write_str("Disconnect"),
            Scenario::Reboot => f.write_str("Reboot"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioTimeouts {
    pub disconnect: Duration,
    pub connect: Duration,
}

impl Default for ScenarioTimeouts {
    fn default() -> Self {
        Self {
            disconnect: Duration::from_secs(30),
            connect: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub device: DeviceId,
    /// Body the management service returned for the command.
    pub response: String,
    pub disconnected: Transition,
    pub connected: Transition,
    /// From sending the command until the disconnect was observed.
    pub time_to_disconnect: Duration,
    /// From the disconnect until the device was back.
    pub time_to_connect: Duration,
}

/// Send the scenario's command and require the device to drop and come back.
pub async fn run_scenario(
    monitor: &Monitor,
    sender: &dyn CommandSender,
    scenario: Scenario,
    timeouts: ScenarioTimeouts,
) -> Result<ScenarioReport, DvtError> {
    let device = monitor.device();
    let command = scenario.command();

    info!("***** Beginning {scenario} Test *****");
    let checkpoint = monitor.checkpoint();
    let started = Instant::now();

    info!(%device, "Sending {command} request");
    let response = sender.send(command, device).await?;
    info!(%device, "Response to {command} request = {response}");

    info!(%device, "Waiting for the service to disconnect the device");
    let disconnected = monitor
        .wait_for(
            ConnectionKind::Disconnected,
            WaitOptions::new(timeouts.disconnect).since(Since::Checkpoint(checkpoint)),
        )
        .await?;
    let time_to_disconnect = started.elapsed();
    info!(%device, seq = disconnected.seq, "Device disconnected");

    info!(%device, "Waiting for the device to reconnect");
    let connected = monitor
        .wait_for(
            ConnectionKind::Connected,
            WaitOptions::new(timeouts.connect)
                .since(Since::Checkpoint(disconnected.checkpoint())),
        )
        .await?;
    let time_to_connect = started.elapsed().saturating_sub(time_to_disconnect);
    info!(%device, seq = connected.seq, "Device connected");

    Ok(ScenarioReport {
        scenario,
        device: device.clone(),
        response,
        disconnected,
        connected,
        time_to_disconnect,
        time_to_connect,
    })
}

/// A set of scenarios sharing one device monitor.
///
/// The monitor is leased from the registry in [`DvtSuite::setup`] and handed
/// back by [`DvtSuite::teardown`], which consumes the suite.
pub struct DvtSuite {
    registry: Arc<MonitorRegistry>,
    sender: Arc<dyn CommandSender>,
    lease: MonitorLease,
    timeouts: ScenarioTimeouts,
}

impl DvtSuite {
    pub async fn setup(
        registry: Arc<MonitorRegistry>,
        sender: Arc<dyn CommandSender>,
        device: &DeviceId,
        timeouts: ScenarioTimeouts,
    ) -> Result<Self, DvtError> {
        let lease = registry.acquire(device).await?;
        info!(%device, "DVT suite ready");
        Ok(Self {
            registry,
            sender,
            lease,
            timeouts,
        })
    }

    pub fn monitor(&self) -> &Monitor {
        &self.lease
    }

    pub async fn run(&self, scenario: Scenario) -> Result<ScenarioReport, DvtError> {
        run_scenario(&self.lease, self.sender.as_ref(), scenario, self.timeouts).await
    }

    pub async fn teardown(self) {
        let device = self.lease.device().clone();
        self.registry.release(self.lease).await;
        info!(%device, "DVT suite torn down");
    }
}
