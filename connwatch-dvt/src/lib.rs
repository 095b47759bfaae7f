//! Device verification tests for connection control commands.
//!
//! A scenario asks the management service to disconnect or reboot a device,
//! then uses a shared [`connwatch::Monitor`] to require that the device drops
//! off and comes back within the configured timeouts.
//!
//! - [`sci`] - submits `sci_request` commands over HTTP
//! - [`suite`] - scenarios and the suite lifecycle around a shared monitor
//! - [`config`] - `DVT_*` environment configuration for live runs
//!
//! ```rust,ignore
//! let config = DvtConfig::from_env()?.expect("DVT_HOSTNAME set");
//! let cw = config.connect().await?;
//! let registry = Arc::new(MonitorRegistry::new(Arc::new(cw.feed()), MonitorConfig::default()));
//!
//! let suite = DvtSuite::setup(registry, Arc::new(config.sci_client()), &config.device, config.timeouts).await?;
//! suite.run(Scenario::Disconnect).await?;
//! suite.run(Scenario::Reboot).await?;
//! suite.teardown().await;
//! ```

pub mod config;
pub mod sci;
pub mod suite;

pub use config::DvtConfig;
pub use sci::{CommandSender, DeviceCommand, SciClient, SciError};
pub use suite::{run_scenario, DvtError, DvtSuite, Scenario, ScenarioReport, ScenarioTimeouts};
