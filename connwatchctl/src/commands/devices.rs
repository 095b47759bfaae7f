use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use comfy_table::{Attribute, Cell, Table};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use connwatch::{
    ConnectionKind, Connwatch, DeviceId, Monitor, MonitorError, Since, Transition, WaitOptions,
};
use connwatch_dvt::{run_scenario, SciClient, Scenario, ScenarioReport, ScenarioTimeouts};

use crate::config::{Config, Context};

const PASSWORD_VAR: &str = "CONNWATCH_PASSWORD";
const NATS_PASSWORD_VAR: &str = "CONNWATCH_NATS_PASSWORD";

/// Re-armed wait length while watching without a deadline.
const WATCH_SLICE: Duration = Duration::from_secs(3600);

#[derive(Debug, Parser)]
pub struct DeviceCommand {
    #[clap(subcommand)]
    command: DevicesCommands,
}

#[derive(Debug, Subcommand)]
enum DevicesCommands {
    /// Ask the service to drop the device's session and wait for it to return
    Disconnect(ScenarioArgs),

    /// Reboot the device and wait for it to return
    Reboot(ScenarioArgs),

    /// Print connectivity transitions as they happen
    Watch {
        /// Device ID
        id: String,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[clap(long)]
        duration: Option<u64>,
    },
}

#[derive(Debug, Args)]
struct ScenarioArgs {
    /// Device ID
    id: String,

    /// Seconds to wait for each of the disconnect and the reconnect
    #[clap(long, default_value = "30")]
    timeout: u64,

    /// Print the report as JSON
    #[clap(long)]
    json: bool,
}

pub async fn exec(cmd: DeviceCommand, path: &Path) -> Result<()> {
    let config = Config::load(path)?;
    let context = config.get_active_context()?;
    debug!(context = %context.name, "Using context");

    match cmd.command {
        DevicesCommands::Disconnect(args) => scenario(context, Scenario::Disconnect, args).await,
        DevicesCommands::Reboot(args) => scenario(context, Scenario::Reboot, args).await,
        DevicesCommands::Watch { id, duration } => {
            watch(context, DeviceId::new(id)?, duration.map(Duration::from_secs)).await
        }
    }
}

/// NATS user and password for the context, if it names a user.
fn nats_credentials<F>(context: &Context, lookup: F) -> Result<Option<(String, String)>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(user) = context.nats_user.clone() else {
        return Ok(None);
    };
    let password = lookup(NATS_PASSWORD_VAR).ok_or_else(|| {
        eyre!(
            "Context '{}' sets nats_user but {NATS_PASSWORD_VAR} is not set",
            context.name
        )
    })?;

    Ok(Some((user, password)))
}

async fn start_monitor(context: &Context, device: DeviceId) -> Result<Monitor> {
    let connected = match nats_credentials(context, |key| std::env::var(key).ok())? {
        Some((user, password)) => {
            debug!(user = %user, "Authenticating to NATS");
            Connwatch::connect_with_auth(&context.nats_url, &user, &password).await
        }
        None => Connwatch::connect(&context.nats_url).await,
    };
    let cw = connected.wrap_err_with(|| format!("Failed to connect to {}", context.nats_url))?;

    let monitor = Monitor::with_config(Arc::new(cw.feed()), device, context.monitor_config());
    monitor.start().await?;

    Ok(monitor)
}

async fn scenario(context: &Context, scenario: Scenario, args: ScenarioArgs) -> Result<()> {
    let device = DeviceId::new(args.id)?;
    let username = context
        .username
        .as_deref()
        .ok_or_else(|| eyre!("Context '{}' has no username", context.name))?;
    let password =
        std::env::var(PASSWORD_VAR).wrap_err_with(|| format!("{PASSWORD_VAR} is not set"))?;
    let sci = SciClient::new(&context.sci_host, username, &password);

    let timeouts = ScenarioTimeouts {
        disconnect: Duration::from_secs(args.timeout),
        connect: Duration::from_secs(args.timeout),
    };

    let monitor = start_monitor(context, device).await?;
    let result = run_scenario(&monitor, &sci, scenario, timeouts).await;
    monitor.stop().await;
    let report = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report_table(&report));
    }

    Ok(())
}

fn report_table(report: &ScenarioReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new(report.scenario.to_string()).add_attribute(Attribute::Bold),
            Cell::new(report.device.to_string()).add_attribute(Attribute::Bold),
        ]);

    table.add_row(vec![
        "Disconnected".to_string(),
        format!(
            "after {:.1?} (at {} ms)",
            report.time_to_disconnect, report.disconnected.observed_at_ms
        ),
    ]);
    table.add_row(vec![
        "Reconnected".to_string(),
        format!(
            "after {:.1?} (at {} ms)",
            report.time_to_connect, report.connected.observed_at_ms
        ),
    ]);
    table.add_row(vec!["Response".to_string(), report.response.trim().to_string()]);

    table
}

async fn watch(context: &Context, device: DeviceId, duration: Option<Duration>) -> Result<()> {
    let monitor = start_monitor(context, device).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let deadline = duration.map(|d| Instant::now() + d);
    let mut seen = monitor.checkpoint();
    info!(device = %monitor.device(), "Watching connectivity (Ctrl-C to stop)");

    let result = loop {
        let timeout = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => WATCH_SLICE,
        };
        let options = WaitOptions::new(timeout)
            .since(Since::Checkpoint(seen))
            .cancel_on(cancel.clone());

        let woke = tokio::select! {
            r = monitor.wait_for(ConnectionKind::Disconnected, options.clone()) => r,
            r = monitor.wait_for(ConnectionKind::Connected, options) => r,
        };

        match woke {
            // Both kinds may have landed; print everything past `seen` in order.
            Ok(_) => {
                for transition in monitor.recent_transitions() {
                    if transition.checkpoint() > seen {
                        print_transition(&transition);
                        seen = transition.checkpoint();
                    }
                }
            }
            Err(MonitorError::Timeout { .. }) if deadline.is_none() => continue,
            Err(MonitorError::Timeout { .. }) | Err(MonitorError::Cancelled { .. }) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    monitor.stop().await;
    Ok(result?)
}

fn print_transition(transition: &Transition) {
    match transition.reason {
        Some(reason) => println!(
            "{:>15}  {:<12}  seq={}  reason={:?}",
            transition.observed_at_ms, transition.kind, transition.seq, reason
        ),
        None => println!(
            "{:>15}  {:<12}  seq={}",
            transition.observed_at_ms, transition.kind, transition.seq
        ),
    }
}
