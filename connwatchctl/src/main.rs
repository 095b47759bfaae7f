mod commands;
mod config;

use clap::Parser;
use std::path::PathBuf;

use color_eyre::eyre::{eyre, Result};
use directories::ProjectDirs;
use lazy_static::lazy_static;
use tracing_subscriber::EnvFilter;

use commands::Commands;

lazy_static! {
    pub static ref CONFIG_PATH: PathBuf = ProjectDirs::from("org", "oatscenter", "connwatch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("connwatch.toml"));
}

#[derive(Parser, Debug)]
#[clap(name = "connwatchctl")]
#[clap(author, version, about, long_about = None)]
/// Drive connection control tests against managed devices
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[clap(short, long, global = true, parse(from_occurrences))]
    verbose: u8,

    #[clap(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use color_eyre for application error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let args = Cli::parse();
    init_tracing(args.verbose)?;

    // Pass control the commanded subcommand
    match args.command {
        Commands::Context(context) => commands::context::exec(context, &CONFIG_PATH),
        Commands::Device(device) => commands::devices::exec(device, &CONFIG_PATH).await,
    }?;

    Ok(())
}
