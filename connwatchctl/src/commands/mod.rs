pub mod context;
pub mod devices;

use clap::Subcommand;

use context::ContextCommand;
use devices::DeviceCommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage management service contexts
    Context(ContextCommand),

    /// Disconnect, reboot or watch a device
    Device(DeviceCommand),
}
