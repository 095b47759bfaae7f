use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::Path;

use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Color, Table,
};

use toml_edit::{value, Entry};
use tracing::warn;

use crate::config::{Config, Context, Manifest};

#[derive(Debug, Parser)]
pub struct ContextCommand {
    #[clap(subcommand)]
    command: ContextCommands,
}

#[derive(Debug, clap::Subcommand)]
enum ContextCommands {
    /// List
    Ls,

    /// Remove
    Rm {
        #[clap(required = true)]
        /// Name of context to remove from local configuration
        name: String,
    },

    /// Add
    Add {
        #[clap(required = true)]
        /// Name of context to add to local configuration
        name: String,

        /// Management service host taking SCI requests
        sci_host: String,

        /// NATS connection string for connectivity events
        nats_url: String,

        /// SCI user name (password is read from CONNWATCH_PASSWORD)
        #[clap(long)]
        username: Option<String>,

        /// NATS user name (password is read from CONNWATCH_NATS_PASSWORD)
        #[clap(long)]
        nats_user: Option<String>,
    },

    /// Make a context the active one
    Use {
        #[clap(required = true)]
        name: String,
    },
}

pub fn exec(cmd: ContextCommand, path: &Path) -> Result<()> {
    match cmd.command {
        ContextCommands::Ls => {
            let config = Config::load(path)?;

            let mut table = Table::new();

            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Name").add_attribute(Attribute::Bold),
                    Cell::new("SCI Host").add_attribute(Attribute::Bold),
                    Cell::new("NATS").add_attribute(Attribute::Bold),
                    Cell::new("User").add_attribute(Attribute::Bold),
                ]);

            for (name, context) in config.context.into_iter() {
                let cell_name = if name == config.active_context {
                    Cell::new(format!("{name}*"))
                        .fg(Color::Green)
                        .add_attribute(Attribute::Bold)
                } else {
                    Cell::new(name)
                };

                table.add_row(vec![
                    cell_name,
                    Cell::new(context.sci_host),
                    Cell::new(context.nats_url),
                    Cell::new(context.username.unwrap_or_default()),
                ]);
            }

            println!("{table}");
        }

        ContextCommands::Rm { name } => {
            let mut m = Manifest::open(path)?;

            match m.get_section_mut("context")?.entry(&name) {
                Entry::Occupied(context) => context.remove(),
                Entry::Vacant(_) => return Err(eyre!("Context '{name}' not found.")),
            };

            let active = m.get_table_mut().get("active_context").and_then(|v| v.as_str());
            if active == Some(name.as_str()) {
                warn!("Removed the active context '{name}'; select another with `context use`");
            }

            m.save()?;
        }

        ContextCommands::Add {
            name,
            sci_host,
            nats_url,
            username,
            nats_user,
        } => {
            let mut m = Manifest::open(path)?;

            let context = m.get_section_mut("context")?;

            context.insert(
                &name,
                Context::new(&name, &sci_host, &nats_url, username)
                    .with_nats_user(nats_user)
                    .try_into()?,
            );

            // If the next context is the only context, then make it active
            if context.len() == 1 {
                m.get_table_mut().insert("active_context", value(name));
            }

            m.save()?;
        }

        ContextCommands::Use { name } => {
            let mut m = Manifest::open(path)?;

            if !m.get_section_mut("context")?.contains_key(&name) {
                return Err(eyre!("Context '{name}' not found."));
            }
            m.get_table_mut().insert("active_context", value(name));

            m.save()?;
        }
    };

    Ok(())
}
