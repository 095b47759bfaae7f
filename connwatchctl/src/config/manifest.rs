use color_eyre::eyre::{eyre, Context, Result};
use std::{
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};
use toml_edit::{table, Document, Table};

use super::Config;

/// A wrapper around `toml_edit` that keeps the user's formatting intact.
pub struct Manifest {
    path: PathBuf,
    doc: Document,
}

impl Manifest {
    /// Open the config file, starting from an empty document when it does not
    /// exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let doc = if path.exists() {
            read_to_string(path)?.parse::<Document>()?
        } else {
            Document::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn save(&self) -> Result<()> {
        if !self.path.exists() {
            create_dir_all(
                self.path
                    .parent()
                    .ok_or_else(|| eyre!("{path} has no parent?", path = self.path.display()))?,
            )?;
        }

        write(&self.path, self.doc.to_string())?;

        Ok(())
    }

    pub fn get_table_mut(&mut self) -> &mut Table {
        self.doc.as_table_mut()
    }

    /// The named top level table, created when missing.
    pub fn get_section_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.doc
            .as_table_mut()
            .entry(name)
            .or_insert(table())
            .as_table_mut()
            .ok_or_else(|| eyre!("'{name}' in config file is not a table"))
    }
}

impl TryInto<Config> for Manifest {
    type Error = color_eyre::Report;

    fn try_into(self) -> Result<Config> {
        toml_edit::de::from_document(self.doc).wrap_err("Invalid config file.")
    }
}
