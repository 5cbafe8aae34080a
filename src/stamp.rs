//! Install version stamp.
//!
//! `<sys_conf_root>/installed.json` maps feature keys to the version that
//! was last provisioned, e.g. `{"SERVICE_IMAGES_VERSION": "0.10.0"}`. It is
//! read once when a run is assembled and rewritten only after a run
//! succeeds.

use std::collections::BTreeMap;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ProvisionError;

/// Stamp key for the service image set.
pub const SERVICE_IMAGES_KEY: &str = "SERVICE_IMAGES_VERSION";

/// File name of the stamp inside the system config root.
pub const STAMP_FILE: &str = "installed.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallStamp {
    path: Utf8PathBuf,
    entries: BTreeMap<String, String>,
}

impl InstallStamp {
    /// Loads the stamp at `path`. A missing file is an empty stamp.
    pub fn load(path: impl Into<Utf8PathBuf>) -> Result<Self, ProvisionError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ProvisionError::Config(format!("failed to parse install stamp {}: {}", path, e))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(ProvisionError::io(
                    format!("failed to read install stamp {}", path),
                    e,
                ));
            }
        };
        tracing::debug!(path = %path, entries = entries.len(), "loaded install stamp");
        Ok(Self { path, entries })
    }

    /// Loads `<root>/installed.json`.
    pub fn load_from_root(root: &Utf8Path) -> Result<Self, ProvisionError> {
        Self::load(root.join(STAMP_FILE))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// True if `key` was never stamped or was stamped with another version.
    pub fn needs(&self, key: &str, version: &str) -> bool {
        self.get(key) != Some(version)
    }

    pub fn record(&mut self, key: impl Into<String>, version: impl Into<String>) {
        self.entries.insert(key.into(), version.into());
    }

    /// Records every entry of `installed`, overwriting existing keys.
    pub fn merge(&mut self, installed: &BTreeMap<String, String>) {
        for (key, version) in installed {
            self.record(key.clone(), version.clone());
        }
    }

    /// Writes the stamp as pretty JSON, creating the parent directory.
    pub fn save(&self) -> Result<(), ProvisionError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                ProvisionError::io(format!("failed to create directory {}", parent), e)
            })?;
        }
        let mut content = serde_json::to_string_pretty(&self.entries).map_err(|e| {
            ProvisionError::Config(format!("failed to serialize install stamp: {}", e))
        })?;
        content.push('\n');
        fs::write(&self.path, content).map_err(|e| {
            ProvisionError::io(format!("failed to write install stamp {}", self.path), e)
        })?;
        tracing::info!(path = %self.path, "updated install stamp");
        Ok(())
    }
}
