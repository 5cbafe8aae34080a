//! YAML configuration.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;

use crate::dns::DnsConfig;
use crate::engine::{EngineConfig, ServiceConfig};
use crate::error::ProvisionError;
use crate::graph::FailurePolicy;
use crate::platform::LinuxFlavor;
use crate::privilege::Privilege;
use crate::runner::ChainPolicy;

/// Version of the service image set this build installs.
pub const SERVICE_IMAGES_VERSION: &str = "0.10.0";

const DOMAIN_PATTERN: &str =
    r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$";
const CONTAINER_NAME_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$";

fn pattern(source: &str) -> Result<Regex, ProvisionError> {
    Regex::new(source)
        .map_err(|e| ProvisionError::Validation(format!("invalid pattern '{}': {}", source, e)))
}

fn default_domain() -> String {
    "kbox".to_string()
}

fn default_sys_conf_root() -> Utf8PathBuf {
    Utf8PathBuf::from("/var/lib/svcdns")
}

fn default_images_version() -> String {
    SERVICE_IMAGES_VERSION.to_string()
}

fn default_os_release() -> Utf8PathBuf {
    Utf8PathBuf::from("/etc/os-release")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Domain the service nameservers answer for.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Directory holding `installed.json`.
    #[serde(default = "default_sys_conf_root")]
    pub sys_conf_root: Utf8PathBuf,
    #[serde(default = "default_images_version")]
    pub service_images_version: String,
    #[serde(default)]
    pub privilege: Privilege,
    /// Skips `/etc/os-release` probing when set.
    #[serde(default)]
    pub linux_flavor: Option<LinuxFlavor>,
    #[serde(default = "default_os_release")]
    pub os_release: Utf8PathBuf,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// How command batches run and how step failures are handled.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsConfig {
    /// Defaults to `fail_fast` on darwin/linux and `sequential` on win32.
    #[serde(default)]
    pub chain: Option<ChainPolicy>,
    /// Kill commands running longer than this. No limit when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl CommandsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Path of the install stamp.
    pub fn stamp_path(&self) -> Utf8PathBuf {
        self.sys_conf_root.join(crate::stamp::STAMP_FILE)
    }

    pub fn validate(&self) -> Result<(), ProvisionError> {
        if !pattern(DOMAIN_PATTERN)?.is_match(&self.domain) {
            return Err(ProvisionError::Validation(format!(
                "domain '{}' is not a valid DNS name",
                self.domain
            )));
        }
        if self.service_images_version.trim().is_empty() {
            return Err(ProvisionError::Validation(
                "service_images_version must not be empty".to_string(),
            ));
        }
        if self.commands.timeout_secs == Some(0) {
            return Err(ProvisionError::Validation(
                "commands.timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.dns.validate()?;
        self.engine.validate()?;

        let container_name = pattern(CONTAINER_NAME_PATTERN)?;
        let mut names = HashSet::new();
        for service in &self.services {
            if !container_name.is_match(&service.name) {
                return Err(ProvisionError::Validation(format!(
                    "service name '{}' is not a valid container name",
                    service.name
                )));
            }
            if service.image.trim().is_empty() {
                return Err(ProvisionError::Validation(format!(
                    "service '{}' has no image",
                    service.name
                )));
            }
            if !names.insert(service.name.as_str()) {
                return Err(ProvisionError::Validation(format!(
                    "duplicate service name '{}'",
                    service.name
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Utf8Path) -> Result<Config, ProvisionError> {
    let file = File::open(path)
        .map_err(|e| ProvisionError::io(format!("failed to load file: {}", path), e))?;
    let reader = BufReader::new(file);
    let config: Config = serde_yaml::from_reader(reader)
        .map_err(|e| ProvisionError::Config(format!("failed to parse yaml: {}: {}", path, e)))?;
    Ok(config)
}
