//! DNS convergence configuration.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

fn default_darwin_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/etc/resolver")
}

fn default_linux_debian_file() -> Utf8PathBuf {
    Utf8PathBuf::from("/etc/resolvconf/resolv.conf.d/head")
}

fn default_linux_other_file() -> Utf8PathBuf {
    Utf8PathBuf::from("/etc/resolv.conf")
}

fn default_reload_command() -> String {
    "resolvconf -u".to_string()
}

fn default_hypervisor() -> String {
    r"C:\Program Files\Oracle\VirtualBox\VBoxManage.exe".to_string()
}

fn default_vm_name() -> String {
    "Kalabox2".to_string()
}

/// Where resolver configuration lives on each platform and where the
/// desired nameservers come from.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// Directory holding one resolver file per domain (darwin).
    #[serde(default = "default_darwin_dir")]
    pub darwin_dir: Utf8PathBuf,
    /// resolvconf drop-in used on debian-flavored linux.
    #[serde(default = "default_linux_debian_file")]
    pub linux_debian_file: Utf8PathBuf,
    /// Resolver file edited directly on other linux flavors.
    #[serde(default = "default_linux_other_file")]
    pub linux_other_file: Utf8PathBuf,
    /// Refresh command run after editing the debian drop-in.
    #[serde(default = "default_reload_command")]
    pub reload_command: String,
    /// Static nameserver IPs exposed by the service network.
    #[serde(default)]
    pub server_ips: Vec<String>,
    /// Command printing the nameserver IPs, whitespace separated.
    #[serde(default)]
    pub server_ips_command: Option<String>,
    #[serde(default)]
    pub win32: Win32Config,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            darwin_dir: default_darwin_dir(),
            linux_debian_file: default_linux_debian_file(),
            linux_other_file: default_linux_other_file(),
            reload_command: default_reload_command(),
            server_ips: Vec::new(),
            server_ips_command: None,
            win32: Win32Config::default(),
        }
    }
}

impl DnsConfig {
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if !self.server_ips.is_empty() && self.server_ips_command.is_some() {
            return Err(ProvisionError::Validation(
                "dns.server_ips and dns.server_ips_command are mutually exclusive".to_string(),
            ));
        }
        if self.server_ips.is_empty() && self.server_ips_command.is_none() {
            return Err(ProvisionError::Validation(
                "one of dns.server_ips or dns.server_ips_command is required".to_string(),
            ));
        }
        for ip in &self.server_ips {
            super::parse_ip(ip)?;
        }
        if let Some(command) = &self.server_ips_command
            && command.trim().is_empty()
        {
            return Err(ProvisionError::Validation(
                "dns.server_ips_command must not be empty".to_string(),
            ));
        }
        if self.reload_command.trim().is_empty() {
            return Err(ProvisionError::Validation(
                "dns.reload_command must not be empty".to_string(),
            ));
        }
        if let Some(ip) = &self.win32.management_ip {
            super::parse_ip(ip)?;
        }
        Ok(())
    }
}

/// Hypervisor details used to find the host-only adapter on win32.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Win32Config {
    /// Hypervisor management CLI.
    #[serde(default = "default_hypervisor")]
    pub hypervisor: String,
    #[serde(default = "default_vm_name")]
    pub vm_name: String,
    /// IP whose presence on the adapter means DNS is already set.
    /// Defaults to the first desired nameserver.
    #[serde(default)]
    pub management_ip: Option<String>,
}

impl Default for Win32Config {
    fn default() -> Self {
        Self {
            hypervisor: default_hypervisor(),
            vm_name: default_vm_name(),
            management_ip: None,
        }
    }
}
