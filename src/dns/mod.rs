//! DNS convergence.
//!
//! [`DnsConvergence`] compares the nameservers the service network exposes
//! (desired, from a [`ServerIpProvider`]) with what the host resolver
//! already uses (actual) and plans the platform-specific commands that add
//! what is missing. Convergence means `desired ⊆ actual`; the planned
//! commands only ever add entries.
//!
//! Per platform:
//! - darwin: converged iff `<darwin_dir>/<domain>` exists
//! - linux: the resolver file is picked by distribution flavor; the debian
//!   drop-in needs a refresh command after edits
//! - win32: the host-only adapter of the service VM must list the
//!   management IP

mod config;
pub mod darwin;
pub mod linux;
pub mod win32;

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::context::ProvisioningContext;
use crate::error::ProvisionError;
use crate::platform::{FlavorProbe, LinuxFlavor, Platform};
use crate::privilege::touches_etc;
use crate::resolver::{NameserverSet, read_nameservers};
use crate::runner::{CommandRunner, RunOptions};

pub use config::{DnsConfig, Win32Config};

/// Source of the nameserver IPs the service network exposes.
#[async_trait]
pub trait ServerIpProvider: Send + Sync {
    async fn server_ips(&self) -> Result<Vec<String>>;
}

/// Nameservers fixed in configuration.
#[derive(Debug, Clone)]
pub struct StaticServerIps {
    ips: Vec<String>,
}

impl StaticServerIps {
    pub fn new(ips: Vec<String>) -> Self {
        Self { ips }
    }
}

#[async_trait]
impl ServerIpProvider for StaticServerIps {
    async fn server_ips(&self) -> Result<Vec<String>> {
        Ok(self.ips.clone())
    }
}

/// Nameservers printed by a command, whitespace separated.
pub struct CommandServerIps {
    runner: Arc<CommandRunner>,
    command: String,
}

impl CommandServerIps {
    pub fn new(runner: Arc<CommandRunner>, command: impl Into<String>) -> Self {
        Self {
            runner,
            command: command.into(),
        }
    }
}

#[async_trait]
impl ServerIpProvider for CommandServerIps {
    async fn server_ips(&self) -> Result<Vec<String>> {
        let output = self.runner.capture(&self.command).await?;
        Ok(parse_ip_list(&output)?)
    }
}

/// Parses one IP address, returning its canonical form.
pub fn parse_ip(value: &str) -> Result<String, ProvisionError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ProvisionError::Validation(format!("invalid nameserver IP '{}'", value)))
}

/// Parses whitespace-separated IPs, dropping duplicates but keeping order.
pub fn parse_ip_list(text: &str) -> Result<Vec<String>, ProvisionError> {
    let mut seen = HashSet::new();
    let mut ips = Vec::new();
    for token in text.split_whitespace() {
        let ip = parse_ip(token)?;
        if seen.insert(ip.clone()) {
            ips.push(ip);
        }
    }
    Ok(ips)
}

/// Quotes `value` for `sh` unless it only contains plain path characters.
pub(crate) fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':'));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Commands computed by the DNS check for the later apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsPlan {
    pub platform: Platform,
    /// Commands in execution order; empty when already converged.
    pub commands: Vec<String>,
    /// Whether the commands must run elevated.
    pub elevated: bool,
}

impl DnsPlan {
    fn new(platform: Platform, commands: Vec<String>) -> Self {
        let elevated = platform == Platform::Win32 || commands.iter().any(|c| touches_etc(c));
        Self {
            platform,
            commands,
            elevated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Desired-vs-actual resolver convergence for one run.
///
/// The actual linux resolver set and the win32 adapter name are read at
/// most once per instance; [`DnsConvergence::verify`] bypasses that memo.
pub struct DnsConvergence {
    config: DnsConfig,
    domain: String,
    flavor: FlavorProbe,
    provider: Arc<dyn ServerIpProvider>,
    runner: Arc<CommandRunner>,
    actual: OnceCell<NameserverSet>,
    adapter: OnceCell<String>,
}

impl DnsConvergence {
    pub fn new(
        config: DnsConfig,
        domain: impl Into<String>,
        flavor: FlavorProbe,
        provider: Arc<dyn ServerIpProvider>,
        runner: Arc<CommandRunner>,
    ) -> Self {
        Self {
            config,
            domain: domain.into(),
            flavor,
            provider,
            runner,
            actual: OnceCell::new(),
            adapter: OnceCell::new(),
        }
    }

    /// The resolver file authoritative on `platform`; `None` on win32.
    pub fn resolver_file(&self, platform: Platform) -> Option<Utf8PathBuf> {
        match platform {
            Platform::Darwin => Some(darwin::resolver_file(&self.config.darwin_dir, &self.domain)),
            Platform::Linux => Some(self.linux_target().0),
            Platform::Win32 => None,
        }
    }

    pub fn linux_flavor(&self) -> LinuxFlavor {
        self.flavor.flavor()
    }

    fn linux_target(&self) -> (Utf8PathBuf, Option<&str>) {
        match self.flavor.flavor() {
            LinuxFlavor::Debian => (
                self.config.linux_debian_file.clone(),
                Some(self.config.reload_command.as_str()),
            ),
            LinuxFlavor::Other => (self.config.linux_other_file.clone(), None),
        }
    }

    /// Nameservers the service network currently exposes, validated and
    /// deduplicated. Asked fresh on every call.
    pub async fn desired(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut ips = Vec::new();
        for ip in self.provider.server_ips().await? {
            let ip = parse_ip(&ip)?;
            if seen.insert(ip.clone()) {
                ips.push(ip);
            }
        }
        debug!(?ips, "desired nameservers");
        Ok(ips)
    }

    async fn actual_linux(&self) -> Result<&NameserverSet> {
        let set = self
            .actual
            .get_or_try_init(|| async {
                let (file, _) = self.linux_target();
                read_nameservers(&file).await
            })
            .await?;
        Ok(set)
    }

    async fn adapter(&self) -> Result<&str> {
        let adapter = self
            .adapter
            .get_or_try_init(|| async {
                let settings = &self.config.win32;
                let output = self
                    .runner
                    .capture(&win32::discovery_command(&settings.hypervisor, &settings.vm_name))
                    .await?;
                let adapter = win32::parse_adapter(&output, &settings.vm_name)?;
                info!(adapter = %adapter, "found host-only adapter");
                anyhow::Ok(adapter)
            })
            .await?;
        Ok(adapter.as_str())
    }

    fn management_ip(&self, desired: &[String]) -> Result<String> {
        match (&self.config.win32.management_ip, desired.first()) {
            (Some(ip), _) => Ok(parse_ip(ip)?),
            (None, Some(ip)) => Ok(ip.clone()),
            (None, None) => Err(ProvisionError::Validation(
                "no management IP configured and no nameserver IPs available".to_string(),
            )
            .into()),
        }
    }

    async fn darwin_file_exists(&self) -> Result<bool> {
        let file = darwin::resolver_file(&self.config.darwin_dir, &self.domain);
        tokio::fs::try_exists(&file)
            .await
            .map_err(|e| ProvisionError::io(format!("failed to check resolver file {}", file), e).into())
    }

    /// Returns true if the host already resolves through the service
    /// nameservers.
    pub async fn is_converged(&self, platform: Platform) -> Result<bool> {
        match platform {
            Platform::Darwin => self.darwin_file_exists().await,
            Platform::Linux => {
                let desired = self.desired().await?;
                let actual = self.actual_linux().await?;
                Ok(desired.iter().all(|ip| actual.contains(ip)))
            }
            Platform::Win32 => {
                let desired = self.desired().await?;
                let ip = self.management_ip(&desired)?;
                let adapter = self.adapter().await?;
                let current = self.runner.capture(&win32::show_command(adapter)).await?;
                Ok(win32::lists_server(&current, &ip))
            }
        }
    }

    /// Computes the commands converging `platform`; empty when converged.
    pub async fn plan_commands(&self, platform: Platform) -> Result<DnsPlan> {
        let commands = match platform {
            Platform::Darwin => {
                if self.darwin_file_exists().await? {
                    Vec::new()
                } else {
                    let desired = self.desired().await?;
                    if desired.is_empty() {
                        return Err(ProvisionError::Validation(
                            "no nameserver IPs available for the resolver file".to_string(),
                        )
                        .into());
                    }
                    let file = darwin::resolver_file(&self.config.darwin_dir, &self.domain);
                    darwin::plan(&self.config.darwin_dir, &file, &desired)
                }
            }
            Platform::Linux => {
                let desired: NameserverSet = self.desired().await?.into_iter().collect();
                let actual = self.actual_linux().await?;
                let (file, reload) = self.linux_target();
                linux::plan(&desired, actual, &file, reload)
            }
            Platform::Win32 => {
                let desired = self.desired().await?;
                let ip = self.management_ip(&desired)?;
                let adapter = self.adapter().await?;
                let current = self.runner.capture(&win32::show_command(adapter)).await?;
                if win32::lists_server(&current, &ip) {
                    Vec::new()
                } else {
                    let mut wanted = vec![ip];
                    for d in desired {
                        if !wanted.contains(&d) {
                            wanted.push(d);
                        }
                    }
                    win32::plan(adapter, &wanted, &current)
                }
            }
        };
        Ok(DnsPlan::new(platform, commands))
    }

    /// Computes the plan and stores it on the context for a later apply.
    pub async fn check(&self, platform: Platform, ctx: &mut ProvisioningContext) -> Result<()> {
        let plan = self.plan_commands(platform).await?;
        ctx.dns_is_set = plan.is_empty();
        if ctx.dns_is_set {
            info!("DNS already converged on {}", platform);
        } else {
            info!(commands = plan.commands.len(), "DNS needs converging on {}", platform);
        }
        ctx.dns_plan = Some(plan);
        Ok(())
    }

    /// Runs the plan stored by [`DnsConvergence::check`], computing one
    /// first if none exists for `platform`.
    ///
    /// A converged host is left untouched. Returns whether any command ran.
    pub async fn apply(&self, platform: Platform, ctx: &mut ProvisioningContext) -> Result<bool> {
        if ctx.dns_plan.as_ref().map(|plan| plan.platform) != Some(platform) {
            self.check(platform, ctx).await?;
        }
        let Some(plan) = ctx.dns_plan.take() else {
            return Ok(false);
        };
        if plan.is_empty() {
            debug!("nothing to apply for DNS");
            ctx.dns_is_set = true;
            return Ok(false);
        }

        let opts = RunOptions {
            elevated: plan.elevated,
            ..RunOptions::default()
        };
        self.runner.run(&plan.commands, opts).await?;

        if ctx.dry_run() {
            info!("dry run: skipping DNS verification");
        } else {
            self.verify(platform).await?;
        }
        ctx.dns_is_set = true;
        Ok(true)
    }

    /// Re-reads the host state, ignoring memoized reads, and fails if it
    /// is still not converged.
    pub async fn verify(&self, platform: Platform) -> Result<()> {
        let missing: Vec<String> = match platform {
            Platform::Darwin => {
                if self.darwin_file_exists().await? {
                    Vec::new()
                } else {
                    vec![darwin::resolver_file(&self.config.darwin_dir, &self.domain).to_string()]
                }
            }
            Platform::Linux => {
                let (file, _) = self.linux_target();
                let actual = read_nameservers(&file).await?;
                self.desired()
                    .await?
                    .into_iter()
                    .filter(|ip| !actual.contains(ip))
                    .collect()
            }
            Platform::Win32 => {
                let desired = self.desired().await?;
                let ip = self.management_ip(&desired)?;
                let adapter = self.adapter().await?;
                let current = self.runner.capture(&win32::show_command(adapter)).await?;
                if win32::lists_server(&current, &ip) {
                    Vec::new()
                } else {
                    vec![ip]
                }
            }
        };

        if missing.is_empty() {
            info!("DNS converged on {}", platform);
            Ok(())
        } else {
            Err(ProvisionError::Validation(format!(
                "DNS still not converged on {}: missing {}",
                platform,
                missing.join(", ")
            ))
            .into())
        }
    }
}
