//! Service install and update step sets.
//!
//! Each set has host checkpoints and service steps hooked onto them.
//! Producer steps subscribe to a checkpoint, so they run right after it.
//! The consuming checkpoint depends on that same checkpoint, so every
//! producer has run by the time the consumer starts.
//!
//! Install:
//!
//! ```text
//! engine-init ─┬─ services-install-images (subscribed, queues images)
//!              ├─ image-build ── services-rebuild
//!              └─ dns-check ─┬─ services-admin (subscribed, linux)
//!                            └─ run-admin-commands
//! image-build + dns-check + run-admin-commands ── services-dns-finalize
//! ```
//!
//! Update:
//!
//! ```text
//! engine-prepared ─┬─ services-image-prepare (subscribed, queues containers)
//!                  └─ image-prepare ── services-update
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::ProvisioningContext;
use crate::dns::DnsConvergence;
use crate::engine::{ContainerEngine, ServiceConfig};
use crate::error::ProvisionError;
use crate::graph::{FailurePolicy, Step, StepGraph, StepHandler, sync_handler};
use crate::platform::{LinuxFlavor, Platform};
use crate::runner::{CommandRunner, RunOptions};
use crate::stamp::SERVICE_IMAGES_KEY;

pub const ENGINE_INIT: &str = "engine-init";
pub const IMAGE_BUILD: &str = "image-build";
pub const DNS_CHECK: &str = "dns-check";
pub const RUN_ADMIN_COMMANDS: &str = "run-admin-commands";
pub const ENGINE_PREPARED: &str = "engine-prepared";
pub const IMAGE_PREPARE: &str = "image-prepare";

pub const INSTALL_IMAGES: &str = "services-install-images";
pub const REBUILD: &str = "services-rebuild";
pub const ADMIN: &str = "services-admin";
pub const DNS_FINALIZE: &str = "services-dns-finalize";
pub const QUEUE_CONTAINERS: &str = "services-image-prepare";
pub const UPDATE: &str = "services-update";

/// Package providing `resolvconf` on debian.
pub const RESOLVCONF_INSTALL: &str = "apt-get install resolvconf -y";

/// Collaborators shared by the step handlers.
#[derive(Clone)]
pub struct ServicePlugin {
    pub engine: Arc<dyn ContainerEngine>,
    pub dns: Arc<DnsConvergence>,
    pub runner: Arc<CommandRunner>,
    pub services: Arc<Vec<ServiceConfig>>,
    pub images_version: String,
    /// The stamp lacks the current image set version.
    pub needs_images: bool,
    /// `resolvconf` is already on `PATH`.
    pub resolvconf_installed: bool,
}

impl ServicePlugin {
    /// Host checkpoints plus service steps for a fresh install.
    pub fn install_graph(&self, policy: FailurePolicy) -> Result<StepGraph, ProvisionError> {
        let mut graph = StepGraph::new().with_policy(policy);
        self.register_install_checkpoints(&mut graph)?;
        self.register_install(&mut graph)?;
        Ok(graph)
    }

    /// Host checkpoints plus service steps for an update.
    pub fn update_graph(&self, policy: FailurePolicy) -> Result<StepGraph, ProvisionError> {
        let mut graph = StepGraph::new().with_policy(policy);
        self.register_update_checkpoints(&mut graph)?;
        self.register_update(&mut graph)?;
        Ok(graph)
    }

    pub fn register_install_checkpoints(&self, graph: &mut StepGraph) -> Result<(), ProvisionError> {
        graph.register(
            Step::new(ENGINE_INIT)
                .description("Check that the container engine is reachable")
                .all(Arc::new(EngineReady(self.engine.clone()))),
        )?;
        graph.register(
            Step::new(IMAGE_BUILD)
                .description("Build queued images")
                .depends_on([ENGINE_INIT])
                .all(Arc::new(BuildImages(self.engine.clone()))),
        )?;
        graph.register(
            Step::new(DNS_CHECK)
                .description("Check host DNS against the service nameservers")
                .depends_on([ENGINE_INIT])
                .all(Arc::new(CheckDns(self.dns.clone()))),
        )?;
        graph.register(
            Step::new(RUN_ADMIN_COMMANDS)
                .description("Run queued administrative commands")
                .depends_on([DNS_CHECK])
                .all(Arc::new(RunAdminCommands(self.runner.clone()))),
        )?;
        Ok(())
    }

    pub fn register_install(&self, graph: &mut StepGraph) -> Result<(), ProvisionError> {
        if self.needs_images {
            let services = self.services.clone();
            graph.register(
                Step::new(INSTALL_IMAGES)
                    .description("Queue service images")
                    .subscribes_to(ENGINE_INIT)
                    .all(sync_handler(move |ctx| {
                        ctx.images.extend(services.iter().map(|s| s.image.clone()));
                        Ok(())
                    })),
            )?;
            graph.register(
                Step::new(REBUILD)
                    .description("Install services")
                    .depends_on([IMAGE_BUILD])
                    .all(Arc::new(RebuildServices {
                        engine: self.engine.clone(),
                        services: self.services.clone(),
                        version: self.images_version.clone(),
                    })),
            )?;
        } else {
            info!("service images are current at {}", self.images_version);
        }

        let flavor = self.dns.linux_flavor();
        let resolvconf_installed = self.resolvconf_installed;
        graph.register(
            Step::new(ADMIN)
                .description("Queue resolver tooling")
                .subscribes_to(DNS_CHECK)
                .on(
                    Platform::Linux,
                    sync_handler(move |ctx| {
                        if flavor == LinuxFlavor::Debian && !resolvconf_installed && !ctx.dns_is_set {
                            ctx.admin_commands.push(RESOLVCONF_INSTALL.to_string());
                        }
                        Ok(())
                    }),
                ),
        )?;

        graph.register(
            Step::new(DNS_FINALIZE)
                .description("Converge host DNS")
                .depends_on([IMAGE_BUILD, DNS_CHECK, RUN_ADMIN_COMMANDS])
                .all(Arc::new(FinalizeDns(self.dns.clone()))),
        )?;
        Ok(())
    }

    pub fn register_update_checkpoints(&self, graph: &mut StepGraph) -> Result<(), ProvisionError> {
        graph.register(
            Step::new(ENGINE_PREPARED)
                .description("Check that the container engine is reachable")
                .all(Arc::new(EngineReady(self.engine.clone()))),
        )?;
        graph.register(
            Step::new(IMAGE_PREPARE)
                .description("Prepare queued containers")
                .depends_on([ENGINE_PREPARED])
                .all(Arc::new(PrepareContainers(self.engine.clone()))),
        )?;
        Ok(())
    }

    pub fn register_update(&self, graph: &mut StepGraph) -> Result<(), ProvisionError> {
        let services = self.services.clone();
        graph.register(
            Step::new(QUEUE_CONTAINERS)
                .description("Queue startable service containers")
                .subscribes_to(ENGINE_PREPARED)
                .all(sync_handler(move |ctx| {
                    ctx.containers.extend(
                        services
                            .iter()
                            .filter(|s| s.startable)
                            .map(|s| s.name.clone()),
                    );
                    Ok(())
                })),
        )?;
        graph.register(
            Step::new(UPDATE)
                .description("Reinstall services")
                .depends_on([IMAGE_PREPARE])
                .all(Arc::new(RebuildServices {
                    engine: self.engine.clone(),
                    services: self.services.clone(),
                    version: self.images_version.clone(),
                })),
        )?;
        Ok(())
    }
}

struct EngineReady(Arc<dyn ContainerEngine>);

#[async_trait]
impl StepHandler for EngineReady {
    async fn run(&self, _ctx: &mut ProvisioningContext) -> Result<()> {
        self.0.ready().await
    }
}

struct BuildImages(Arc<dyn ContainerEngine>);

#[async_trait]
impl StepHandler for BuildImages {
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let images = std::mem::take(&mut ctx.images);
        self.0.build(&images).await
    }
}

struct PrepareContainers(Arc<dyn ContainerEngine>);

#[async_trait]
impl StepHandler for PrepareContainers {
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let containers = std::mem::take(&mut ctx.containers);
        self.0.prepare(&containers).await
    }
}

struct CheckDns(Arc<DnsConvergence>);

#[async_trait]
impl StepHandler for CheckDns {
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let platform = ctx.platform();
        self.0.check(platform, ctx).await
    }
}

struct FinalizeDns(Arc<DnsConvergence>);

#[async_trait]
impl StepHandler for FinalizeDns {
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let platform = ctx.platform();
        self.0.apply(platform, ctx).await?;
        Ok(())
    }
}

/// Runs every queued admin command elevated, in one batch.
struct RunAdminCommands(Arc<CommandRunner>);

#[async_trait]
impl StepHandler for RunAdminCommands {
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let commands = std::mem::take(&mut ctx.admin_commands);
        if commands.is_empty() {
            debug!("no admin commands queued");
            return Ok(());
        }
        info!("running {} admin command(s)", commands.len());
        self.0.run(&commands, RunOptions::elevated()).await?;
        Ok(())
    }
}

struct RebuildServices {
    engine: Arc<dyn ContainerEngine>,
    services: Arc<Vec<ServiceConfig>>,
    version: String,
}

#[async_trait]
impl StepHandler for RebuildServices {
    async fn run(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        self.engine.install_services(&self.services).await?;
        if ctx.record_install(SERVICE_IMAGES_KEY, self.version.clone()) {
            debug!(version = %self.version, "recorded service image version");
        } else {
            warn!("earlier failures; not recording service image version");
        }
        Ok(())
    }
}
