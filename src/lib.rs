pub mod cli;
pub mod config;
pub mod context;
pub mod dns;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod platform;
pub mod privilege;
pub mod resolver;
pub mod runner;
pub mod services;
pub mod stamp;

pub use error::ProvisionError;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::config::Config;
use crate::context::ProvisioningContext;
use crate::dns::{CommandServerIps, DnsConvergence, ServerIpProvider, StaticServerIps};
use crate::engine::{CommandEngine, ContainerEngine};
use crate::executor::{CommandExecutor, RealCommandExecutor};
use crate::graph::{FailurePolicy, RunSummary, StepGraph};
use crate::platform::{FlavorProbe, Platform};
use crate::runner::CommandRunner;
use crate::services::ServicePlugin;
use crate::stamp::{InstallStamp, SERVICE_IMAGES_KEY};

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// One provisioning session: collaborators wired from configuration plus
/// the install stamp read at startup.
pub struct Session {
    platform: Platform,
    dry_run: bool,
    policy: FailurePolicy,
    plugin: ServicePlugin,
    stamp: InstallStamp,
}

impl Session {
    pub fn new(
        config: &Config,
        platform: Platform,
        executor: Arc<dyn CommandExecutor>,
        dry_run: bool,
    ) -> Result<Self> {
        let mut runner = CommandRunner::new(executor, platform, config.privilege.resolve(platform))
            .with_timeout(config.commands.timeout());
        if let Some(chain) = config.commands.chain {
            runner = runner.with_chain(chain);
        }
        let runner = Arc::new(runner);

        let provider: Arc<dyn ServerIpProvider> = match &config.dns.server_ips_command {
            Some(command) => Arc::new(CommandServerIps::new(runner.clone(), command.clone())),
            None => Arc::new(StaticServerIps::new(config.dns.server_ips.clone())),
        };
        let dns = Arc::new(DnsConvergence::new(
            config.dns.clone(),
            config.domain.clone(),
            FlavorProbe::new(config.os_release.clone(), config.linux_flavor),
            provider,
            runner.clone(),
        ));
        let engine: Arc<dyn ContainerEngine> =
            Arc::new(CommandEngine::new(config.engine.clone(), runner.clone()));

        let stamp = InstallStamp::load(config.stamp_path()).context("failed to load install stamp")?;
        let needs_images = stamp.needs(SERVICE_IMAGES_KEY, &config.service_images_version);

        let plugin = ServicePlugin {
            engine,
            dns,
            runner,
            services: Arc::new(config.services.clone()),
            images_version: config.service_images_version.clone(),
            needs_images,
            resolvconf_installed: which::which("resolvconf").is_ok(),
        };

        Ok(Self {
            platform,
            dry_run,
            policy: config.commands.failure_policy,
            plugin,
            stamp,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn plugin(&self) -> &ServicePlugin {
        &self.plugin
    }

    /// Gives access to the wired collaborators, e.g. to swap the engine.
    pub fn plugin_mut(&mut self) -> &mut ServicePlugin {
        &mut self.plugin
    }

    pub fn stamp(&self) -> &InstallStamp {
        &self.stamp
    }

    pub fn install_graph(&self) -> Result<StepGraph, ProvisionError> {
        self.plugin.install_graph(self.policy)
    }

    pub fn update_graph(&self) -> Result<StepGraph, ProvisionError> {
        self.plugin.update_graph(self.policy)
    }

    /// Runs `graph` against a fresh context.
    ///
    /// Versions recorded by the steps are written to the install stamp only
    /// when the whole run succeeded and this is not a dry run.
    pub async fn run(&mut self, graph: &StepGraph) -> Result<RunSummary> {
        let mut ctx = ProvisioningContext::new(self.platform, self.dry_run);
        let summary = graph.run(&mut ctx).await?;

        if !summary.success {
            for failure in &summary.failures {
                error!(step = %failure.step, "{}", failure.message);
            }
            return Ok(summary);
        }

        if ctx.installed().is_empty() {
            return Ok(summary);
        }
        if self.dry_run {
            info!("dry run: install stamp not updated");
        } else {
            self.stamp.merge(ctx.installed());
            self.stamp.save().context("failed to save install stamp")?;
        }
        Ok(summary)
    }
}

fn load_validated(path: &camino::Utf8Path) -> Result<Config> {
    let config = config::load_config(path)
        .with_context(|| format!("failed to load configuration from {}", path))?;
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

fn target_platform(requested: Option<Platform>) -> Result<Platform> {
    match requested {
        Some(platform) => Ok(platform),
        None => Ok(Platform::current()?),
    }
}

pub async fn run_install(
    opts: &cli::RunArgs,
    executor: Arc<dyn CommandExecutor>,
) -> Result<RunSummary> {
    let config = load_validated(&opts.file)?;
    let platform = target_platform(opts.platform)?;
    let mut session = Session::new(&config, platform, executor, opts.dry_run)?;
    let graph = session
        .install_graph()
        .context("failed to build install steps")?;
    info!("installing on {}", platform);
    session.run(&graph).await
}

pub async fn run_update(
    opts: &cli::RunArgs,
    executor: Arc<dyn CommandExecutor>,
) -> Result<RunSummary> {
    let config = load_validated(&opts.file)?;
    let platform = target_platform(opts.platform)?;
    let mut session = Session::new(&config, platform, executor, opts.dry_run)?;
    let graph = session
        .update_graph()
        .context("failed to build update steps")?;
    info!("updating on {}", platform);
    session.run(&graph).await
}

/// Resolves a step set and returns the step names in execution order.
pub fn run_plan(opts: &cli::PlanArgs) -> Result<Vec<String>> {
    let config = load_validated(&opts.file)?;
    let platform = target_platform(opts.platform)?;
    let executor: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor { dry_run: true });
    let session = Session::new(&config, platform, executor, true)?;
    let graph = match opts.graph {
        cli::GraphKind::Install => session.install_graph()?,
        cli::GraphKind::Update => session.update_graph()?,
    };
    Ok(graph.plan()?)
}

pub fn run_validate(opts: &cli::ValidateArgs) -> Result<()> {
    let config = load_validated(&opts.file)?;
    info!("validation successful:\n{:#?}", config);
    Ok(())
}
