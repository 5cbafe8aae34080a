//! Container engine seam.
//!
//! Provisioning steps only queue image and container names; the engine
//! does the actual work. [`CommandEngine`] drives any CLI engine through
//! configurable shell templates where `{image}` and `{container}` are
//! substituted (shell-quoted) per item.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dns::shell_quote;
use crate::error::ProvisionError;
use crate::runner::{CommandRunner, RunOptions};

const IMAGE: &str = "{image}";
const CONTAINER: &str = "{container}";

/// One managed background service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Container name.
    pub name: String,
    pub image: String,
    /// Whether the service is (re)started as part of an update.
    #[serde(default = "default_startable")]
    pub startable: bool,
}

fn default_startable() -> bool {
    true
}

fn default_ready() -> String {
    "docker info".to_string()
}

fn default_build() -> String {
    "docker pull {image}".to_string()
}

fn default_install() -> String {
    "docker create --name {container} {image}".to_string()
}

fn default_prepare() -> String {
    "docker rm -f {container}".to_string()
}

/// Shell templates for [`CommandEngine`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Checks that the engine is reachable.
    #[serde(default = "default_ready")]
    pub ready: String,
    /// Builds or fetches one image; uses `{image}`.
    #[serde(default = "default_build")]
    pub build: String,
    /// Installs one service; uses `{container}` and/or `{image}`.
    #[serde(default = "default_install")]
    pub install: String,
    /// Readies one container for an update; uses `{container}`.
    #[serde(default = "default_prepare")]
    pub prepare: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ready: default_ready(),
            build: default_build(),
            install: default_install(),
            prepare: default_prepare(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let require = |field: &str, template: &str, placeholders: &[&str]| {
            if placeholders.iter().any(|p| template.contains(p)) {
                Ok(())
            } else {
                Err(ProvisionError::Validation(format!(
                    "engine.{} must contain {}",
                    field,
                    placeholders.join(" or ")
                )))
            }
        };
        if self.ready.trim().is_empty() {
            return Err(ProvisionError::Validation("engine.ready must not be empty".to_string()));
        }
        require("build", &self.build, &[IMAGE])?;
        require("install", &self.install, &[CONTAINER, IMAGE])?;
        require("prepare", &self.prepare, &[CONTAINER])?;
        Ok(())
    }
}

/// Fills `{image}` and `{container}` in `template`.
pub fn render(template: &str, image: &str, container: &str) -> String {
    template
        .replace(IMAGE, &shell_quote(image))
        .replace(CONTAINER, &shell_quote(container))
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Fails if the engine cannot be reached.
    async fn ready(&self) -> Result<()>;
    async fn build(&self, images: &[String]) -> Result<()>;
    async fn install_services(&self, services: &[ServiceConfig]) -> Result<()>;
    async fn prepare(&self, containers: &[String]) -> Result<()>;
}

/// [`ContainerEngine`] backed by shell templates.
pub struct CommandEngine {
    templates: EngineConfig,
    runner: Arc<CommandRunner>,
}

impl CommandEngine {
    pub fn new(templates: EngineConfig, runner: Arc<CommandRunner>) -> Self {
        Self { templates, runner }
    }

    async fn run_each<I>(&self, what: &str, commands: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let commands: Vec<String> = commands.into_iter().collect();
        if commands.is_empty() {
            debug!("no {} to process", what);
            return Ok(());
        }
        info!("processing {} {}", commands.len(), what);
        self.runner.run(&commands, RunOptions::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for CommandEngine {
    async fn ready(&self) -> Result<()> {
        self.runner.capture(&self.templates.ready).await?;
        Ok(())
    }

    async fn build(&self, images: &[String]) -> Result<()> {
        let commands = images
            .iter()
            .map(|image| render(&self.templates.build, image, image));
        self.run_each("image(s)", commands).await
    }

    async fn install_services(&self, services: &[ServiceConfig]) -> Result<()> {
        let commands = services
            .iter()
            .map(|service| render(&self.templates.install, &service.image, &service.name));
        self.run_each("service(s)", commands).await
    }

    async fn prepare(&self, containers: &[String]) -> Result<()> {
        let commands = containers
            .iter()
            .map(|container| render(&self.templates.prepare, container, container));
        self.run_each("container(s)", commands).await
    }
}
