//! Run-scoped state shared by every step of one provisioning run.

use std::collections::BTreeMap;

use tracing::error;

use crate::dns::DnsPlan;
use crate::platform::Platform;

/// A step failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: String,
    pub message: String,
}

/// Mutable state passed by reference through every step of one run.
///
/// Created fresh for each run and dropped at the end; never persisted.
/// Steps communicate only through these fields: producers push admin
/// commands or images, and a single downstream checkpoint step consumes
/// them.
#[derive(Debug)]
pub struct ProvisioningContext {
    platform: Platform,
    dry_run: bool,
    /// Shell commands that need elevated execution, in queue order.
    pub admin_commands: Vec<String>,
    /// Image identifiers queued for the bulk build step.
    pub images: Vec<String>,
    /// Container names queued for the bulk prepare step.
    pub containers: Vec<String>,
    /// Whether DNS was already converged when checked.
    pub dns_is_set: bool,
    /// Commands computed by the DNS check step for the apply step.
    pub dns_plan: Option<DnsPlan>,
    status: bool,
    failures: Vec<StepFailure>,
    installed: BTreeMap<String, String>,
}

impl ProvisioningContext {
    pub fn new(platform: Platform, dry_run: bool) -> Self {
        Self {
            platform,
            dry_run,
            admin_commands: Vec::new(),
            images: Vec::new(),
            containers: Vec::new(),
            dns_is_set: false,
            dns_plan: None,
            status: true,
            failures: Vec::new(),
            installed: BTreeMap::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns false once any step has failed. There is no way back to true.
    pub fn status(&self) -> bool {
        self.status
    }

    /// Marks the run as failed and records which step failed.
    pub fn fail(&mut self, step: &str, err: &anyhow::Error) {
        error!(step = %step, "step failed: {:#}", err);
        self.status = false;
        self.failures.push(StepFailure {
            step: step.to_string(),
            message: format!("{:#}", err),
        });
    }

    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    /// Records that `feature` is now provisioned at `version`.
    ///
    /// Ignored once the run has failed; returns whether it was recorded.
    pub fn record_install(&mut self, feature: impl Into<String>, version: impl Into<String>) -> bool {
        if !self.status {
            return false;
        }
        self.installed.insert(feature.into(), version.into());
        true
    }

    /// Feature versions recorded during this run.
    pub fn installed(&self) -> &BTreeMap<String, String> {
        &self.installed
    }
}
