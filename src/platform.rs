//! Platform tags and Linux distribution flavor detection.
//!
//! Step handlers are registered per [`Platform`] or for every platform via
//! [`PlatformTag::All`]. The Linux flavor decides which resolver file is
//! authoritative; it is probed at most once per [`FlavorProbe`].

use std::fs;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::ProvisionError;

/// Operating system a provisioning run targets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Darwin,
    Linux,
    Win32,
}

impl Platform {
    /// Returns the platform the binary was compiled for.
    pub fn current() -> Result<Self, ProvisionError> {
        Self::from_os(std::env::consts::OS)
    }

    /// Maps a Rust `target_os` string onto a platform tag.
    pub fn from_os(os: &str) -> Result<Self, ProvisionError> {
        match os {
            "macos" => Ok(Self::Darwin),
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Win32),
            other => Err(ProvisionError::Validation(format!(
                "unsupported operating system: {}",
                other
            ))),
        }
    }
}

/// Key under which a step handler is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformTag {
    /// Runs on every platform unless a platform-specific handler exists.
    All,
    Only(Platform),
}

impl std::fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(platform) => f.write_str(platform.as_ref()),
        }
    }
}

impl From<Platform> for PlatformTag {
    fn from(platform: Platform) -> Self {
        Self::Only(platform)
    }
}

/// Linux distribution family, as far as resolver configuration cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinuxFlavor {
    /// Debian and derivatives; resolver entries go through `resolvconf`.
    Debian,
    /// Anything else; `/etc/resolv.conf` is edited directly.
    Other,
}

impl LinuxFlavor {
    /// Classifies an `os-release` file body.
    ///
    /// `ID=debian` or any `ID_LIKE` list containing `debian` selects
    /// [`LinuxFlavor::Debian`].
    pub fn from_os_release(content: &str) -> Self {
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "ID" if value == "debian" => return Self::Debian,
                "ID_LIKE" if value.split_whitespace().any(|v| v == "debian") => {
                    return Self::Debian;
                }
                _ => {}
            }
        }
        Self::Other
    }
}

/// Memoized Linux flavor probe.
///
/// The probe reads `os_release` on first use only; later calls return the
/// cached answer. A configured override skips the file entirely.
#[derive(Debug)]
pub struct FlavorProbe {
    os_release: Utf8PathBuf,
    forced: Option<LinuxFlavor>,
    cached: OnceLock<LinuxFlavor>,
}

impl FlavorProbe {
    pub fn new(os_release: impl Into<Utf8PathBuf>, forced: Option<LinuxFlavor>) -> Self {
        Self {
            os_release: os_release.into(),
            forced,
            cached: OnceLock::new(),
        }
    }

    /// Creates a probe that always answers `flavor`.
    pub fn fixed(flavor: LinuxFlavor) -> Self {
        Self::new("/etc/os-release", Some(flavor))
    }

    /// Returns the flavor, probing the filesystem at most once.
    pub fn flavor(&self) -> LinuxFlavor {
        if let Some(forced) = self.forced {
            return forced;
        }
        *self.cached.get_or_init(|| probe(&self.os_release))
    }
}

fn probe(path: &Utf8Path) -> LinuxFlavor {
    match fs::read_to_string(path) {
        Ok(content) => {
            let flavor = LinuxFlavor::from_os_release(&content);
            tracing::debug!(path = %path, %flavor, "probed linux flavor");
            flavor
        }
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "os-release unreadable, assuming generic linux");
            LinuxFlavor::Other
        }
    }
}
