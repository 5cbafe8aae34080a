//! Privilege elevation configuration.
//!
//! Commands that mutate `/etc` on darwin/linux, and every DNS command on
//! win32, run through an elevation wrapper (`sudo`, `doas` or `gsudo`).
//! The configured [`Privilege`] setting resolves to a concrete
//! [`PrivilegeMethod`] per platform.

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Privilege elevation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeMethod {
    /// Use `sudo` for privilege elevation.
    Sudo,
    /// Use `doas` for privilege elevation.
    Doas,
    /// Use `gsudo` (Windows) for privilege elevation.
    Gsudo,
}

impl PrivilegeMethod {
    /// Returns the command name for this privilege method.
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Sudo => "sudo",
            Self::Doas => "doas",
            Self::Gsudo => "gsudo",
        }
    }

    /// Returns the elevation method used when none is configured.
    pub fn default_for(platform: Platform) -> Self {
        match platform {
            Platform::Darwin | Platform::Linux => Self::Sudo,
            Platform::Win32 => Self::Gsudo,
        }
    }
}

impl std::fmt::Display for PrivilegeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command_name())
    }
}

/// Privilege elevation setting from the configuration file.
///
/// Supported YAML representations:
/// - absent or `privilege: true` → `Inherit` (platform default method)
/// - `privilege: false` → `Disabled` (commands run unwrapped, e.g. already root)
/// - `privilege: { method: doas }` → `Method(Doas)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Privilege {
    #[default]
    Inherit,
    Disabled,
    Method(PrivilegeMethod),
}

impl Privilege {
    /// Resolves the setting for `platform`.
    ///
    /// Returns `None` when elevation is disabled.
    pub fn resolve(&self, platform: Platform) -> Option<PrivilegeMethod> {
        match self {
            Self::Inherit => Some(PrivilegeMethod::default_for(platform)),
            Self::Disabled => None,
            Self::Method(method) => Some(*method),
        }
    }
}

impl<'de> Deserialize<'de> for Privilege {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de;

        struct PrivilegeVisitor;

        impl<'de> de::Visitor<'de> for PrivilegeVisitor {
            type Value = Privilege;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a boolean or a map with a 'method' field")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Privilege::Inherit)
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if v {
                    Ok(Privilege::Inherit)
                } else {
                    Ok(Privilege::Disabled)
                }
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                #[derive(Deserialize)]
                #[serde(deny_unknown_fields)]
                struct PrivilegeMap {
                    method: PrivilegeMethod,
                }
                let pm = PrivilegeMap::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(Privilege::Method(pm.method))
            }
        }

        deserializer.deserialize_any(PrivilegeVisitor)
    }
}

/// Returns true if a shell command writes below `/etc` and therefore needs
/// elevation on darwin/linux.
pub fn touches_etc(command: &str) -> bool {
    command
        .split_whitespace()
        .map(|token| token.trim_matches(|c| c == '\'' || c == '"'))
        .any(|token| token == "/etc" || token.starts_with("/etc/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_method_command_name() {
        assert_eq!(PrivilegeMethod::Sudo.command_name(), "sudo");
        assert_eq!(PrivilegeMethod::Doas.command_name(), "doas");
        assert_eq!(PrivilegeMethod::Gsudo.to_string(), "gsudo");
    }

    #[test]
    fn default_method_per_platform() {
        assert_eq!(PrivilegeMethod::default_for(Platform::Linux), PrivilegeMethod::Sudo);
        assert_eq!(PrivilegeMethod::default_for(Platform::Darwin), PrivilegeMethod::Sudo);
        assert_eq!(PrivilegeMethod::default_for(Platform::Win32), PrivilegeMethod::Gsudo);
    }

    #[test]
    fn privilege_deserialize_variants() {
        let p: Privilege = serde_yaml::from_str("true").unwrap();
        assert_eq!(p, Privilege::Inherit);
        let p: Privilege = serde_yaml::from_str("false").unwrap();
        assert_eq!(p, Privilege::Disabled);
        let p: Privilege = serde_yaml::from_str("method: doas").unwrap();
        assert_eq!(p, Privilege::Method(PrivilegeMethod::Doas));
        let p: Privilege = serde_yaml::from_str("~").unwrap();
        assert_eq!(p, Privilege::Inherit);
    }

    #[test]
    fn privilege_rejects_unknown_method_and_fields() {
        assert!(serde_yaml::from_str::<Privilege>("method: pkexec").is_err());
        assert!(serde_yaml::from_str::<Privilege>("method: sudo\nextra: 1").is_err());
        assert!(serde_yaml::from_str::<Privilege>("42").is_err());
    }

    #[test]
    fn resolve_per_platform() {
        assert_eq!(Privilege::Inherit.resolve(Platform::Win32), Some(PrivilegeMethod::Gsudo));
        assert_eq!(Privilege::Disabled.resolve(Platform::Linux), None);
        assert_eq!(
            Privilege::Method(PrivilegeMethod::Doas).resolve(Platform::Linux),
            Some(PrivilegeMethod::Doas)
        );
    }

    #[test]
    fn touches_etc_detects_paths() {
        assert!(touches_etc("echo \"nameserver 10.0.0.1\" >> /etc/resolv.conf"));
        assert!(touches_etc("mkdir -p '/etc/resolver'"));
        assert!(touches_etc("resolvconf -u /etc"));
        assert!(!touches_etc("docker ps"));
        assert!(!touches_etc("cat /etcetera/file"));
    }
}
