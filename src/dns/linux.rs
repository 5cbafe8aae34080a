//! Linux resolver planning.
//!
//! Missing nameservers are appended to the resolver file, one `echo` per
//! address. When the file is a resolvconf drop-in, a single refresh command
//! follows the appends.

use camino::Utf8Path;

use super::shell_quote;
use crate::resolver::NameserverSet;

/// Returns the commands that add every address in `desired` missing from
/// `actual`, followed by `reload` once if anything was added.
///
/// Existing entries are never removed.
pub fn plan(
    desired: &NameserverSet,
    actual: &NameserverSet,
    file: &Utf8Path,
    reload: Option<&str>,
) -> Vec<String> {
    let target = shell_quote(file.as_str());
    let mut commands: Vec<String> = desired
        .difference(actual)
        .map(|ip| format!("echo \"nameserver {}\" >> {}", ip, target))
        .collect();
    if !commands.is_empty()
        && let Some(reload) = reload
    {
        commands.push(reload.to_string());
    }
    commands
}
