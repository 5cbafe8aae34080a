//! Resolver configuration reader.
//!
//! Parses `resolv.conf`-style files (`/etc/resolv.conf`, the resolvconf
//! `head` drop-in, `/etc/resolver/<domain>`) into the set of configured
//! nameserver addresses.

use std::collections::BTreeSet;
use std::io;

use camino::Utf8Path;

use crate::error::ProvisionError;

/// Nameserver addresses as written in a resolver file.
pub type NameserverSet = BTreeSet<String>;

fn strip_quotes(token: &str) -> &str {
    token.trim_matches(|c| c == '"' || c == '\'')
}

/// Extracts nameserver entries from resolver file content.
///
/// Blank lines and `#` comments are ignored. A line counts only when its
/// first token is exactly `nameserver` (quotes stripped); its second token,
/// quotes stripped, is the address.
pub fn parse_nameservers(content: &str) -> NameserverSet {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let keyword = strip_quotes(tokens.next()?);
            if keyword != "nameserver" {
                return None;
            }
            let address = strip_quotes(tokens.next()?).trim();
            (!address.is_empty()).then(|| address.to_string())
        })
        .collect()
}

/// Reads a resolver file and returns its nameservers.
///
/// A missing file yields an empty set; every other read failure is an
/// [`ProvisionError::Io`] naming the file.
pub async fn read_nameservers(path: &Utf8Path) -> Result<NameserverSet, ProvisionError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let servers = parse_nameservers(&content);
            tracing::debug!(path = %path, count = servers.len(), "read resolver file");
            Ok(servers)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path, "resolver file does not exist");
            Ok(NameserverSet::new())
        }
        Err(e) => Err(ProvisionError::io(format!("failed to read resolver file {}", path), e)),
    }
}
