//! macOS per-domain resolver files.
//!
//! macOS consults `/etc/resolver/<domain>` for lookups under `<domain>`.
//! The file either exists (converged) or is written in one command.

use camino::{Utf8Path, Utf8PathBuf};

use super::shell_quote;

pub fn resolver_file(dir: &Utf8Path, domain: &str) -> Utf8PathBuf {
    dir.join(domain)
}

/// Single command creating `dir` and writing one `nameserver` line per IP
/// into `file`.
pub fn plan(dir: &Utf8Path, file: &Utf8Path, ips: &[String]) -> Vec<String> {
    let args: Vec<String> = ips.iter().map(|ip| shell_quote(ip)).collect();
    vec![format!(
        "mkdir -p {} && printf 'nameserver %s\\n' {} > {}",
        shell_quote(dir.as_str()),
        args.join(" "),
        shell_quote(file.as_str())
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_file_is_named_after_domain() {
        assert_eq!(
            resolver_file(Utf8Path::new("/etc/resolver"), "kbox"),
            Utf8PathBuf::from("/etc/resolver/kbox")
        );
    }

    #[test]
    fn plan_writes_every_ip_in_one_command() {
        let commands = plan(
            Utf8Path::new("/etc/resolver"),
            Utf8Path::new("/etc/resolver/kbox"),
            &["10.13.37.1".to_string(), "10.13.37.2".to_string()],
        );
        assert_eq!(
            commands,
            vec![
                "mkdir -p /etc/resolver && printf 'nameserver %s\\n' 10.13.37.1 10.13.37.2 > /etc/resolver/kbox"
            ]
        );
    }
}
