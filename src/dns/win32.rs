//! Windows adapter DNS.
//!
//! The service VM is reached through a hypervisor host-only adapter. Its
//! name is discovered from the hypervisor CLI, then `netsh` inspects and
//! extends the adapter's DNS server list.

use crate::error::ProvisionError;

/// Command listing the VM's host-only adapter.
pub fn discovery_command(hypervisor: &str, vm: &str) -> String {
    format!("\"{}\" showvminfo \"{}\" | findstr \"Host-only\"", hypervisor, vm)
}

/// Extracts the adapter name from hypervisor output.
///
/// The name is the text between the first and last single quote, with the
/// driver description "Ethernet Adapter" renamed to the connection name
/// Windows shows ("Network").
pub fn parse_adapter(output: &str, vm: &str) -> Result<String, ProvisionError> {
    let not_found = |reason: &str| ProvisionError::AdapterNotFound {
        vm: vm.to_string(),
        reason: reason.to_string(),
    };
    let (Some(start), Some(end)) = (output.find('\''), output.rfind('\'')) else {
        return Err(not_found("no quoted adapter name in hypervisor output"));
    };
    if end <= start {
        return Err(not_found("no quoted adapter name in hypervisor output"));
    }
    let name = output[start + 1..end].replace("Ethernet Adapter", "Network");
    let name = name.trim();
    if name.is_empty() {
        return Err(not_found("adapter name is empty"));
    }
    Ok(name.to_string())
}

pub fn show_command(adapter: &str) -> String {
    format!("netsh interface ipv4 show dnsservers \"{}\"", adapter)
}

/// Returns true if `ip` appears as a token in `netsh ... show dnsservers`
/// output.
pub fn lists_server(output: &str, ip: &str) -> bool {
    output.split_whitespace().any(|token| token == ip)
}

/// One `netsh add` per IP not already listed in `current`, keeping the
/// given order at the top of the adapter's list.
pub fn plan(adapter: &str, ips: &[String], current: &str) -> Vec<String> {
    ips.iter()
        .filter(|ip| !lists_server(current, ip))
        .enumerate()
        .map(|(i, ip)| {
            format!(
                "netsh interface ipv4 add dnsservers \"{}\" address={} index={} validate=no",
                adapter,
                ip,
                i + 1
            )
        })
        .collect()
}
