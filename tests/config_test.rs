mod helpers;

use anyhow::Result;
use svcdns::ProvisionError;
use svcdns::config::load_config;
use svcdns::graph::FailurePolicy;
use svcdns::platform::LinuxFlavor;
use svcdns::runner::ChainPolicy;

#[test]
fn test_load_config_basic() -> Result<()> {
    let (_guard, dir) = helpers::tempdir();
    // editorconfig-checker-disable
    let path = helpers::write_config(
        &dir,
        r#"---
dns:
  server_ips:
    - 10.13.37.100
services:
  - name: kalabox_dns
    image: kalabox/dns
"#,
    );
    // editorconfig-checker-enable

    let config = load_config(&path)?;
    config.validate()?;

    assert_eq!(config.domain, "kbox");
    assert_eq!(config.dns.server_ips, vec!["10.13.37.100"]);
    assert_eq!(config.dns.darwin_dir, "/etc/resolver");
    assert_eq!(config.dns.reload_command, "resolvconf -u");
    assert_eq!(config.services.len(), 1);
    assert!(config.services[0].startable);
    assert_eq!(config.commands.failure_policy, FailurePolicy::Continue);

    Ok(())
}

#[test]
fn test_load_config_full() -> Result<()> {
    let (_guard, dir) = helpers::tempdir();
    // editorconfig-checker-disable
    let path = helpers::write_config(
        &dir,
        r#"---
domain: dev.test
sys_conf_root: /opt/svcdns
service_images_version: 0.11.0
privilege: false
linux_flavor: other
os_release: /usr/lib/os-release
dns:
  darwin_dir: /etc/resolver
  linux_debian_file: /etc/resolvconf/resolv.conf.d/head
  linux_other_file: /etc/resolv.conf
  reload_command: resolvconf -u
  server_ips_command: engine server-ips
  win32:
    hypervisor: VBoxManage
    vm_name: Services
    management_ip: 10.13.37.100
commands:
  chain: sequential
  timeout_secs: 120
  failure_policy: abort
engine:
  ready: podman info
  build: podman pull {image}
  install: podman create --name {container} {image}
  prepare: podman rm -f {container}
services:
  - name: svc_dns
    image: example/dns
    startable: false
"#,
    );
    // editorconfig-checker-enable

    let config = load_config(&path)?;
    config.validate()?;

    assert_eq!(config.domain, "dev.test");
    assert_eq!(config.stamp_path(), "/opt/svcdns/installed.json");
    assert_eq!(config.service_images_version, "0.11.0");
    assert_eq!(config.linux_flavor, Some(LinuxFlavor::Other));
    assert_eq!(config.dns.server_ips_command.as_deref(), Some("engine server-ips"));
    assert_eq!(config.dns.win32.management_ip.as_deref(), Some("10.13.37.100"));
    assert_eq!(config.commands.chain, Some(ChainPolicy::Sequential));
    assert_eq!(config.commands.failure_policy, FailurePolicy::Abort);
    assert_eq!(config.engine.ready, "podman info");

    Ok(())
}

#[test]
fn test_load_config_missing_file_is_io_error() {
    let (_guard, dir) = helpers::tempdir();
    let err = load_config(&dir.join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ProvisionError::Io { .. }));
    assert!(err.to_string().contains("failed to load file"));
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_load_config_malformed_yaml_is_config_error() {
    let (_guard, dir) = helpers::tempdir();
    let path = helpers::write_config(&dir, "dns: [unterminated\n");
    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, ProvisionError::Config(_)));
}

#[test]
fn test_load_config_unknown_nested_key() {
    let (_guard, dir) = helpers::tempdir();
    let path = helpers::write_config(&dir, "commands:\n  retries: 3\n");
    assert!(matches!(load_config(&path), Err(ProvisionError::Config(_))));
}

#[test]
fn test_validate_requires_server_ip_source() {
    let (_guard, dir) = helpers::tempdir();
    let path = helpers::write_config(&dir, "domain: kbox\n");
    let config = load_config(&path).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(_)));
}

#[test]
fn test_validate_rejects_bad_engine_template() {
    let (_guard, dir) = helpers::tempdir();
    let path = helpers::write_config(
        &dir,
        "dns:\n  server_ips: [10.0.0.1]\nengine:\n  prepare: docker stop\n",
    );
    let config = load_config(&path).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("engine.prepare"));
}
