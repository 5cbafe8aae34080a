mod helpers;

use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;
use svcdns::context::ProvisioningContext;
use svcdns::dns::{DnsConfig, DnsConvergence, StaticServerIps};
use svcdns::executor::{CommandExecutor, ExecutionResult, RealCommandExecutor};
use svcdns::graph::{Step, StepGraph, StepHandler, sync_handler};
use svcdns::platform::{FlavorProbe, LinuxFlavor, Platform};
use svcdns::runner::CommandRunner;
use svcdns::services::RESOLVCONF_INSTALL;
use svcdns::stamp::{InstallStamp, SERVICE_IMAGES_KEY};
use svcdns::{Session, cli, config, run_install, run_plan, run_update, run_validate};

const SERVER_IP: &str = "10.13.37.100";

/// Linux config with elevation disabled and every path inside `dir`.
fn linux_config(dir: &Utf8Path, flavor: &str, services: &str) -> String {
    format!(
        "sys_conf_root: {dir}/state\n\
         privilege: false\n\
         linux_flavor: {flavor}\n\
         dns:\n  \
           linux_other_file: {dir}/resolv.conf\n  \
           linux_debian_file: {dir}/head\n  \
           server_ips: [{ip}]\n\
         {services}",
        dir = dir,
        flavor = flavor,
        ip = SERVER_IP,
        services = services,
    )
}

const TWO_SERVICES: &str = "services:\n  - name: svc_dns\n    image: example/dns\n  - name: svc_data\n    image: example/data\n    startable: false\n";

fn run_args(file: &Utf8Path, dry_run: bool) -> cli::RunArgs {
    cli::RunArgs {
        file: file.to_owned(),
        log_level: cli::LogLevel::Error,
        dry_run,
        platform: Some(Platform::Linux),
    }
}

fn converged_resolv_conf(dir: &Utf8Path) {
    std::fs::write(dir.join("resolv.conf"), format!("nameserver {}\n", SERVER_IP)).unwrap();
}

struct CheckDns(Arc<DnsConvergence>);

#[async_trait]
impl StepHandler for CheckDns {
    async fn run(&self, ctx: &mut ProvisioningContext) -> anyhow::Result<()> {
        self.0.check(Platform::Linux, ctx).await
    }
}

struct ConvergeDns(Arc<DnsConvergence>);

#[async_trait]
impl StepHandler for ConvergeDns {
    async fn run(&self, ctx: &mut ProvisioningContext) -> anyhow::Result<()> {
        self.0.apply(Platform::Linux, ctx).await?;
        Ok(())
    }
}

fn dns_for(file: &Utf8Path, executor: Arc<dyn CommandExecutor>) -> Arc<DnsConvergence> {
    let runner = Arc::new(CommandRunner::new(executor, Platform::Linux, None));
    let config = DnsConfig {
        linux_other_file: file.to_owned(),
        server_ips: vec![SERVER_IP.to_string()],
        ..DnsConfig::default()
    };
    Arc::new(DnsConvergence::new(
        config,
        "kbox",
        FlavorProbe::fixed(LinuxFlavor::Other),
        Arc::new(StaticServerIps::new(vec![SERVER_IP.to_string()])),
        runner,
    ))
}

fn convergence_graph(dns: Arc<DnsConvergence>) -> StepGraph {
    let mut graph = StepGraph::new();
    graph
        .register(Step::new("check-dns").all(Arc::new(CheckDns(dns.clone()))))
        .unwrap();
    graph
        .register(
            Step::new("converge-dns")
                .depends_on(["check-dns"])
                .all(Arc::new(ConvergeDns(dns))),
        )
        .unwrap();
    graph
        .register(
            Step::new("install-images")
                .subscribes_to("converge-dns")
                .all(sync_handler(|ctx| {
                    ctx.images.push("example/dns".to_string());
                    Ok(())
                })),
        )
        .unwrap();
    graph
}

// =============================================================================
// DNS convergence end to end
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn dns_converges_once_and_is_idempotent() {
    let (_guard, dir) = helpers::tempdir();
    let resolv = dir.join("resolv.conf");
    std::fs::write(&resolv, "nameserver 192.168.1.1\n").unwrap();

    let executor = helpers::CountingExecutor::new();
    let graph = convergence_graph(dns_for(&resolv, executor.clone()));
    let mut ctx = ProvisioningContext::new(Platform::Linux, false);
    let summary = graph.run(&mut ctx).await.unwrap();

    assert!(summary.success, "failures: {:?}", summary.failures);
    assert_eq!(summary.executed, vec!["check-dns", "converge-dns", "install-images"]);
    assert_eq!(executor.scripts().len(), 1);
    assert!(ctx.dns_is_set);
    let content = std::fs::read_to_string(&resolv).unwrap();
    assert!(content.contains("nameserver 192.168.1.1"));
    assert!(content.contains(&format!("nameserver {}", SERVER_IP)));

    // A fresh convergence reads the converged file and issues nothing.
    let second = helpers::CountingExecutor::new();
    let graph = convergence_graph(dns_for(&resolv, second.clone()));
    let mut ctx = ProvisioningContext::new(Platform::Linux, false);
    let summary = graph.run(&mut ctx).await.unwrap();

    assert!(summary.success);
    assert!(second.scripts().is_empty(), "unexpected: {:?}", second.scripts());
    assert!(ctx.dns_is_set);
    assert_eq!(std::fs::read_to_string(&resolv).unwrap(), content);
}

#[cfg(unix)]
#[tokio::test]
async fn dry_run_plans_from_server_ips_command_output() {
    let (_guard, dir) = helpers::tempdir();
    std::fs::write(dir.join("resolv.conf"), "nameserver 192.168.1.1\n").unwrap();
    let yaml = format!(
        "sys_conf_root: {dir}/state\n\
         privilege: false\n\
         linux_flavor: other\n\
         dns:\n  \
           linux_other_file: {dir}/resolv.conf\n  \
           server_ips_command: \"echo {ip}\"\n",
        dir = dir,
        ip = SERVER_IP,
    );
    let file = helpers::write_config(&dir, &yaml);
    let config = config::load_config(&file).unwrap();

    let executor = Arc::new(RealCommandExecutor { dry_run: true });
    let session = Session::new(&config, Platform::Linux, executor, true).unwrap();
    let dns = &session.plugin().dns;

    assert!(!dns.is_converged(Platform::Linux).await.unwrap());
    let plan = dns.plan_commands(Platform::Linux).await.unwrap();
    assert_eq!(plan.commands.len(), 1, "commands: {:?}", plan.commands);
    assert!(plan.commands[0].contains(&format!("nameserver {}", SERVER_IP)));
    assert!(plan.commands[0].contains(dir.join("resolv.conf").as_str()));
}

// =============================================================================
// Install sessions
// =============================================================================

#[tokio::test]
async fn install_writes_stamp_and_skips_images_next_time() {
    let (_guard, dir) = helpers::tempdir();
    converged_resolv_conf(&dir);
    let file = helpers::write_config(&dir, &linux_config(&dir, "other", TWO_SERVICES));

    let executor = helpers::RecordingExecutor::new();
    let summary = run_install(&run_args(&file, false), executor.clone())
        .await
        .unwrap();

    assert!(summary.success, "failures: {:?}", summary.failures);
    assert_eq!(
        executor.scripts(),
        vec![
            "docker info".to_string(),
            "docker pull example/dns && docker pull example/data".to_string(),
            "docker create --name svc_dns example/dns && docker create --name svc_data example/data"
                .to_string(),
        ]
    );
    let stamp = InstallStamp::load_from_root(&dir.join("state")).unwrap();
    assert_eq!(stamp.get(SERVICE_IMAGES_KEY), Some(config::SERVICE_IMAGES_VERSION));

    executor.clear();
    let summary = run_install(&run_args(&file, false), executor.clone())
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(executor.scripts(), vec!["docker info"]);
}

#[tokio::test]
async fn install_failure_leaves_stamp_untouched() {
    let (_guard, dir) = helpers::tempdir();
    converged_resolv_conf(&dir);
    let file = helpers::write_config(&dir, &linux_config(&dir, "other", TWO_SERVICES));

    let executor = helpers::RecordingExecutor::new();
    let mut failed = ExecutionResult::exited(1);
    failed.stderr.push("pull access denied".to_string());
    executor.respond("docker pull", failed);

    let summary = run_install(&run_args(&file, false), executor.clone())
        .await
        .unwrap();

    assert!(!summary.success);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].step, "image-build");
    assert!(summary.failures[0].message.contains("pull access denied"));
    // Continue policy: later steps still ran.
    assert!(summary.executed.contains(&"services-dns-finalize".to_string()));
    assert!(!dir.join("state").join("installed.json").exists());
}

#[tokio::test]
async fn install_abort_policy_stops_after_failure() {
    let (_guard, dir) = helpers::tempdir();
    converged_resolv_conf(&dir);
    let yaml = format!(
        "{}commands:\n  failure_policy: abort\n",
        linux_config(&dir, "other", TWO_SERVICES)
    );
    let file = helpers::write_config(&dir, &yaml);

    let executor = helpers::RecordingExecutor::new();
    executor.respond("docker info", ExecutionResult::exited(1));

    let summary = run_install(&run_args(&file, false), executor.clone())
        .await
        .unwrap();

    assert!(!summary.success);
    assert_eq!(summary.failures[0].step, "engine-init");
    assert!(summary.executed.is_empty());
    assert!(summary.not_run.contains(&"services-dns-finalize".to_string()));
    assert_eq!(executor.scripts(), vec!["docker info"]);
}

#[tokio::test]
async fn debian_dry_run_installs_resolvconf_before_dns_and_reloads_last() {
    let (_guard, dir) = helpers::tempdir();
    let file = helpers::write_config(&dir, &linux_config(&dir, "debian", ""));
    let config = config::load_config(&file).unwrap();
    config.validate().unwrap();

    let executor = helpers::RecordingExecutor::new();
    let mut session = Session::new(&config, Platform::Linux, executor.clone(), true).unwrap();
    session.plugin_mut().resolvconf_installed = false;
    let graph = session.install_graph().unwrap();
    let summary = session.run(&graph).await.unwrap();

    assert!(summary.success, "failures: {:?}", summary.failures);
    let scripts = executor.scripts();
    assert_eq!(scripts.len(), 3, "scripts: {:?}", scripts);
    assert_eq!(scripts[0], "docker info");
    assert_eq!(scripts[1], RESOLVCONF_INSTALL);
    assert_eq!(
        scripts[2],
        format!(
            "echo \"nameserver {}\" >> {}/head && resolvconf -u",
            SERVER_IP, dir
        )
    );
    assert!(!dir.join("state").join("installed.json").exists());
}

#[tokio::test]
async fn debian_with_resolvconf_present_queues_no_admin_command() {
    let (_guard, dir) = helpers::tempdir();
    let file = helpers::write_config(&dir, &linux_config(&dir, "debian", ""));
    let config = config::load_config(&file).unwrap();

    let executor = helpers::RecordingExecutor::new();
    let mut session = Session::new(&config, Platform::Linux, executor.clone(), true).unwrap();
    session.plugin_mut().resolvconf_installed = true;
    let graph = session.install_graph().unwrap();
    session.run(&graph).await.unwrap();

    assert!(!executor.scripts().iter().any(|s| s == RESOLVCONF_INSTALL));
}

#[tokio::test]
async fn debian_failed_pull_still_installs_resolvconf() {
    let (_guard, dir) = helpers::tempdir();
    let file = helpers::write_config(&dir, &linux_config(&dir, "debian", TWO_SERVICES));
    let config = config::load_config(&file).unwrap();

    let executor = helpers::RecordingExecutor::new();
    executor.respond("docker pull", ExecutionResult::exited(1));
    let mut session = Session::new(&config, Platform::Linux, executor.clone(), false).unwrap();
    session.plugin_mut().resolvconf_installed = false;
    let graph = session.install_graph().unwrap();
    let summary = session.run(&graph).await.unwrap();

    assert!(!summary.success);
    assert!(summary.failures.iter().any(|f| f.step == "image-build"));
    assert!(summary.executed.contains(&"run-admin-commands".to_string()));
    let scripts = executor.scripts();
    let pull = scripts.iter().position(|s| s.starts_with("docker pull"));
    let resolvconf = scripts.iter().position(|s| s == RESOLVCONF_INSTALL);
    assert!(
        matches!((pull, resolvconf), (Some(p), Some(r)) if p < r),
        "scripts: {:?}",
        scripts
    );
    assert!(!dir.join("state").join("installed.json").exists());
}

// =============================================================================
// Update, plan and validate
// =============================================================================

#[tokio::test]
async fn update_prepares_startable_containers_then_reinstalls() {
    let (_guard, dir) = helpers::tempdir();
    let file = helpers::write_config(&dir, &linux_config(&dir, "other", TWO_SERVICES));

    let executor = helpers::RecordingExecutor::new();
    let summary = run_update(&run_args(&file, false), executor.clone())
        .await
        .unwrap();

    assert!(summary.success, "failures: {:?}", summary.failures);
    assert_eq!(
        summary.executed,
        vec![
            "engine-prepared",
            "services-image-prepare",
            "image-prepare",
            "services-update"
        ]
    );
    assert_eq!(
        executor.scripts(),
        vec![
            "docker info".to_string(),
            "docker rm -f svc_dns".to_string(),
            "docker create --name svc_dns example/dns && docker create --name svc_data example/data"
                .to_string(),
        ]
    );
    let stamp = InstallStamp::load_from_root(&dir.join("state")).unwrap();
    assert_eq!(stamp.get(SERVICE_IMAGES_KEY), Some(config::SERVICE_IMAGES_VERSION));
}

#[test]
fn plan_lists_install_order() {
    let (_guard, dir) = helpers::tempdir();
    let file = helpers::write_config(&dir, &linux_config(&dir, "other", TWO_SERVICES));

    let order = run_plan(&cli::PlanArgs {
        graph: cli::GraphKind::Install,
        file: file.clone(),
        log_level: cli::LogLevel::Error,
        platform: Some(Platform::Linux),
    })
    .unwrap();

    assert_eq!(
        order,
        vec![
            "engine-init",
            "services-install-images",
            "image-build",
            "dns-check",
            "services-admin",
            "run-admin-commands",
            "services-rebuild",
            "services-dns-finalize",
        ]
    );
}

#[test]
fn plan_omits_image_steps_when_stamp_is_current() {
    let (_guard, dir) = helpers::tempdir();
    let file = helpers::write_config(&dir, &linux_config(&dir, "other", TWO_SERVICES));
    let mut stamp = InstallStamp::load_from_root(&dir.join("state")).unwrap();
    stamp.record(SERVICE_IMAGES_KEY, config::SERVICE_IMAGES_VERSION);
    stamp.save().unwrap();

    let order = run_plan(&cli::PlanArgs {
        graph: cli::GraphKind::Install,
        file,
        log_level: cli::LogLevel::Error,
        platform: Some(Platform::Linux),
    })
    .unwrap();

    assert!(!order.iter().any(|name| name == "services-install-images"));
    assert!(!order.iter().any(|name| name == "services-rebuild"));
    assert_eq!(order.first().map(String::as_str), Some("engine-init"));
    assert_eq!(order.last().map(String::as_str), Some("services-dns-finalize"));
}

#[test]
fn run_validate_accepts_valid_and_rejects_invalid() {
    let (_guard, dir) = helpers::tempdir();
    let file = helpers::write_config(&dir, &linux_config(&dir, "other", TWO_SERVICES));
    run_validate(&cli::ValidateArgs {
        file,
        log_level: cli::LogLevel::Error,
    })
    .expect("valid configuration");

    let file = helpers::write_config(&dir, "domain: Not A Domain\ndns:\n  server_ips: [10.0.0.1]\n");
    let err = run_validate(&cli::ValidateArgs {
        file,
        log_level: cli::LogLevel::Error,
    })
    .unwrap_err();
    assert!(format!("{:#}", err).contains("not a valid DNS name"));
}
