mod helpers;

use anyhow::Result;
use svcdns::ProvisionError;
use svcdns::executor::ExecutionResult;
use svcdns::platform::Platform;
use svcdns::privilege::PrivilegeMethod;
use svcdns::runner::{ChainPolicy, CommandRunner, RunOptions, commands_from_value};

fn cmds(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_untyped_input_is_rejected_before_spawning() -> Result<()> {
    let executor = helpers::RecordingExecutor::new();
    let runner = CommandRunner::new(executor.clone(), Platform::Linux, None);

    for value in [
        serde_json::json!("apt-get install resolvconf -y"),
        serde_json::json!({"cmd": "ls"}),
        serde_json::json!(["echo ok", ""]),
        serde_json::json!(["echo ok", null]),
    ] {
        let result = commands_from_value(&value);
        assert!(
            matches!(result, Err(ProvisionError::InvalidCommand(_))),
            "Expected InvalidCommand for {}",
            value
        );
    }

    let commands = commands_from_value(&serde_json::json!(["echo a", "echo b"]))?;
    runner.run(&commands, RunOptions::default()).await?;

    assert_eq!(executor.scripts(), vec!["echo a && echo b"]);
    Ok(())
}

#[tokio::test]
async fn test_fail_fast_batch_is_one_invocation() -> Result<()> {
    let executor = helpers::RecordingExecutor::new();
    let runner = CommandRunner::new(executor.clone(), Platform::Darwin, Some(PrivilegeMethod::Sudo));

    let outcome = runner
        .run(&cmds(&["mkdir -p /etc/resolver", "true"]), RunOptions::elevated())
        .await?;

    assert_eq!(outcome.invocations, 1);
    let calls = executor.calls();
    assert_eq!(calls[0].argv().0, "sudo");
    assert_eq!(executor.scripts(), vec!["mkdir -p /etc/resolver && true"]);
    Ok(())
}

#[tokio::test]
async fn test_sequential_stops_after_failure() {
    let executor = helpers::RecordingExecutor::new();
    executor.respond("second", ExecutionResult::exited(2));
    let runner = CommandRunner::new(executor.clone(), Platform::Linux, None)
        .with_chain(ChainPolicy::Sequential);

    let err = runner
        .run(&cmds(&["echo first", "echo second", "echo third"]), RunOptions::default())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("exit code 2"));
    assert_eq!(executor.scripts(), vec!["echo first", "echo second"]);
}

#[tokio::test]
async fn test_per_call_chain_override() -> Result<()> {
    let executor = helpers::RecordingExecutor::new();
    let runner = CommandRunner::new(executor.clone(), Platform::Linux, None);

    runner
        .run(
            &cmds(&["a", "b"]),
            RunOptions {
                chain: Some(ChainPolicy::Continue),
                ..RunOptions::default()
            },
        )
        .await?;

    assert_eq!(executor.scripts(), vec!["a ; b"]);
    Ok(())
}

#[tokio::test]
async fn test_capture_returns_stdout() -> Result<()> {
    let executor = helpers::RecordingExecutor::new();
    executor.respond_stdout("server-ips", &["10.13.37.100", "10.13.37.101"]);
    let runner = CommandRunner::new(executor.clone(), Platform::Linux, None);

    let out = runner.capture("engine server-ips").await?;

    assert_eq!(out, "10.13.37.100\n10.13.37.101");
    let calls = executor.calls();
    assert_eq!(calls[0].privilege, None);
    assert!(calls[0].read_only, "queries must run during dry runs");
    Ok(())
}
