use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use camino::Utf8PathBuf;
use svcdns::executor::{CommandExecutor, CommandSpec, ExecutionResult, RealCommandExecutor};

/// Records every spawned command and answers from canned responses.
///
/// A response applies to every command whose shell script contains its
/// pattern; the first matching pattern wins. Unmatched commands exit 0
/// with no output.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    responses: Mutex<Vec<(String, ExecutionResult)>>,
}

#[allow(dead_code)]
impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, pattern: &str, result: ExecutionResult) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), result));
    }

    /// Answers commands containing `pattern` with `stdout` lines.
    pub fn respond_stdout(&self, pattern: &str, stdout: &[&str]) {
        let mut result = ExecutionResult::exited(0);
        result.stdout = stdout.iter().map(|s| s.to_string()).collect();
        self.respond(pattern, result);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// The shell script of every call (last argument of `sh -c` / `cmd /C`).
    pub fn scripts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.args.last().cloned().unwrap_or_default())
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
        self.calls.lock().unwrap().push(spec.clone());
        let script = spec.args.last().cloned().unwrap_or_default();
        let responses = self.responses.lock().unwrap();
        let result = responses
            .iter()
            .find(|(pattern, _)| script.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| ExecutionResult::exited(0));
        Ok(result)
    }
}

/// Runs commands for real and counts them.
pub struct CountingExecutor {
    inner: RealCommandExecutor,
    scripts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl CountingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RealCommandExecutor { dry_run: false },
            scripts: Mutex::new(Vec::new()),
        })
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for CountingExecutor {
    async fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
        self.scripts
            .lock()
            .unwrap()
            .push(spec.args.last().cloned().unwrap_or_default());
        self.inner.execute(spec).await
    }
}

/// A temporary directory as a UTF-8 path; keep the guard alive.
#[allow(dead_code)]
pub fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

/// Writes `svcdns.yaml` into `dir` and returns its path.
#[allow(dead_code)]
pub fn write_config(dir: &camino::Utf8Path, yaml: &str) -> Utf8PathBuf {
    let path = dir.join("svcdns.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}
