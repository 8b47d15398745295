use crate::cluster::AgentHandle;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout};

pub const DEFAULT_RETRY_EXIT_CODE: i32 = 126;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(200);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    /// Combined output trimmed for inclusion in error messages.
    pub fn pretty(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (false, false) => format!("{stdout}\n{stderr}"),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (true, true) => format!("exit code {}", self.exit_code),
        }
    }

    /// Turns an unsuccessful run into a transient error carrying `what`.
    pub fn into_success(self, what: impl FnOnce() -> String) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::unavailable(format!("{}: {}", what(), self.pretty())))
        }
    }
}

/// Executes a shell command somewhere able to reach the cluster.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &str) -> Result<CommandOutput>;
}

/// Runs commands through the local `sh`. A command still running after `timeout` is
/// killed and reported as unavailable.
#[derive(Clone, Debug)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        tracing::debug!(command, "executing command");
        let mut child = Command::new("sh");
        child.arg("-c").arg(command).kill_on_drop(true);
        let output = timeout(self.timeout, child.output())
            .await
            .map_err(|_| {
                Error::unavailable(format!(
                    "`{command}` still running after {}",
                    humantime::format_duration(self.timeout)
                ))
            })?
            .map_err(|err| Error::unavailable(format!("failed to spawn `{command}`: {err}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            success: output.status.success(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecRetry {
    pub exit_code: i32,
    pub attempts: u32,
    pub pause: Duration,
    /// Upper bound on a single exec call, retries excluded.
    pub call_timeout: Duration,
}

impl Default for ExecRetry {
    fn default() -> Self {
        Self {
            exit_code: DEFAULT_RETRY_EXIT_CODE,
            attempts: DEFAULT_RETRY_ATTEMPTS,
            pause: DEFAULT_RETRY_PAUSE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Runs commands inside agent pods via `kubectl exec`.
#[derive(Clone, Debug)]
pub struct AgentExec {
    kubectl: String,
    namespace: String,
    retry: ExecRetry,
}

impl AgentExec {
    pub fn new(kubectl: impl Into<String>, namespace: impl Into<String>, retry: ExecRetry) -> Self {
        Self {
            kubectl: kubectl.into(),
            namespace: namespace.into(),
            retry,
        }
    }

    pub fn command_for(&self, agent: &AgentHandle, command: &str) -> String {
        format!(
            "{} exec -n {} {} -- {}",
            self.kubectl,
            self.namespace,
            agent.name(),
            command
        )
    }

    /// Executes `command` in `agent`, re-running it while the exec layer reports the
    /// transient exit code.
    pub async fn run(
        &self,
        runner: &dyn CommandRunner,
        agent: &AgentHandle,
        command: &str,
    ) -> Result<CommandOutput> {
        let full = self.command_for(agent, command);
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let output = timeout(self.retry.call_timeout, runner.execute(&full))
                .await
                .map_err(|_| {
                    Error::unavailable(format!(
                        "`{command}` in {agent} did not answer within {}",
                        humantime::format_duration(self.retry.call_timeout)
                    ))
                })??;
            if output.exit_code != self.retry.exit_code || attempt >= attempts {
                return Ok(output);
            }
            crate::agent_event!(
                debug,
                "exec_retry",
                agent = agent,
                attempt = attempt,
                exit_code = output.exit_code
            );
            sleep(self.retry.pause).await;
        }
    }
}
