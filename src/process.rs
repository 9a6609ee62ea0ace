//! External tool invocation
//!
//! Every call to pg_dump, pg_restore, psql or the migration tool is shaped
//! as a [`ToolCommand`] and executed through a [`ProcessRunner`], so the
//! engines never build shell strings and tests can swap in a fake runner.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Structured argv plus injected environment for one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// File the tool is expected to produce, if any
    pub output: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, vars: Vec<(String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn output_file(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    /// Tool name for diagnostics (basename of the program)
    pub fn tool_name(&self) -> &str {
        std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    /// argv rendered for logs; values of injected variables are never shown
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Execution contract for external tools
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing stdout, stderr and exit code.
    /// A missing binary is reported as [`AppError::ToolNotFound`].
    async fn run(&self, command: &ToolCommand) -> AppResult<ProcessOutput>;
}

/// Runs tools as scoped child processes
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, command: &ToolCommand) -> AppResult<ProcessOutput> {
        debug!("Running: {}", command.display());

        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AppError::ToolNotFound(command.program.clone()),
                _ => AppError::Io(e),
            })?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run and turn a nonzero exit into [`AppError::ProcessFailure`]. Never retried.
pub async fn run_checked(runner: &dyn ProcessRunner, command: &ToolCommand) -> AppResult<ProcessOutput> {
    let output = runner.run(command).await?;
    if !output.success() {
        warn!("{} failed: {}", command.tool_name(), output.stderr.trim());
        return Err(AppError::ProcessFailure {
            tool: command.tool_name().to_string(),
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

#[cfg(test)]
pub mod testing {
    //! In-memory runner that records commands instead of spawning them.

    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeRunner {
        calls: Mutex<Vec<ToolCommand>>,
        failing: HashSet<String>,
        missing: HashSet<String>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every run of `program` exit with status 1
        pub fn failing(mut self, program: &str) -> Self {
            self.failing.insert(program.to_string());
            self
        }

        /// Make `program` look absent from PATH
        pub fn missing(mut self, program: &str) -> Self {
            self.missing.insert(program.to_string());
            self
        }

        pub fn calls(&self) -> Vec<ToolCommand> {
            self.calls.lock().unwrap().clone()
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls().into_iter().map(|c| c.program).collect()
        }

        pub fn ran(&self, program: &str) -> bool {
            self.programs().iter().any(|p| p == program)
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, command: &ToolCommand) -> AppResult<ProcessOutput> {
            self.calls.lock().unwrap().push(command.clone());

            if self.missing.contains(&command.program) {
                return Err(AppError::ToolNotFound(command.program.clone()));
            }
            if self.failing.contains(&command.program) {
                return Ok(ProcessOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: format!("{}: simulated failure\n", command.program),
                });
            }
            if let Some(path) = &command.output {
                std::fs::write(path, format!("-- {}\n", command.display()))?;
            }
            Ok(ProcessOutput {
                code: Some(0),
                stdout: "ok\n".to_string(),
                stderr: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeRunner;
    use super::*;

    #[test]
    fn test_builder_shapes_argv() {
        let cmd = ToolCommand::new("/usr/bin/pg_dump")
            .arg("--format=plain")
            .args(["--no-owner", "--no-acl"])
            .envs(vec![("PGPASSWORD".to_string(), "secret".to_string())]);

        assert_eq!(cmd.tool_name(), "pg_dump");
        assert_eq!(cmd.args, vec!["--format=plain", "--no-owner", "--no-acl"]);
        assert_eq!(cmd.display(), "/usr/bin/pg_dump --format=plain --no-owner --no-acl");
        assert!(!cmd.display().contains("secret"));
    }

    #[tokio::test]
    async fn test_run_checked_maps_nonzero_exit() {
        let runner = FakeRunner::new().failing("pg_dump");
        let err = run_checked(&runner, &ToolCommand::new("pg_dump")).await.unwrap_err();
        match err {
            AppError::ProcessFailure { tool, code, stderr } => {
                assert_eq!(tool, "pg_dump");
                assert_eq!(code, Some(1));
                assert!(stderr.contains("simulated failure"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let cmd = ToolCommand::new("dbkeeper-definitely-not-installed-tool");
        let err = SystemRunner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, AppError::ToolNotFound(_)));
    }
}
