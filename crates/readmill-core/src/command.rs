// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External command execution seam.
//!
//! Reference localization shells out to transfer tools (`gsutil`, `wget`)
//! and containerized indexers (`docker run`). The [`CommandRunner`] trait
//! keeps those call sites testable; [`HostRunner`] is the production
//! implementation and [`RecordingRunner`] the test double.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::debug;

/// Exit status and captured stderr of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code (-1 when terminated by signal).
    pub code: i32,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, waiting for exit.
    ///
    /// Spawn failures (e.g. program not installed) surface as `Err`;
    /// non-zero exits are reported through [`CommandOutput::code`].
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Executes commands directly on the host.
#[derive(Debug, Default)]
pub struct HostRunner;

impl HostRunner {
    /// Create a new host runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        debug!(program = %program, args = %args.join(" "), "Running external command");
        let output = Command::new(program).args(args).output().await?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Program name as invoked.
    pub program: String,
    /// Arguments as invoked.
    pub args: Vec<String>,
}

impl RecordedCall {
    /// The invocation as a single space-joined string.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

type CallHandler = Box<dyn Fn(&RecordedCall) -> CommandOutput + Send + Sync>;

/// Command runner that records invocations instead of executing them.
///
/// A handler closure decides the outcome of each call, which lets tests
/// simulate tool side effects (e.g. creating index files) or failures.
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCall>>,
    handler: CallHandler,
}

impl RecordingRunner {
    /// Runner where every command succeeds and does nothing.
    pub fn new() -> Self {
        Self::with_handler(|_| CommandOutput {
            code: 0,
            stderr: String::new(),
        })
    }

    /// Runner where every command fails with exit code 1.
    pub fn failing() -> Self {
        Self::with_handler(|_| CommandOutput {
            code: 1,
            stderr: "simulated failure".to_string(),
        })
    }

    /// Runner with a custom outcome handler.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&RecordedCall) -> CommandOutput + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// All recorded invocations, in call order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded invocations.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Recorded invocations as space-joined command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(RecordedCall::command_line)
            .collect()
    }
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let call = RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
        };
        let output = (self.handler)(&call);
        self.calls.lock().unwrap().push(call);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_runner_records_calls_in_order() {
        let runner = RecordingRunner::new();

        runner
            .run("gsutil", &["cp".to_string(), "gs://a".to_string()])
            .await
            .unwrap();
        runner.run("wget", &["http://b".to_string()]).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, "gsutil");
        assert_eq!(calls[1].program, "wget");
        assert_eq!(runner.command_lines()[0], "gsutil cp gs://a");
    }

    #[tokio::test]
    async fn test_recording_runner_failing() {
        let runner = RecordingRunner::failing();

        let output = runner.run("docker", &[]).await.unwrap();

        assert!(!output.success());
        assert_eq!(output.code, 1);
        assert!(output.stderr.contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_recording_runner_handler_drives_outcome() {
        let runner = RecordingRunner::with_handler(|call| {
            let code = if call.program == "wget" { 8 } else { 0 };
            CommandOutput {
                code,
                stderr: String::new(),
            }
        });

        let ok = runner.run("gsutil", &[]).await.unwrap();
        let err = runner.run("wget", &[]).await.unwrap();

        assert!(ok.success());
        assert_eq!(err.code, 8);
    }

    #[tokio::test]
    async fn test_host_runner_captures_exit_code() {
        let runner = HostRunner::new();

        let output = runner
            .run("sh", &["-c".to_string(), "exit 3".to_string()])
            .await
            .unwrap();

        assert_eq!(output.code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_host_runner_captures_stderr() {
        let runner = HostRunner::new();

        let output = runner
            .run("sh", &["-c".to_string(), "echo oops >&2".to_string()])
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_host_runner_missing_program_is_spawn_error() {
        let runner = HostRunner::new();

        let result = runner.run("readmill-no-such-tool", &[]).await;

        assert!(result.is_err());
    }
}
