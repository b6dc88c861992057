// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cromwell workflow engine.
//!
//! Runs workflow documents through a Cromwell jar found in the source
//! checkout: `java [-Dconfig.file=<conf>] -jar cromwell-*.jar run <wdl>
//! -i <inputs> -o <options>`. Engine output streams into per-stage log
//! files so concurrent samples never interleave.

use crate::config::PipelineConfig;
use crate::engine::traits::{EngineExit, EngineRequest, WorkflowEngine};
use crate::error::{Result, StageError};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info};

/// Workflow engine backed by a local Cromwell jar.
pub struct CromwellEngine {
    jar: PathBuf,
    engine_config: Option<PathBuf>,
    poll_interval: Duration,
}

impl CromwellEngine {
    /// Locate the engine jar under the configured source directory.
    ///
    /// When several `cromwell*.jar` files are present the last in name
    /// order wins, so dropping a newer release next to the old one is
    /// enough to upgrade.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let jar = find_jar(&config.source_dir)?;
        info!(jar = %jar.display(), "Using workflow engine jar");
        Ok(Self {
            jar,
            engine_config: config.engine_config.clone(),
            poll_interval: Duration::from_secs(config.poll_interval),
        })
    }

    /// Path of the jar this engine runs.
    pub fn jar(&self) -> &Path {
        &self.jar
    }
}

fn find_jar(source_dir: &Path) -> Result<PathBuf> {
    let mut jars = Vec::new();
    for entry in std::fs::read_dir(source_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("cromwell") && name.ends_with(".jar") {
            jars.push(entry.path());
        }
    }
    jars.sort();
    jars.pop()
        .ok_or_else(|| StageError::EngineNotFound(source_dir.to_path_buf()))
}

#[async_trait]
impl WorkflowEngine for CromwellEngine {
    fn engine_type(&self) -> &'static str {
        "cromwell"
    }

    async fn run_workflow(&self, request: &EngineRequest) -> Result<EngineExit> {
        let mut args = Vec::new();
        if let Some(engine_config) = &self.engine_config {
            args.push(format!("-Dconfig.file={}", engine_config.display()));
        }
        args.push("-jar".to_string());
        args.push(self.jar.display().to_string());
        args.push("run".to_string());
        args.push(request.workflow.display().to_string());
        args.push("-i".to_string());
        args.push(request.inputs.display().to_string());
        args.push("-o".to_string());
        args.push(request.options.display().to_string());

        // Logs are opened in append mode so a resumed run keeps the
        // full history of earlier attempts.
        let mut stderr_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.stderr_log)?;
        let command_line = format!("java {}", args.join(" "));
        writeln!(stderr_log, "executing command: {command_line}")?;
        let stdout_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.stdout_log)?;

        info!(
            stage = %request.stage,
            workflow = %request.workflow.display(),
            "Launching workflow engine"
        );
        debug!(command = %command_line, "Engine command line");

        let mut child = Command::new("java")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log))
            .spawn()?;

        loop {
            if let Some(status) = child.try_wait()? {
                let code = status.code().unwrap_or(-1);
                debug!(stage = %request.stage, code = code, "Workflow engine exited");
                return Ok(EngineExit { code });
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_jar_picks_last_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cromwell-52.jar"), b"a").unwrap();
        fs::write(dir.path().join("cromwell-54.jar"), b"b").unwrap();
        fs::write(dir.path().join("other.jar"), b"c").unwrap();

        let jar = find_jar(dir.path()).unwrap();

        assert_eq!(jar, dir.path().join("cromwell-54.jar"));
    }

    #[test]
    fn test_find_jar_missing_is_engine_not_found() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let result = find_jar(dir.path());

        assert!(matches!(result, Err(StageError::EngineNotFound(_))));
    }

    #[test]
    fn test_find_jar_ignores_non_jar_cromwell_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cromwell.conf"), b"x").unwrap();

        let result = find_jar(dir.path());

        assert!(matches!(result, Err(StageError::EngineNotFound(_))));
    }
}
