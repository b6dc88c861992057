// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-sample stage execution.
//!
//! A sample moves through a two-stage chain: conversion to unmapped
//! BAMs (from an aligned BAM or from paired FASTQ files), then
//! alignment. Every stage is checkpointed on disk under the sample's
//! working directory, so re-running the orchestrator resumes past
//! completed work. Checkpoints are written only after the engine exits
//! successfully; a failed stage leaves no checkpoint and is re-attempted
//! on the next run.

use crate::config::PipelineConfig;
use crate::engine::{EngineRequest, WorkflowEngine};
use crate::error::{Result, StageError};
use crate::library::LocalizedConfig;
use crate::readgroup::derive_readgroup;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

const PROCESSED_DIR: &str = "processed";
const UBAM_LIST_FILE: &str = "unmapped_bams_list.txt";
const UBAM_SUFFIX: &str = ".unmapped.bam";

const BAM_TO_UBAM_WDL: &str = "seq-format-conversion/bam-to-unmapped-bams.wdl";
const FASTQ_TO_UBAM_WDL: &str = "seq-format-conversion/paired-fastq-to-unmapped-bam.wdl";
const ALIGN_WDL: &str = "gatk4-data-processing/processing-for-variant-discovery-gatk4.wdl";

const ALIGN_NAMESPACE: &str = "PreProcessingForVariantDiscovery_GATK4";
const REF_NAME_KEY: &str = "PreProcessingForVariantDiscovery_GATK4.ref_name";

/// Whether a stage actually ran or was satisfied by its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// The engine was invoked.
    Ran,
    /// The checkpoint existed and the engine was not invoked.
    Skipped,
}

/// Result of an unmapped-BAM conversion from an aligned BAM.
#[derive(Debug, Clone)]
pub struct UbamConversion {
    /// Whether the engine ran.
    pub status: StageStatus,
    /// Unmapped BAMs now present in the sample directory, sorted by name.
    pub ubams: Vec<PathBuf>,
}

/// Result of converting one FASTQ pair to an unmapped BAM.
#[derive(Debug, Clone)]
pub struct ReadgroupConversion {
    /// Whether the engine ran.
    pub status: StageStatus,
    /// The readgroup's unmapped BAM path.
    pub ubam: PathBuf,
}

/// Result of the alignment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOutcome {
    /// The engine ran and the sample is aligned.
    Aligned,
    /// The output checksum checkpoint already existed.
    AlreadyAligned,
    /// The unmapped-BAM list was absent or empty; nothing to align.
    NoInputs,
}

/// Filesystem layout of one sample+tag working directory.
#[derive(Debug, Clone)]
pub struct SampleLayout {
    /// Final outputs land here: `<project>/processed/<sample>/<tag>`.
    pub sample_dir: PathBuf,
    /// Input descriptors and checkpoints: `<sample_dir>/workflow`.
    pub workflow_dir: PathBuf,
    /// Stage and engine logs: `<workflow_dir>/logs`.
    pub log_dir: PathBuf,
}

impl SampleLayout {
    /// Layout for a sanitized sample name and tag.
    pub fn new(project_dir: &Path, sample: &str, tag: &str) -> Self {
        let sample_dir = project_dir.join(PROCESSED_DIR).join(sample).join(tag);
        let workflow_dir = sample_dir.join("workflow");
        let log_dir = workflow_dir.join("logs");
        Self {
            sample_dir,
            workflow_dir,
            log_dir,
        }
    }

    /// Create the directory tree and write the engine options descriptor.
    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.log_dir).await?;
        let options = json!({
            "use_relative_output_paths": "true",
            "final_workflow_outputs_dir": self.sample_dir.display().to_string(),
            "final_workflow_log_dir": self.log_dir.display().to_string(),
            "final_call_logs_dir": self.log_dir.display().to_string(),
        });
        write_json(&self.options_file(), &options).await
    }

    /// Engine options descriptor path.
    pub fn options_file(&self) -> PathBuf {
        self.workflow_dir.join("options.json")
    }

    /// Input descriptor path for `name`.
    pub fn descriptor(&self, name: &str) -> PathBuf {
        self.workflow_dir.join(format!("{name}.json"))
    }

    /// The unmapped-BAM list consumed by the alignment stage. Doubles as
    /// the conversion stage's checkpoint.
    pub fn ubam_list(&self) -> PathBuf {
        self.workflow_dir.join(UBAM_LIST_FILE)
    }

    /// Alignment checkpoint: the output checksum file the workflow
    /// publishes on success.
    pub fn align_checkpoint(&self, sample: &str, ref_name: &str) -> PathBuf {
        self.sample_dir.join(format!("{sample}.{ref_name}.bam.md5"))
    }

    fn stage_logs(&self, stage: &str) -> (PathBuf, PathBuf) {
        (
            self.log_dir.join(format!("{stage}.stdout")),
            self.log_dir.join(format!("{stage}.stderr")),
        )
    }
}

/// Runs checkpointed stages for one sample at a time.
///
/// Cheap to clone; per-sample chains run on their own tasks sharing the
/// same engine and configuration.
#[derive(Clone)]
pub struct StageRunner {
    engine: Arc<dyn WorkflowEngine>,
    config: Arc<PipelineConfig>,
    localized: Arc<LocalizedConfig>,
}

impl StageRunner {
    /// Create a stage runner over a fully-localized reference config.
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        config: Arc<PipelineConfig>,
        localized: Arc<LocalizedConfig>,
    ) -> Self {
        Self {
            engine,
            config,
            localized,
        }
    }

    /// Working-directory layout for a sanitized sample name and tag.
    pub fn layout(&self, sample: &str, tag: &str) -> SampleLayout {
        SampleLayout::new(&self.config.project_dir, sample, tag)
    }

    /// Convert an aligned BAM into per-readgroup unmapped BAMs.
    ///
    /// Checkpoint: the unmapped-BAM list file. When present the engine
    /// is not invoked and outputs are assembled from a directory scan.
    pub async fn bam_to_ubam(
        &self,
        sample: &str,
        tag: &str,
        bam: &Path,
    ) -> Result<UbamConversion> {
        let layout = self.layout(sample, tag);
        layout.prepare().await?;
        let checkpoint = layout.ubam_list();

        if is_file(&checkpoint).await {
            info!(sample = %sample, tag = %tag, "Unmapped BAM list exists, skipping conversion");
            let ubams = scan_unmapped_bams(&layout.sample_dir).await?;
            return Ok(UbamConversion {
                status: StageStatus::Skipped,
                ubams,
            });
        }

        let inputs = json!({
            "BamToUnmappedBams.input_bam": bam.display().to_string(),
        });
        let inputs_path = layout.descriptor("bam_to_ubam");
        write_json(&inputs_path, &inputs).await?;

        let exit = self
            .engine
            .run_workflow(&self.request("bam_to_ubam", BAM_TO_UBAM_WDL, inputs_path, &layout))
            .await?;
        if !exit.success() {
            return Err(StageError::Execution {
                stage: "bam_to_ubam",
                sample: sample.to_string(),
                code: exit.code,
            });
        }

        let ubams = scan_unmapped_bams(&layout.sample_dir).await?;
        if ubams.is_empty() {
            warn!(sample = %sample, tag = %tag, "Conversion succeeded but produced no unmapped BAMs");
        }
        write_ubam_list(&checkpoint, &ubams).await?;
        info!(sample = %sample, tag = %tag, count = ubams.len(), "Converted BAM to unmapped BAMs");
        Ok(UbamConversion {
            status: StageStatus::Ran,
            ubams,
        })
    }

    /// Convert one FASTQ pair into an unmapped BAM keyed by readgroup.
    ///
    /// The readgroup derived from the first read header names both the
    /// input descriptor and the output file, making re-submission of the
    /// same pair idempotent: descriptor plus output present means done.
    /// A descriptor without its output (earlier run failed after
    /// submission) is re-submitted.
    pub async fn fastq_to_ubam(
        &self,
        sample: &str,
        tag: &str,
        fastq_1: &Path,
        fastq_2: &Path,
        sequencing_center: &str,
        run_date: &str,
    ) -> Result<ReadgroupConversion> {
        let layout = self.layout(sample, tag);
        layout.prepare().await?;

        let readgroup = derive_readgroup(sample, fastq_1)?;
        let descriptor = layout.descriptor(&readgroup.name);
        let ubam = layout
            .sample_dir
            .join(format!("{}{}", readgroup.name, UBAM_SUFFIX));

        if is_file(&descriptor).await {
            if is_file(&ubam).await {
                info!(
                    sample = %sample,
                    readgroup = %readgroup.name,
                    "Readgroup already converted, skipping"
                );
                return Ok(ReadgroupConversion {
                    status: StageStatus::Skipped,
                    ubam,
                });
            }
            info!(
                sample = %sample,
                readgroup = %readgroup.name,
                "Descriptor present but output missing, re-submitting"
            );
        }

        let inputs = json!({
            "ConvertPairedFastQsToUnmappedBamWf.readgroup_name": &readgroup.name,
            "ConvertPairedFastQsToUnmappedBamWf.sample_name": sample,
            "ConvertPairedFastQsToUnmappedBamWf.fastq_1": fastq_1.display().to_string(),
            "ConvertPairedFastQsToUnmappedBamWf.fastq_2": fastq_2.display().to_string(),
            "ConvertPairedFastQsToUnmappedBamWf.library_name": sample,
            "ConvertPairedFastQsToUnmappedBamWf.platform_unit": &readgroup.platform_unit,
            "ConvertPairedFastQsToUnmappedBamWf.run_date": run_date,
            "ConvertPairedFastQsToUnmappedBamWf.platform_name": "illumina",
            "ConvertPairedFastQsToUnmappedBamWf.sequencing_center": sequencing_center,
            "ConvertPairedFastQsToUnmappedBamWf.make_fofn": "false",
        });
        write_json(&descriptor, &inputs).await?;

        let exit = self
            .engine
            .run_workflow(&self.request(
                "fastq_to_ubam",
                FASTQ_TO_UBAM_WDL,
                descriptor,
                &layout,
            ))
            .await?;
        if !exit.success() {
            return Err(StageError::Execution {
                stage: "fastq_to_ubam",
                sample: sample.to_string(),
                code: exit.code,
            });
        }

        info!(sample = %sample, readgroup = %readgroup.name, "Converted FASTQ pair");
        Ok(ReadgroupConversion {
            status: StageStatus::Ran,
            ubam,
        })
    }

    /// Write the unmapped-BAM list consumed by alignment.
    ///
    /// The collected set covers skipped readgroups too, so an existing
    /// list is refreshed rather than trusted; an empty collection never
    /// creates or truncates the list.
    pub async fn ensure_ubam_list(
        &self,
        sample: &str,
        tag: &str,
        ubams: &[PathBuf],
    ) -> Result<(StageStatus, PathBuf)> {
        let layout = self.layout(sample, tag);
        let list = layout.ubam_list();
        if ubams.is_empty() {
            debug!(sample = %sample, tag = %tag, "No unmapped BAMs collected, list untouched");
            return Ok((StageStatus::Skipped, list));
        }
        write_ubam_list(&list, ubams).await?;
        debug!(sample = %sample, tag = %tag, count = ubams.len(), "Wrote unmapped BAM list");
        Ok((StageStatus::Ran, list))
    }

    /// Align a sample's unmapped BAMs against the localized reference.
    ///
    /// Checkpoint: the `<sample>.<ref>.bam.md5` checksum the workflow
    /// publishes into the sample directory. An absent or empty
    /// unmapped-BAM list downgrades the stage to a logged no-op.
    pub async fn align(&self, sample: &str, tag: &str) -> Result<AlignOutcome> {
        let layout = self.layout(sample, tag);
        layout.prepare().await?;

        let ref_name = self
            .localized
            .get_str(REF_NAME_KEY)
            .ok_or(StageError::MissingInput(REF_NAME_KEY))?
            .to_string();
        let checkpoint = layout.align_checkpoint(sample, &ref_name);

        if is_file(&checkpoint).await {
            info!(sample = %sample, tag = %tag, "Alignment checkpoint exists, skipping");
            return Ok(AlignOutcome::AlreadyAligned);
        }

        let list = layout.ubam_list();
        let ubams = read_ubam_list(&list).await?;
        if ubams.is_empty() {
            warn!(sample = %sample, tag = %tag, "No unmapped BAMs to align, skipping sample");
            return Ok(AlignOutcome::NoInputs);
        }

        let mut entries = self.localized.reference_entries();
        entries.insert(format!("{ALIGN_NAMESPACE}.sample_name"), json!(sample));
        entries.insert(format!("{ALIGN_NAMESPACE}.ref_name"), json!(ref_name));
        entries.insert(
            format!("{ALIGN_NAMESPACE}.flowcell_unmapped_bams_list"),
            json!(list.display().to_string()),
        );
        entries.insert(format!("{ALIGN_NAMESPACE}.unmapped_bam_suffix"), json!(".bam"));

        let inputs_path = layout.descriptor("align");
        write_json(&inputs_path, &Value::Object(entries)).await?;

        let exit = self
            .engine
            .run_workflow(&self.request("align", ALIGN_WDL, inputs_path, &layout))
            .await?;
        if !exit.success() {
            return Err(StageError::Execution {
                stage: "align",
                sample: sample.to_string(),
                code: exit.code,
            });
        }

        if !is_file(&checkpoint).await {
            warn!(
                sample = %sample,
                checkpoint = %checkpoint.display(),
                "Alignment finished but checkpoint was not published"
            );
        }
        info!(sample = %sample, tag = %tag, ref_name = %ref_name, "Sample aligned");

        if self.config.clean_inputs {
            clean_hardlinked_inputs(&self.config.source_dir, &ubams).await;
        }
        Ok(AlignOutcome::Aligned)
    }

    fn request(
        &self,
        stage: &'static str,
        document: &str,
        inputs: PathBuf,
        layout: &SampleLayout,
    ) -> EngineRequest {
        let (stdout_log, stderr_log) = layout.stage_logs(stage);
        EngineRequest {
            stage,
            workflow: self.config.source_dir.join(document),
            inputs,
            options: layout.options_file(),
            stdout_log,
            stderr_log,
        }
    }
}

/// Remove files under `root` that hard-link to any of `consumed`.
///
/// The engine publishes final outputs by hard-linking from its own
/// execution tree, leaving a duplicate directory entry per output. This
/// is best-effort cleanup: every failure is logged and swallowed.
pub async fn clean_hardlinked_inputs(root: &Path, consumed: &[PathBuf]) {
    let mut targets = HashSet::new();
    for path in consumed {
        match std::fs::metadata(path) {
            Ok(meta) => {
                targets.insert((meta.dev(), meta.ino()));
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Cannot stat consumed file");
            }
        }
    }
    if targets.is_empty() {
        return;
    }

    let root = root.to_path_buf();
    let result = tokio::task::spawn_blocking(move || remove_links(&root, &targets)).await;
    match result {
        Ok(removed) if removed > 0 => {
            info!(count = removed, "Removed hard-linked input copies");
        }
        Ok(_) => {}
        Err(error) => warn!(error = %error, "Hard link cleanup task failed"),
    }
}

fn remove_links(root: &Path, targets: &HashSet<(u64, u64)>) -> usize {
    let mut removed = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(dir = %dir.display(), error = %error, "Cannot scan directory during cleanup");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(path);
            } else if targets.contains(&(meta.dev(), meta.ino())) {
                info!(path = %path.display(), "Removing hard-linked input copy");
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "Cannot remove hard link");
                    }
                }
            }
        }
    }
    removed
}

async fn scan_unmapped_bams(sample_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut ubams = Vec::new();
    let mut entries = fs::read_dir(sample_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(UBAM_SUFFIX) {
            ubams.push(entry.path());
        }
    }
    ubams.sort();
    Ok(ubams)
}

async fn write_ubam_list(path: &Path, ubams: &[PathBuf]) -> Result<()> {
    let mut body = String::new();
    for ubam in ubams {
        body.push_str(&ubam.display().to_string());
        body.push('\n');
    }
    fs::write(path, body).await?;
    Ok(())
}

async fn read_ubam_list(path: &Path) -> Result<Vec<PathBuf>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(PathBuf::from)
            .collect()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

async fn write_json(path: &Path, value: &Value) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?).await?;
    Ok(())
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use serde_json::Map;
    use std::fs as std_fs;
    use tempfile::TempDir;

    fn test_config(project_dir: &Path, source_dir: &Path) -> Arc<PipelineConfig> {
        let text = json!({
            "project_dir": project_dir.display().to_string(),
            "source_dir": source_dir.display().to_string(),
        })
        .to_string();
        Arc::new(serde_json::from_str(&text).unwrap())
    }

    fn test_localized(ref_name: &str) -> Arc<LocalizedConfig> {
        let mut entries = Map::new();
        entries.insert(REF_NAME_KEY.to_string(), json!(ref_name));
        entries.insert(
            "PreProcessingForVariantDiscovery_GATK4.ref_fasta".to_string(),
            json!("/lib/ref.fasta"),
        );
        Arc::new(LocalizedConfig::new(entries))
    }

    fn runner_with(engine: Arc<MockEngine>, dir: &TempDir) -> StageRunner {
        let project = dir.path().join("project");
        let source = dir.path().join("source");
        std_fs::create_dir_all(&source).unwrap();
        StageRunner::new(engine, test_config(&project, &source), test_localized("hg38"))
    }

    #[test]
    fn test_sample_layout_paths() {
        let layout = SampleLayout::new(Path::new("/data/run1"), "patient1", "tumor");

        assert_eq!(
            layout.sample_dir,
            PathBuf::from("/data/run1/processed/patient1/tumor")
        );
        assert_eq!(layout.workflow_dir, layout.sample_dir.join("workflow"));
        assert_eq!(layout.log_dir, layout.workflow_dir.join("logs"));
        assert_eq!(
            layout.ubam_list(),
            layout.workflow_dir.join("unmapped_bams_list.txt")
        );
        assert_eq!(
            layout.align_checkpoint("patient1", "hg38"),
            layout.sample_dir.join("patient1.hg38.bam.md5")
        );
    }

    #[tokio::test]
    async fn test_layout_prepare_writes_options() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::new(dir.path(), "s1", "tumor");

        layout.prepare().await.unwrap();

        assert!(layout.log_dir.is_dir());
        let options: Value =
            serde_json::from_str(&std_fs::read_to_string(layout.options_file()).unwrap()).unwrap();
        assert_eq!(options["use_relative_output_paths"], "true");
        assert_eq!(
            options["final_workflow_outputs_dir"],
            layout.sample_dir.display().to_string()
        );
        assert_eq!(
            options["final_call_logs_dir"],
            layout.log_dir.display().to_string()
        );
    }

    #[tokio::test]
    async fn test_bam_to_ubam_skips_when_checkpoint_exists() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine.clone(), &dir);

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.ubam_list(), "").unwrap();
        std_fs::write(layout.sample_dir.join("rg1.unmapped.bam"), b"x").unwrap();
        std_fs::write(layout.sample_dir.join("notes.txt"), b"x").unwrap();

        let result = runner
            .bam_to_ubam("s1", "tumor", Path::new("/in/s1.bam"))
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Skipped);
        assert_eq!(result.ubams, vec![layout.sample_dir.join("rg1.unmapped.bam")]);
        assert_eq!(engine.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn test_bam_to_ubam_writes_checkpoint_on_success() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::with_effects(|request| {
            // Simulate the workflow publishing outputs next to the
            // descriptor's sample directory.
            let sample_dir = request
                .inputs
                .parent()
                .unwrap()
                .parent()
                .unwrap()
                .to_path_buf();
            std_fs::write(sample_dir.join("a.unmapped.bam"), b"x").unwrap();
            std_fs::write(sample_dir.join("b.unmapped.bam"), b"x").unwrap();
            0
        }));
        let runner = runner_with(engine.clone(), &dir);
        let layout = runner.layout("s1", "tumor");

        let result = runner
            .bam_to_ubam("s1", "tumor", Path::new("/in/s1.bam"))
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Ran);
        assert_eq!(result.ubams.len(), 2);
        assert!(layout.ubam_list().is_file());
        let list = std_fs::read_to_string(layout.ubam_list()).unwrap();
        assert!(list.contains("a.unmapped.bam"));
        assert!(list.contains("b.unmapped.bam"));

        let invocations = engine.invocations().await;
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].stage, "bam_to_ubam");
        assert!(
            invocations[0]
                .workflow
                .ends_with("seq-format-conversion/bam-to-unmapped-bams.wdl")
        );
    }

    #[tokio::test]
    async fn test_bam_to_ubam_failure_leaves_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::failing());
        let runner = runner_with(engine, &dir);
        let layout = runner.layout("s1", "tumor");

        let result = runner
            .bam_to_ubam("s1", "tumor", Path::new("/in/s1.bam"))
            .await;

        match result {
            Err(StageError::Execution { stage, code, .. }) => {
                assert_eq!(stage, "bam_to_ubam");
                assert_eq!(code, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!layout.ubam_list().exists());
    }

    #[tokio::test]
    async fn test_fastq_to_ubam_writes_descriptor_keys() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine.clone(), &dir);

        let fastq_1 = dir.path().join("r1.fastq");
        let fastq_2 = dir.path().join("r2.fastq");
        std_fs::write(&fastq_1, "@A01:12:FC:3:1:2:3 1:N:0:ACGT\nACGT\n+\nFFFF\n").unwrap();
        std_fs::write(&fastq_2, "@A01:12:FC:3:1:2:3 2:N:0:ACGT\nACGT\n+\nFFFF\n").unwrap();

        let result = runner
            .fastq_to_ubam("s1", "tumor", &fastq_1, &fastq_2, "BGI", "2024-06-01")
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Ran);
        let layout = runner.layout("s1", "tumor");
        assert_eq!(
            result.ubam,
            layout.sample_dir.join("s1.12.FC.3.unmapped.bam")
        );

        let descriptor = layout.descriptor("s1.12.FC.3");
        let inputs: Value =
            serde_json::from_str(&std_fs::read_to_string(descriptor).unwrap()).unwrap();
        assert_eq!(
            inputs["ConvertPairedFastQsToUnmappedBamWf.readgroup_name"],
            "s1.12.FC.3"
        );
        assert_eq!(
            inputs["ConvertPairedFastQsToUnmappedBamWf.platform_unit"],
            "FC.3"
        );
        assert_eq!(
            inputs["ConvertPairedFastQsToUnmappedBamWf.platform_name"],
            "illumina"
        );
        assert_eq!(
            inputs["ConvertPairedFastQsToUnmappedBamWf.sequencing_center"],
            "BGI"
        );
        assert_eq!(inputs["ConvertPairedFastQsToUnmappedBamWf.make_fofn"], "false");
    }

    #[tokio::test]
    async fn test_fastq_to_ubam_skips_when_output_exists() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine.clone(), &dir);

        let fastq_1 = dir.path().join("r1.fastq");
        let fastq_2 = dir.path().join("r2.fastq");
        std_fs::write(&fastq_1, "@A01:12:FC:3:1:2:3 1:N:0:ACGT\nACGT\n+\nFFFF\n").unwrap();
        std_fs::write(&fastq_2, "@A01:12:FC:3:1:2:3 2:N:0:ACGT\nACGT\n+\nFFFF\n").unwrap();

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.descriptor("s1.12.FC.3"), "{}").unwrap();
        std_fs::write(layout.sample_dir.join("s1.12.FC.3.unmapped.bam"), b"x").unwrap();

        let result = runner
            .fastq_to_ubam("s1", "tumor", &fastq_1, &fastq_2, "BGI", "2024-06-01")
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Skipped);
        assert_eq!(engine.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn test_fastq_to_ubam_resubmits_when_output_missing() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine.clone(), &dir);

        let fastq_1 = dir.path().join("r1.fastq");
        let fastq_2 = dir.path().join("r2.fastq");
        std_fs::write(&fastq_1, "@A01:12:FC:3:1:2:3 1:N:0:ACGT\nACGT\n+\nFFFF\n").unwrap();
        std_fs::write(&fastq_2, "@A01:12:FC:3:1:2:3 2:N:0:ACGT\nACGT\n+\nFFFF\n").unwrap();

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.descriptor("s1.12.FC.3"), "{}").unwrap();

        let result = runner
            .fastq_to_ubam("s1", "tumor", &fastq_1, &fastq_2, "BGI", "2024-06-01")
            .await
            .unwrap();

        assert_eq!(result.status, StageStatus::Ran);
        assert_eq!(engine.invocation_count().await, 1);
    }

    #[tokio::test]
    async fn test_align_skips_when_checkpoint_exists() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine.clone(), &dir);

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.align_checkpoint("s1", "hg38"), b"md5").unwrap();

        let outcome = runner.align("s1", "tumor").await.unwrap();

        assert_eq!(outcome, AlignOutcome::AlreadyAligned);
        assert_eq!(engine.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn test_align_no_inputs_is_soft_skip() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine.clone(), &dir);

        let outcome = runner.align("s1", "tumor").await.unwrap();

        assert_eq!(outcome, AlignOutcome::NoInputs);
        assert_eq!(engine.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn test_align_builds_inputs_from_reference_entries() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine.clone(), &dir);

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.ubam_list(), "/proc/a.unmapped.bam\n").unwrap();

        let outcome = runner.align("s1", "tumor").await.unwrap();

        assert_eq!(outcome, AlignOutcome::Aligned);
        let inputs: Value =
            serde_json::from_str(&std_fs::read_to_string(layout.descriptor("align")).unwrap())
                .unwrap();
        assert_eq!(
            inputs["PreProcessingForVariantDiscovery_GATK4.sample_name"],
            "s1"
        );
        assert_eq!(
            inputs["PreProcessingForVariantDiscovery_GATK4.ref_name"],
            "hg38"
        );
        assert_eq!(
            inputs["PreProcessingForVariantDiscovery_GATK4.ref_fasta"],
            "/lib/ref.fasta"
        );
        assert_eq!(
            inputs["PreProcessingForVariantDiscovery_GATK4.unmapped_bam_suffix"],
            ".bam"
        );
        assert_eq!(
            inputs["PreProcessingForVariantDiscovery_GATK4.flowcell_unmapped_bams_list"],
            layout.ubam_list().display().to_string()
        );

        let invocations = engine.invocations().await;
        assert_eq!(invocations.len(), 1);
        assert!(
            invocations[0]
                .workflow
                .ends_with("gatk4-data-processing/processing-for-variant-discovery-gatk4.wdl")
        );
    }

    #[tokio::test]
    async fn test_align_failure_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::failing());
        let runner = runner_with(engine, &dir);

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.ubam_list(), "/proc/a.unmapped.bam\n").unwrap();

        let result = runner.align("s1", "tumor").await;

        assert!(matches!(
            result,
            Err(StageError::Execution { stage: "align", .. })
        ));
    }

    #[tokio::test]
    async fn test_clean_hardlinked_inputs_removes_twins_only() {
        let dir = TempDir::new().unwrap();
        let outputs = dir.path().join("outputs");
        let engine_tree = dir.path().join("engine/cromwell-executions/deep");
        std_fs::create_dir_all(&outputs).unwrap();
        std_fs::create_dir_all(&engine_tree).unwrap();

        let consumed = outputs.join("rg1.unmapped.bam");
        std_fs::write(&consumed, b"reads").unwrap();
        let twin = engine_tree.join("rg1.unmapped.bam");
        std_fs::hard_link(&consumed, &twin).unwrap();
        let unrelated = engine_tree.join("other.bam");
        std_fs::write(&unrelated, b"other").unwrap();

        clean_hardlinked_inputs(&dir.path().join("engine"), &[consumed.clone()]).await;

        assert!(consumed.exists());
        assert!(!twin.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_ensure_ubam_list_refreshes_existing_file() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine, &dir);

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.ubam_list(), "/old/a.unmapped.bam\n").unwrap();

        let (status, list) = runner
            .ensure_ubam_list(
                "s1",
                "tumor",
                &[
                    PathBuf::from("/old/a.unmapped.bam"),
                    PathBuf::from("/new/b.unmapped.bam"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(status, StageStatus::Ran);
        let body = std_fs::read_to_string(list).unwrap();
        assert!(body.contains("/old/a.unmapped.bam"));
        assert!(body.contains("/new/b.unmapped.bam"));
    }

    #[tokio::test]
    async fn test_ensure_ubam_list_empty_collection_keeps_file() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let runner = runner_with(engine, &dir);

        let layout = runner.layout("s1", "tumor");
        layout.prepare().await.unwrap();
        std_fs::write(layout.ubam_list(), "/old/a.unmapped.bam\n").unwrap();

        let (status, list) = runner.ensure_ubam_list("s1", "tumor", &[]).await.unwrap();

        assert_eq!(status, StageStatus::Skipped);
        assert!(
            std_fs::read_to_string(list)
                .unwrap()
                .contains("/old/a.unmapped.bam")
        );
    }
}
