// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sample admission and bounded-concurrency scheduling.
//!
//! Manifest rows become per-sample stage chains running on their own
//! tasks. The scheduler admits chains in manifest order and applies
//! coarse backpressure: once the in-flight set exceeds the configured
//! maximum it drains the whole batch before admitting more. Every chain
//! resolves to a per-sample outcome collected into an end-of-run report;
//! one failing sample never takes its siblings down.

use crate::config::{PipelineConfig, resolve};
use crate::error::StageError;
use crate::manifest::{BamRow, FastqRow, sanitize_sample_name};
use crate::stage::{AlignOutcome, StageRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Terminal state of one sample chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleStatus {
    /// The alignment stage ran and succeeded.
    Aligned,
    /// The alignment checkpoint already existed; nothing ran.
    Resumed,
    /// The chain finished without aligning (e.g. no inputs found).
    Skipped {
        /// Why the sample was skipped.
        reason: String,
    },
    /// A stage failed.
    Failed {
        /// Stage that failed.
        stage: String,
        /// Rendered error.
        error: String,
    },
}

/// Outcome of one admitted sample chain.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    /// Sanitized sample name.
    pub sample: String,
    /// Grouping tag.
    pub tag: String,
    /// Terminal state.
    pub status: SampleStatus,
}

impl SampleOutcome {
    /// Whether this sample's chain failed.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, SampleStatus::Failed { .. })
    }
}

/// End-of-run aggregation of every admitted sample.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Outcomes in completion-collection order.
    pub outcomes: Vec<SampleOutcome>,
}

impl RunReport {
    /// Samples aligned by this run.
    pub fn aligned(&self) -> usize {
        self.count(|status| matches!(status, SampleStatus::Aligned))
    }

    /// Samples satisfied by an existing checkpoint.
    pub fn resumed(&self) -> usize {
        self.count(|status| matches!(status, SampleStatus::Resumed))
    }

    /// Samples skipped without aligning.
    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, SampleStatus::Skipped { .. }))
    }

    /// Samples whose chain failed.
    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, SampleStatus::Failed { .. }))
    }

    /// Whether any sample failed.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(SampleOutcome::is_failure)
    }

    /// Log one summary line plus a warning per failed sample.
    pub fn log_summary(&self) {
        info!(
            total = self.outcomes.len(),
            aligned = self.aligned(),
            resumed = self.resumed(),
            skipped = self.skipped(),
            failed = self.failed(),
            "Run complete"
        );
        for outcome in &self.outcomes {
            if let SampleStatus::Failed { stage, error } = &outcome.status {
                warn!(
                    sample = %outcome.sample,
                    tag = %outcome.tag,
                    stage = %stage,
                    error = %error,
                    "Sample failed"
                );
            }
        }
    }

    fn count(&self, predicate: impl Fn(&SampleStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

enum ChainInput {
    Bam(BamRow),
    Fastq(FastqRow),
}

/// Admits sample chains and bounds how many run at once.
pub struct SampleScheduler {
    runner: StageRunner,
    config: Arc<PipelineConfig>,
}

impl SampleScheduler {
    /// Create a scheduler over a prepared stage runner.
    pub fn new(runner: StageRunner, config: Arc<PipelineConfig>) -> Self {
        Self { runner, config }
    }

    /// Run every manifest row to completion and report per-sample
    /// outcomes. BAM rows are admitted before FASTQ rows, in manifest
    /// order. With `fail_fast` set, admission stops at the first drained
    /// batch containing a failure; chains already in flight still finish.
    pub async fn run(&self, bams: Vec<BamRow>, fastqs: Vec<FastqRow>) -> RunReport {
        let inputs = bams
            .into_iter()
            .map(ChainInput::Bam)
            .chain(fastqs.into_iter().map(ChainInput::Fastq));

        let mut report = RunReport::default();
        let mut in_flight: Vec<(String, String, JoinHandle<SampleStatus>)> = Vec::new();

        for input in inputs {
            in_flight.push(self.admit(input));

            if in_flight.len() > self.config.max_concurrent_samples {
                self.drain(&mut in_flight, &mut report).await;
                if self.config.fail_fast && report.has_failures() {
                    warn!("Stopping admission after batch failure");
                    break;
                }
            }
        }

        self.drain(&mut in_flight, &mut report).await;
        report
    }

    fn admit(&self, input: ChainInput) -> (String, String, JoinHandle<SampleStatus>) {
        let runner = self.runner.clone();
        let project_dir = self.config.project_dir.clone();
        match input {
            ChainInput::Bam(row) => {
                let sample = sanitize_sample_name(&row.sample);
                let tag = row.tag.clone();
                info!(sample = %sample, tag = %tag, kind = "bam", "Admitting sample");
                let handle = {
                    let sample = sample.clone();
                    tokio::spawn(async move { run_bam_chain(runner, project_dir, sample, row).await })
                };
                (sample, tag, handle)
            }
            ChainInput::Fastq(row) => {
                let sample = sanitize_sample_name(&row.sample);
                let tag = row.tag.clone();
                info!(sample = %sample, tag = %tag, kind = "fastq", "Admitting sample");
                let handle = {
                    let sample = sample.clone();
                    tokio::spawn(
                        async move { run_fastq_chain(runner, project_dir, sample, row).await },
                    )
                };
                (sample, tag, handle)
            }
        }
    }

    async fn drain(
        &self,
        in_flight: &mut Vec<(String, String, JoinHandle<SampleStatus>)>,
        report: &mut RunReport,
    ) {
        for (sample, tag, handle) in in_flight.drain(..) {
            let status = match handle.await {
                Ok(status) => status,
                Err(join_error) => SampleStatus::Failed {
                    stage: "chain".to_string(),
                    error: join_error.to_string(),
                },
            };
            if let SampleStatus::Failed { stage, error } = &status {
                error!(
                    sample = %sample,
                    tag = %tag,
                    stage = %stage,
                    error = %error,
                    "Sample chain failed"
                );
            }
            report.outcomes.push(SampleOutcome {
                sample,
                tag,
                status,
            });
        }
    }
}

async fn run_bam_chain(
    runner: StageRunner,
    project_dir: PathBuf,
    sample: String,
    row: BamRow,
) -> SampleStatus {
    let bam = resolve(&project_dir, &row.path);
    if let Err(stage_error) = runner.bam_to_ubam(&sample, &row.tag, &bam).await {
        return failed("bam_to_ubam", stage_error);
    }
    align_status(runner.align(&sample, &row.tag).await)
}

async fn run_fastq_chain(
    runner: StageRunner,
    project_dir: PathBuf,
    sample: String,
    row: FastqRow,
) -> SampleStatus {
    let dir = resolve(&project_dir, &row.path);
    let pairs = match discover_pairs(&dir, &row.left_wildcard, &row.right_wildcard).await {
        Ok(pairs) => pairs,
        Err(io_error) => return failed("pair_discovery", StageError::Io(io_error)),
    };
    if pairs.is_empty() {
        warn!(sample = %sample, dir = %dir.display(), "No read pairs found");
    }

    let mut handles = Vec::with_capacity(pairs.len());
    for (fastq_1, fastq_2) in pairs {
        let runner = runner.clone();
        let sample = sample.clone();
        let tag = row.tag.clone();
        let center = row.sequencing_center.clone();
        let run_date = row.run_date.clone();
        handles.push(tokio::spawn(async move {
            runner
                .fastq_to_ubam(&sample, &tag, &fastq_1, &fastq_2, &center, &run_date)
                .await
        }));
    }

    let mut ubams: Vec<PathBuf> = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(conversion)) => {
                if !ubams.contains(&conversion.ubam) {
                    ubams.push(conversion.ubam);
                }
            }
            Ok(Err(stage_error)) => {
                if first_error.is_none() {
                    first_error = Some(stage_error);
                }
            }
            Err(join_error) => {
                if first_error.is_none() {
                    first_error = Some(StageError::Io(std::io::Error::other(
                        join_error.to_string(),
                    )));
                }
            }
        }
    }
    if let Some(stage_error) = first_error {
        return failed("fastq_to_ubam", stage_error);
    }

    if let Err(stage_error) = runner.ensure_ubam_list(&sample, &row.tag, &ubams).await {
        return failed("ubam_list", stage_error);
    }
    align_status(runner.align(&sample, &row.tag).await)
}

/// Find left/right read-pair files under `dir`.
///
/// Every file containing the left marker is paired with the file named
/// by substituting the right marker; left files without a mate are
/// logged and skipped. Pairs come back sorted by left file name.
pub async fn discover_pairs(
    dir: &Path,
    left: &str,
    right: &str,
) -> std::io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut lefts = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains(left) {
            lefts.push(name);
        }
    }
    lefts.sort();

    let mut pairs = Vec::with_capacity(lefts.len());
    for name in lefts {
        let mate = name.replace(left, right);
        let left_path = dir.join(&name);
        let right_path = dir.join(&mate);
        let mate_exists = fs::metadata(&right_path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if mate_exists {
            pairs.push((left_path, right_path));
        } else {
            warn!(file = %left_path.display(), "No matching mate file, skipping");
        }
    }
    Ok(pairs)
}

fn failed(stage: &str, stage_error: StageError) -> SampleStatus {
    SampleStatus::Failed {
        stage: stage.to_string(),
        error: stage_error.to_string(),
    }
}

fn align_status(result: crate::error::Result<AlignOutcome>) -> SampleStatus {
    match result {
        Ok(AlignOutcome::Aligned) => SampleStatus::Aligned,
        Ok(AlignOutcome::AlreadyAligned) => SampleStatus::Resumed,
        Ok(AlignOutcome::NoInputs) => SampleStatus::Skipped {
            reason: "no unmapped BAMs to align".to_string(),
        },
        Err(stage_error) => failed("align", stage_error),
    }
}
