// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readmill - Sequencing Pipeline Orchestrator
//!
//! Loads the pipeline configuration, prepares the shared reference
//! library, then runs every manifest row through its stage chain under
//! the configured concurrency cap. Exits non-zero when any sample
//! failed, after logging the end-of-run report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{error, info, warn};

use readmill_core::command::HostRunner;
use readmill_core::config::PipelineConfig;
use readmill_core::engine::CromwellEngine;
use readmill_core::library::ReferenceLibrarian;
use readmill_core::manifest;
use readmill_core::scheduler::SampleScheduler;
use readmill_core::stage::StageRunner;

fn print_usage() {
    eprintln!("Usage: readmill <pipeline-config.json>");
    eprintln!();
    eprintln!("The config path may also be given via READMILL_CONFIG.");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("readmill_core=info".parse().unwrap())
                .add_directive("readmill=info".parse().unwrap()),
        )
        .init();

    let config_path = match std::env::args()
        .nth(1)
        .or_else(|| std::env::var("READMILL_CONFIG").ok())
    {
        Some(path) => PathBuf::from(path),
        None => {
            print_usage();
            bail!("no pipeline config given");
        }
    };

    info!("Starting Readmill");

    // Load configuration
    let config = Arc::new(PipelineConfig::load(&config_path).map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?);

    info!(
        project_dir = %config.project_dir.display(),
        source_dir = %config.source_dir.display(),
        max_concurrent_samples = config.max_concurrent_samples,
        "Configuration loaded"
    );

    let bams = match &config.bam_inputs {
        Some(path) => manifest::load_bam_manifest(path)?,
        None => Vec::new(),
    };
    let fastqs = match &config.fastq_inputs {
        Some(path) => manifest::load_fastq_manifest(path)?,
        None => Vec::new(),
    };
    if bams.is_empty() && fastqs.is_empty() {
        warn!("Manifests contain no input rows, nothing to do");
        return Ok(());
    }
    info!(
        bam_rows = bams.len(),
        fastq_rows = fastqs.len(),
        "Manifests loaded"
    );

    // Reference data must be fully materialized before any sample's
    // alignment stage can read it.
    let runner = Arc::new(HostRunner::new());
    let librarian = ReferenceLibrarian::new(&config, runner);
    let mut localized = librarian.localize(&config).await?;
    librarian.prepare_auxiliary_files(&mut localized).await?;
    info!(library = %librarian.library().display(), "Reference library ready");

    let engine = Arc::new(CromwellEngine::new(&config)?);
    let stage_runner = StageRunner::new(engine, config.clone(), Arc::new(localized));
    let scheduler = SampleScheduler::new(stage_runner, config.clone());

    let report = scheduler.run(bams, fastqs).await;
    report.log_summary();

    if report.has_failures() {
        bail!(
            "{} of {} samples failed",
            report.failed(),
            report.outcomes.len()
        );
    }
    Ok(())
}
