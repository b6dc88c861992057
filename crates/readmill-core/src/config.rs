// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline configuration loaded from a JSON document.
//!
//! The document carries run-level settings (directories, manifests,
//! concurrency) plus a flat bag of workflow input keys that are passed
//! through to the engine, e.g. `PreProcessingForVariantDiscovery_GATK4.ref_fasta`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

fn default_max_concurrent_samples() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    5
}

/// Run-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory that receives per-sample output trees.
    pub project_dir: PathBuf,
    /// Checkout directory holding workflow documents and the engine jar.
    pub source_dir: PathBuf,
    /// Optional engine configuration file passed via `-Dconfig.file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_config: Option<PathBuf>,
    /// Manifest of aligned BAM inputs to convert and re-align.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bam_inputs: Option<PathBuf>,
    /// Manifest of paired FASTQ inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastq_inputs: Option<PathBuf>,
    /// Reference library directory (default: `<project_dir>/library`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,
    /// Maximum number of samples aligned at once.
    #[serde(default = "default_max_concurrent_samples")]
    pub max_concurrent_samples: usize,
    /// Seconds between engine liveness polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Stop admitting new samples after the first failure.
    #[serde(default)]
    pub fail_fast: bool,
    /// Remove hard-linked copies of consumed unmapped BAMs after alignment.
    #[serde(default)]
    pub clean_inputs: bool,
    /// Flat workflow input keys forwarded to the engine.
    #[serde(flatten)]
    pub workflow: Map<String, Value>,
}

impl PipelineConfig {
    /// Load configuration from a JSON file.
    ///
    /// A relative `source_dir` is resolved against the config file's
    /// directory; every other relative path is resolved against
    /// `source_dir`, so a config checked into the workflow checkout
    /// works from any working directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.source_dir = resolve(base, &config.source_dir);
        config.project_dir = resolve(&config.source_dir, &config.project_dir);
        if let Some(engine_config) = config.engine_config.take() {
            config.engine_config = Some(resolve(&config.source_dir, &engine_config));
        }
        if let Some(bam_inputs) = config.bam_inputs.take() {
            config.bam_inputs = Some(resolve(&config.source_dir, &bam_inputs));
        }
        if let Some(fastq_inputs) = config.fastq_inputs.take() {
            config.fastq_inputs = Some(resolve(&config.source_dir, &fastq_inputs));
        }
        if let Some(library) = config.library.take() {
            config.library = Some(resolve(&config.source_dir, &library));
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_samples == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_samples",
                "must be at least 1",
            ));
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::Invalid("poll_interval", "must be at least 1"));
        }
        Ok(())
    }

    /// Reference library directory, defaulting to `<project_dir>/library`.
    pub fn library_dir(&self) -> PathBuf {
        self.library
            .clone()
            .unwrap_or_else(|| self.project_dir.join("library"))
    }

    /// Workflow input value from the flat key bag, if present and a string.
    pub fn workflow_str(&self, key: &str) -> Option<&str> {
        self.workflow.get(key).and_then(Value::as_str)
    }

    /// Flat JSON view of the whole configuration.
    ///
    /// This is the shape persisted to the reference cache: run settings
    /// and workflow keys in a single object.
    pub fn flat_snapshot(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub(crate) fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file '{path}': {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid JSON or is missing required keys.
    #[error("cannot parse config file '{path}': {source}")]
    Parse {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// A setting has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("pipeline.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{"project_dir": "/data/run1", "source_dir": "/opt/workflows"}"#,
        );

        let config = PipelineConfig::load(&path).unwrap();

        assert_eq!(config.project_dir, PathBuf::from("/data/run1"));
        assert_eq!(config.source_dir, PathBuf::from("/opt/workflows"));
        assert_eq!(config.max_concurrent_samples, 4);
        assert_eq!(config.poll_interval, 5);
        assert!(!config.fail_fast);
        assert!(!config.clean_inputs);
        assert!(config.bam_inputs.is_none());
        assert_eq!(config.library_dir(), PathBuf::from("/data/run1/library"));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "project_dir": "runs/run1",
                "source_dir": "workflows",
                "bam_inputs": "manifests/bams.tsv",
                "engine_config": "cromwell.conf"
            }"#,
        );

        let config = PipelineConfig::load(&path).unwrap();

        let source = dir.path().join("workflows");
        assert_eq!(config.source_dir, source);
        assert_eq!(config.project_dir, source.join("runs/run1"));
        assert_eq!(config.bam_inputs, Some(source.join("manifests/bams.tsv")));
        assert_eq!(config.engine_config, Some(source.join("cromwell.conf")));
    }

    #[test]
    fn test_load_keeps_absolute_paths() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "project_dir": "/data/run1",
                "source_dir": "/opt/workflows",
                "fastq_inputs": "/data/manifests/fastqs.tsv",
                "library": "/refs/hg38"
            }"#,
        );

        let config = PipelineConfig::load(&path).unwrap();

        assert_eq!(
            config.fastq_inputs,
            Some(PathBuf::from("/data/manifests/fastqs.tsv"))
        );
        assert_eq!(config.library_dir(), PathBuf::from("/refs/hg38"));
    }

    #[test]
    fn test_load_collects_workflow_keys() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "project_dir": "/data/run1",
                "source_dir": "/opt/workflows",
                "PreProcessingForVariantDiscovery_GATK4.ref_name": "hg38",
                "PreProcessingForVariantDiscovery_GATK4.ref_fasta": "gs://refs/hg38.fasta"
            }"#,
        );

        let config = PipelineConfig::load(&path).unwrap();

        assert_eq!(
            config.workflow_str("PreProcessingForVariantDiscovery_GATK4.ref_name"),
            Some("hg38")
        );
        assert_eq!(
            config.workflow_str("PreProcessingForVariantDiscovery_GATK4.ref_fasta"),
            Some("gs://refs/hg38.fasta")
        );
    }

    #[test]
    fn test_flat_snapshot_includes_workflow_keys() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "project_dir": "/data/run1",
                "source_dir": "/opt/workflows",
                "PreProcessingForVariantDiscovery_GATK4.ref_name": "hg38"
            }"#,
        );

        let config = PipelineConfig::load(&path).unwrap();
        let snapshot = config.flat_snapshot();

        assert_eq!(
            snapshot.get("project_dir").and_then(Value::as_str),
            Some("/data/run1")
        );
        assert_eq!(
            snapshot
                .get("PreProcessingForVariantDiscovery_GATK4.ref_name")
                .and_then(Value::as_str),
            Some("hg38")
        );
        assert!(!snapshot.contains_key("bam_inputs"));
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "project_dir": "/data/run1",
                "source_dir": "/opt/workflows",
                "max_concurrent_samples": 0
            }"#,
        );

        let result = PipelineConfig::load(&path);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid("max_concurrent_samples", _))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = PipelineConfig::load(Path::new("/nonexistent/pipeline.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{not json");

        let result = PipelineConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
