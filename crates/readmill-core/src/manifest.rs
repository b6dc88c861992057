// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tabular input manifests.
//!
//! Two manifest shapes drive a run: BAM rows (one aligned BAM per row)
//! and FASTQ rows (one directory of paired reads per row). Files are
//! header-first, tab or comma separated, with `#` comment lines.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One aligned BAM to convert back to unmapped BAMs and re-align.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BamRow {
    /// Sample name (may contain `/`, sanitized at admission).
    pub sample: String,
    /// Grouping tag, e.g. `tumor` or `normal`.
    pub tag: String,
    /// Path to the input BAM.
    pub path: PathBuf,
}

/// One directory of paired FASTQ files for a sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastqRow {
    /// Sample name (may contain `/`, sanitized at admission).
    pub sample: String,
    /// Grouping tag, e.g. `tumor` or `normal`.
    pub tag: String,
    /// Directory containing the paired FASTQ files.
    pub path: PathBuf,
    /// Substring identifying first-of-pair files, e.g. `_R1_`.
    pub left_wildcard: String,
    /// Substring replacing the left wildcard to find mates, e.g. `_R2_`.
    pub right_wildcard: String,
    /// Sequencing center recorded in the read group.
    pub sequencing_center: String,
    /// Run date recorded in the read group.
    pub run_date: String,
}

/// Load a BAM manifest, skipping rows without a sample or path.
pub fn load_bam_manifest(path: &Path) -> Result<Vec<BamRow>, ManifestError> {
    let rows: Vec<BamRow> = load(path)?;
    Ok(rows
        .into_iter()
        .filter(|row| {
            if row.sample.is_empty() || row.path.as_os_str().is_empty() {
                warn!(manifest = %path.display(), "Skipping BAM row with empty sample or path");
                return false;
            }
            true
        })
        .collect())
}

/// Load a FASTQ manifest, skipping rows without a sample or path.
pub fn load_fastq_manifest(path: &Path) -> Result<Vec<FastqRow>, ManifestError> {
    let rows: Vec<FastqRow> = load(path)?;
    Ok(rows
        .into_iter()
        .filter(|row| {
            if row.sample.is_empty() || row.path.as_os_str().is_empty() {
                warn!(manifest = %path.display(), "Skipping FASTQ row with empty sample or path");
                return false;
            }
            true
        })
        .collect())
}

/// Replace path separators in a sample name so it is safe as a
/// directory component. `family1/child` becomes `family1#child`.
pub fn sanitize_sample_name(name: &str) -> String {
    name.replace('/', "#")
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?);
    }
    Ok(rows)
}

/// Pick tab or comma based on the header line.
fn sniff_delimiter(text: &str) -> u8 {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return if line.contains('\t') { b'\t' } else { b',' };
    }
    b'\t'
}

/// Manifest loading errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("cannot read manifest '{path}': {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A row could not be parsed into the expected columns.
    #[error("cannot parse manifest '{path}': {source}")]
    Parse {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },
}
