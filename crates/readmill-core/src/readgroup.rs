// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readgroup derivation from FASTQ headers.
//!
//! The first read header of the first-of-pair file determines the
//! readgroup name and platform unit. Two Illumina header layouts are
//! recognized:
//!
//! - current, 7 colon fields: `@instrument:run:flowcell:lane:tile:x:y ...`
//!   gives platform unit `flowcell.lane` and readgroup
//!   `<sample>.<run>.<flowcell>.<lane>`
//! - legacy, 5 colon fields: `@instrument:lane:tile:x:y#index/pair`
//!   gives platform unit from fields 2 and 3 and readgroup
//!   `<sample>.<platform unit>`

use crate::error::StageError;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Readgroup identity parsed from a read header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readgroup {
    /// Readgroup name, also used to key the input descriptor and output BAM.
    pub name: String,
    /// Platform unit recorded in the unmapped BAM.
    pub platform_unit: String,
}

/// Derive the readgroup for `sample` from the first header of `fastq`.
///
/// Transparently decompresses `.gz` files.
pub fn derive_readgroup(sample: &str, fastq: &Path) -> Result<Readgroup, StageError> {
    let line = first_line(fastq)?;
    parse_header(sample, &line, fastq)
}

fn first_line(path: &Path) -> Result<String, StageError> {
    let file = File::open(path)?;
    let mut line = String::new();
    let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
    if is_gzip {
        BufReader::new(MultiGzDecoder::new(file)).read_line(&mut line)?;
    } else {
        BufReader::new(file).read_line(&mut line)?;
    }
    Ok(line)
}

fn parse_header(sample: &str, line: &str, path: &Path) -> Result<Readgroup, StageError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(StageError::ReadHeaderParse {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }

    // Only the first whitespace-separated token identifies the read;
    // legacy headers append the pair number after a slash.
    let token = line.split_whitespace().next().unwrap_or_default();
    let token = token.trim_start_matches('@');
    let token = token.split('/').next().unwrap_or_default();
    let fields: Vec<&str> = token.split(':').collect();

    match fields.len() {
        7 => {
            let platform_unit = format!("{}.{}", fields[2], fields[3]);
            Ok(Readgroup {
                name: format!("{}.{}.{}", sample, fields[1], platform_unit),
                platform_unit,
            })
        }
        5 => {
            let platform_unit = format!("{}.{}", fields[1], fields[2]);
            Ok(Readgroup {
                name: format!("{}.{}", sample, platform_unit),
                platform_unit,
            })
        }
        n => Err(StageError::ReadHeaderParse {
            path: path.to_path_buf(),
            reason: format!("expected 5 or 7 colon-separated fields, found {}", n),
        }),
    }
}
