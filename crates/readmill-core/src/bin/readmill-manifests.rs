// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readmill Manifest Generator
//!
//! Scans a project directory for raw sample data and writes the two
//! manifest files the pipeline consumes. Each sample is a directory
//! directly under the project root; inside it, `Normal/` and `Tumor/`
//! hold aligned BAMs and `FastQ/Normal/`, `FastQ/Tumor/` hold paired
//! reads.
//!
//! Usage:
//!   readmill-manifests --project-dir <path> [options]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use readmill_core::manifest::{BamRow, FastqRow};

/// Tag subdirectories recognized inside a sample directory.
const TAGS: [&str; 2] = ["Normal", "Tumor"];

/// Subdirectory holding per-tag FASTQ directories.
const FASTQ_DIR: &str = "FastQ";

/// Pipeline-owned directories that are never samples.
const SKIP_DIRS: [&str; 2] = ["processed", "library"];

fn print_usage() {
    eprintln!(
        r#"Usage: readmill-manifests --project-dir <path> [options]

Scan a project directory and write bams.tsv / fastqs.tsv manifests.

Each subdirectory of the project directory is treated as one sample.
BAM rows come from <sample>/Normal/*.bam and <sample>/Tumor/*.bam;
FASTQ rows come from <sample>/FastQ/Normal and <sample>/FastQ/Tumor.

OPTIONS:
    --project-dir <path>        Project directory to scan (required)
    --output-dir <path>         Where to write the manifests (default: project dir)
    --left-wildcard <text>      Substring naming first-of-pair files (default: _R1_)
    --right-wildcard <text>     Substring naming second-of-pair files (default: _R2_)
    --sequencing-center <name>  Sequencing center for FASTQ rows (default: unknown)
    --run-date <date>           Run date for FASTQ rows (default: today, UTC)

EXAMPLES:
    # Scan /data/project and write manifests next to the samples
    readmill-manifests --project-dir /data/project

    # Different read-pair naming convention
    readmill-manifests --project-dir /data/project \
        --left-wildcard _1.fq --right-wildcard _2.fq
"#
    );
}

#[derive(Debug)]
struct Options {
    project_dir: PathBuf,
    output_dir: Option<PathBuf>,
    left_wildcard: String,
    right_wildcard: String,
    sequencing_center: String,
    run_date: String,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Options, String> {
    let mut project_dir: Option<PathBuf> = None;
    let mut output_dir: Option<PathBuf> = None;
    let mut left_wildcard = "_R1_".to_string();
    let mut right_wildcard = "_R2_".to_string();
    let mut sequencing_center = "unknown".to_string();
    let mut run_date: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "help" | "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--project-dir" => {
                i += 1;
                project_dir = Some(PathBuf::from(
                    args.get(i).ok_or("--project-dir requires a path")?,
                ));
            }
            "--output-dir" => {
                i += 1;
                output_dir = Some(PathBuf::from(
                    args.get(i).ok_or("--output-dir requires a path")?,
                ));
            }
            "--left-wildcard" => {
                i += 1;
                left_wildcard = args
                    .get(i)
                    .ok_or("--left-wildcard requires a value")?
                    .clone();
            }
            "--right-wildcard" => {
                i += 1;
                right_wildcard = args
                    .get(i)
                    .ok_or("--right-wildcard requires a value")?
                    .clone();
            }
            "--sequencing-center" => {
                i += 1;
                sequencing_center = args
                    .get(i)
                    .ok_or("--sequencing-center requires a value")?
                    .clone();
            }
            "--run-date" => {
                i += 1;
                run_date = Some(args.get(i).ok_or("--run-date requires a value")?.clone());
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }

    Ok(Options {
        project_dir: project_dir.ok_or("--project-dir is required")?,
        output_dir,
        left_wildcard,
        right_wildcard,
        sequencing_center,
        run_date: run_date
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string()),
    })
}

fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(options: Options) -> Result<(), String> {
    let project_dir = fs::canonicalize(&options.project_dir).map_err(|e| {
        format!(
            "Cannot open project directory {}: {}",
            options.project_dir.display(),
            e
        )
    })?;

    let (bams, fastqs) = scan_project(&project_dir, &options)?;

    let output_dir = options.output_dir.as_deref().unwrap_or(&project_dir);
    fs::create_dir_all(output_dir)
        .map_err(|e| format!("Cannot create {}: {}", output_dir.display(), e))?;

    let bam_manifest = output_dir.join("bams.tsv");
    write_rows(&bam_manifest, &bams)?;
    println!("Wrote {} BAM rows to {}", bams.len(), bam_manifest.display());

    let fastq_manifest = output_dir.join("fastqs.tsv");
    write_rows(&fastq_manifest, &fastqs)?;
    println!(
        "Wrote {} FASTQ rows to {}",
        fastqs.len(),
        fastq_manifest.display()
    );

    Ok(())
}

/// Walk the project directory and collect one BAM row per `.bam` file
/// and one FASTQ row per `FastQ/<tag>` directory.
fn scan_project(
    project_dir: &Path,
    options: &Options,
) -> Result<(Vec<BamRow>, Vec<FastqRow>), String> {
    let mut bams = Vec::new();
    let mut fastqs = Vec::new();

    for sample_dir in sorted_dirs(project_dir)? {
        let Some(sample) = dir_name(&sample_dir) else {
            continue;
        };
        if sample.starts_with('.') || SKIP_DIRS.contains(&sample.as_str()) {
            continue;
        }

        for tag in TAGS {
            let bam_dir = sample_dir.join(tag);
            if bam_dir.is_dir() {
                for bam in sorted_bam_files(&bam_dir)? {
                    bams.push(BamRow {
                        sample: sample.clone(),
                        tag: tag.to_lowercase(),
                        path: bam,
                    });
                }
            }

            let fastq_dir = sample_dir.join(FASTQ_DIR).join(tag);
            if fastq_dir.is_dir() {
                fastqs.push(FastqRow {
                    sample: sample.clone(),
                    tag: tag.to_lowercase(),
                    path: fastq_dir,
                    left_wildcard: options.left_wildcard.clone(),
                    right_wildcard: options.right_wildcard.clone(),
                    sequencing_center: options.sequencing_center.clone(),
                    run_date: options.run_date.clone(),
                });
            }
        }
    }

    Ok((bams, fastqs))
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("Cannot read {}: {}", dir.display(), e))?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn sorted_bam_files(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("Cannot read {}: {}", dir.display(), e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|extension| extension == "bam")
        })
        .collect();
    files.sort();
    Ok(files)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn write_rows<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<(), String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| format!("Cannot write {}: {}", path.display(), e))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| format!("Cannot write {}: {}", path.display(), e))?;
    }
    writer
        .flush()
        .map_err(|e| format!("Cannot write {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use readmill_core::manifest::{load_bam_manifest, load_fastq_manifest};
    use tempfile::TempDir;

    // Helper to create args vector from string slice
    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_missing_project_dir() {
        let result = parse_args_from_vec(&args(&["readmill-manifests"]));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("--project-dir is required"));
    }

    #[test]
    fn test_parse_missing_project_dir_value() {
        let result = parse_args_from_vec(&args(&["readmill-manifests", "--project-dir"]));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("--project-dir requires a path"));
    }

    #[test]
    fn test_parse_unknown_argument() {
        let result = parse_args_from_vec(&args(&[
            "readmill-manifests",
            "--project-dir",
            "/data",
            "--frobnicate",
        ]));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Unknown argument"));
    }

    #[test]
    fn test_parse_defaults() {
        let options = parse_args_from_vec(&args(&[
            "readmill-manifests",
            "--project-dir",
            "/data/project",
        ]))
        .unwrap();
        assert_eq!(options.project_dir, PathBuf::from("/data/project"));
        assert!(options.output_dir.is_none());
        assert_eq!(options.left_wildcard, "_R1_");
        assert_eq!(options.right_wildcard, "_R2_");
        assert_eq!(options.sequencing_center, "unknown");
        assert!(!options.run_date.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let options = parse_args_from_vec(&args(&[
            "readmill-manifests",
            "--project-dir",
            "/data/project",
            "--output-dir",
            "/tmp/manifests",
            "--left-wildcard",
            "_1.fq",
            "--right-wildcard",
            "_2.fq",
            "--sequencing-center",
            "BGI",
            "--run-date",
            "2024-06-01",
        ]))
        .unwrap();
        assert_eq!(options.output_dir, Some(PathBuf::from("/tmp/manifests")));
        assert_eq!(options.left_wildcard, "_1.fq");
        assert_eq!(options.right_wildcard, "_2.fq");
        assert_eq!(options.sequencing_center, "BGI");
        assert_eq!(options.run_date, "2024-06-01");
    }

    fn test_options(project_dir: &Path) -> Options {
        Options {
            project_dir: project_dir.to_path_buf(),
            output_dir: None,
            left_wildcard: "_R1_".to_string(),
            right_wildcard: "_R2_".to_string(),
            sequencing_center: "unknown".to_string(),
            run_date: "2024-06-01".to_string(),
        }
    }

    #[test]
    fn test_scan_finds_bams_and_fastq_dirs() {
        let project = TempDir::new().unwrap();
        let sample = project.path().join("NA12878");
        fs::create_dir_all(sample.join("Normal")).unwrap();
        fs::write(sample.join("Normal/b.bam"), b"bam").unwrap();
        fs::write(sample.join("Normal/a.bam"), b"bam").unwrap();
        fs::write(sample.join("Normal/notes.txt"), b"not a bam").unwrap();
        fs::create_dir_all(sample.join("FastQ/Tumor")).unwrap();

        let (bams, fastqs) = scan_project(project.path(), &test_options(project.path())).unwrap();

        assert_eq!(bams.len(), 2);
        assert_eq!(bams[0].sample, "NA12878");
        assert_eq!(bams[0].tag, "normal");
        assert_eq!(bams[0].path, sample.join("Normal/a.bam"));
        assert_eq!(bams[1].path, sample.join("Normal/b.bam"));

        assert_eq!(fastqs.len(), 1);
        assert_eq!(fastqs[0].tag, "tumor");
        assert_eq!(fastqs[0].path, sample.join("FastQ/Tumor"));
        assert_eq!(fastqs[0].run_date, "2024-06-01");
    }

    #[test]
    fn test_scan_skips_pipeline_directories() {
        let project = TempDir::new().unwrap();
        for skipped in ["processed", "library", ".snapshot"] {
            fs::create_dir_all(project.path().join(skipped).join("Normal")).unwrap();
            fs::write(
                project.path().join(skipped).join("Normal/x.bam"),
                b"bam",
            )
            .unwrap();
        }

        let (bams, fastqs) = scan_project(project.path(), &test_options(project.path())).unwrap();
        assert!(bams.is_empty());
        assert!(fastqs.is_empty());
    }

    #[test]
    fn test_written_manifests_load_back() {
        let project = TempDir::new().unwrap();
        let sample = project.path().join("S1");
        fs::create_dir_all(sample.join("Tumor")).unwrap();
        fs::write(sample.join("Tumor/s1.bam"), b"bam").unwrap();
        fs::create_dir_all(sample.join("FastQ/Normal")).unwrap();

        run(test_options(project.path())).unwrap();

        let bams = load_bam_manifest(&project.path().join("bams.tsv")).unwrap();
        assert_eq!(bams.len(), 1);
        assert_eq!(bams[0].sample, "S1");
        assert_eq!(bams[0].tag, "tumor");

        let fastqs = load_fastq_manifest(&project.path().join("fastqs.tsv")).unwrap();
        assert_eq!(fastqs.len(), 1);
        assert_eq!(fastqs[0].left_wildcard, "_R1_");
        assert_eq!(fastqs[0].sequencing_center, "unknown");
    }
}
