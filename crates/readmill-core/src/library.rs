// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reference library localization and auxiliary file preparation.
//!
//! Alignment workflows consume a fixed set of reference files (fasta,
//! indices, known-sites VCFs). The librarian copies or downloads each
//! configured reference into a local library directory once, derives the
//! auxiliary files the aligner needs (bwa index, sequence dictionary,
//! tabix indices), and persists the resulting key-to-local-path mapping
//! as a cache so later runs skip the work entirely.

use crate::command::{CommandOutput, CommandRunner};
use crate::config::PipelineConfig;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Namespace marking workflow reference keys. Keys containing this
/// substring are owned by the cache after first localization.
pub const REFERENCE_NAMESPACE: &str = "PreProcessingForVariantDiscovery";

const CACHE_FILE: &str = "localized_config.json";

const REF_FASTA_KEY: &str = "PreProcessingForVariantDiscovery_GATK4.ref_fasta";
const REF_DICT_KEY: &str = "PreProcessingForVariantDiscovery_GATK4.ref_dict";
const KNOWN_SITES_VCFS_KEY: &str = "PreProcessingForVariantDiscovery_GATK4.known_indels_sites_VCFs";
const KNOWN_SITES_INDICES_KEY: &str =
    "PreProcessingForVariantDiscovery_GATK4.known_indels_sites_indices";
const BWA_PROBE_KEY: &str = "PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_sa";

/// Workflow keys naming a single reference file.
const SINGLE_FILE_KEYS: [&str; 11] = [
    "PreProcessingForVariantDiscovery_GATK4.ref_dict",
    "PreProcessingForVariantDiscovery_GATK4.ref_fasta",
    "PreProcessingForVariantDiscovery_GATK4.ref_fasta_index",
    "PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_alt",
    "PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_sa",
    "PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_amb",
    "PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_bwt",
    "PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_ann",
    "PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_pac",
    "PreProcessingForVariantDiscovery_GATK4.dbSNP_vcf",
    "PreProcessingForVariantDiscovery_GATK4.dbSNP_vcf_index",
];

/// Workflow keys naming a list of reference files.
const LIST_FILE_KEYS: [&str; 2] = [KNOWN_SITES_VCFS_KEY, KNOWN_SITES_INDICES_KEY];

/// bwa index output suffixes and the workflow keys they satisfy.
const BWA_SUFFIX_KEYS: [(&str, &str); 5] = [
    ("PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_sa", "sa"),
    ("PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_amb", "amb"),
    ("PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_bwt", "bwt"),
    ("PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_ann", "ann"),
    ("PreProcessingForVariantDiscovery_GATK4.SamToFastqAndBwaMem.ref_pac", "pac"),
];

const BWA_IMAGE: &str = "biocontainers/bwa:v0.7.17_cv1";
const GATK_IMAGE: &str = "broadinstitute/gatk:4.1.8.1";

/// Whether a workflow key names a reference artifact managed by the cache.
pub fn is_reference_key(key: &str) -> bool {
    key.contains(REFERENCE_NAMESPACE)
}

/// Flat key-to-value snapshot with reference keys rewritten to local
/// library paths. This is what stage input descriptors are built from.
#[derive(Debug, Clone, Default)]
pub struct LocalizedConfig {
    entries: Map<String, Value>,
}

impl LocalizedConfig {
    /// Wrap an existing flat map.
    pub fn new(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    /// String value for `key`, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// String list for `key`; empty when absent or not an array.
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.entries.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace `key`.
    pub fn set(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    /// All entries.
    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Clone of the entries whose keys belong to the reference namespace.
    /// Stage input descriptors start from this subset.
    pub fn reference_entries(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .filter(|(key, _)| is_reference_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Localizes references into the library and derives auxiliary files.
pub struct ReferenceLibrarian {
    runner: Arc<dyn CommandRunner>,
    library: PathBuf,
    cache_path: PathBuf,
}

impl ReferenceLibrarian {
    /// Create a librarian for the configured library directory.
    pub fn new(config: &PipelineConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let library = config.library_dir();
        let cache_path = library.join(CACHE_FILE);
        Self {
            runner,
            library,
            cache_path,
        }
    }

    /// Library directory this librarian manages.
    pub fn library(&self) -> &Path {
        &self.library
    }

    /// Path of the persisted cache file.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Produce the localized configuration for this run.
    ///
    /// When a readable cache exists, its reference keys win and only the
    /// non-reference run settings are refreshed from `config`. Otherwise
    /// every configured reference is fetched into the library and the new
    /// mapping is persisted.
    pub async fn localize(&self, config: &PipelineConfig) -> Result<LocalizedConfig, LibraryError> {
        fs::create_dir_all(&self.library).await?;
        let fresh = config.flat_snapshot();

        if let Some(mut cached) = self.load_cache().await? {
            for (key, value) in &fresh {
                if !is_reference_key(key) {
                    cached.insert(key.clone(), value.clone());
                }
            }
            let localized = LocalizedConfig::new(cached);
            self.persist(&localized).await?;
            info!(cache = %self.cache_path.display(), "Reusing localized reference cache");
            return Ok(localized);
        }

        info!(library = %self.library.display(), "Localizing references");
        let mut localized = LocalizedConfig::new(fresh);

        for key in SINGLE_FILE_KEYS {
            let Some(value) = localized.get_str(key).map(str::to_string) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let local = self.fetch(key, &value).await?;
            localized.set(key, Value::String(path_string(&local)));
        }

        for key in LIST_FILE_KEYS {
            let values = localized.get_str_list(key);
            if values.is_empty() {
                continue;
            }
            let mut locals = Vec::with_capacity(values.len());
            for value in &values {
                let local = self.fetch(key, value).await?;
                locals.push(Value::String(path_string(&local)));
            }
            localized.set(key, Value::Array(locals));
        }

        self.persist(&localized).await?;
        info!(cache = %self.cache_path.display(), "Reference localization complete");
        Ok(localized)
    }

    /// Derive the auxiliary files the aligner needs but the configuration
    /// does not provide: bwa index, sequence dictionary, and tabix
    /// indices for known-sites VCFs. The cache is persisted after each
    /// derivation so an interrupted run resumes past completed steps.
    pub async fn prepare_auxiliary_files(
        &self,
        localized: &mut LocalizedConfig,
    ) -> Result<(), LibraryError> {
        self.ensure_bwa_index(localized).await?;
        self.ensure_sequence_dictionary(localized).await?;
        self.ensure_vcf_indices(localized).await?;
        self.persist(localized).await?;
        Ok(())
    }

    async fn ensure_bwa_index(&self, localized: &mut LocalizedConfig) -> Result<(), LibraryError> {
        if localized.contains(BWA_PROBE_KEY) {
            return Ok(());
        }
        let fasta = self.localized_fasta(localized, "bwa index")?;

        info!(fasta = %fasta, "Building bwa index");
        let output = self
            .docker_run(true, BWA_IMAGE, &["bwa", "index", &fasta])
            .await?;
        if !output.success() {
            return Err(LibraryError::AuxiliaryPreparation {
                artifact: "bwa index".to_string(),
                reason: exit_reason(&output),
            });
        }

        for (key, suffix) in BWA_SUFFIX_KEYS {
            localized.set(key, Value::String(format!("{fasta}.{suffix}")));
        }
        self.persist(localized).await
    }

    async fn ensure_sequence_dictionary(
        &self,
        localized: &mut LocalizedConfig,
    ) -> Result<(), LibraryError> {
        if localized.contains(REF_DICT_KEY) {
            return Ok(());
        }
        let fasta = self.localized_fasta(localized, "sequence dictionary")?;
        let dict = Path::new(&fasta).with_extension("dict");
        let dict_str = path_string(&dict);

        if !is_file(&dict).await {
            info!(dict = %dict_str, "Creating sequence dictionary");
            let output = self
                .docker_run(
                    false,
                    GATK_IMAGE,
                    &[
                        "gatk",
                        "CreateSequenceDictionary",
                        "--REFERENCE",
                        &fasta,
                        "--OUTPUT",
                        &dict_str,
                    ],
                )
                .await?;
            if !output.success() {
                return Err(LibraryError::AuxiliaryPreparation {
                    artifact: "sequence dictionary".to_string(),
                    reason: exit_reason(&output),
                });
            }
        }

        localized.set(REF_DICT_KEY, Value::String(dict_str));
        self.persist(localized).await
    }

    async fn ensure_vcf_indices(
        &self,
        localized: &mut LocalizedConfig,
    ) -> Result<(), LibraryError> {
        if !localized.get_str_list(KNOWN_SITES_INDICES_KEY).is_empty() {
            return Ok(());
        }
        let vcfs = localized.get_str_list(KNOWN_SITES_VCFS_KEY);
        if vcfs.is_empty() {
            debug!("No known-sites VCFs configured, skipping index derivation");
            return Ok(());
        }

        let mut compressed = Vec::with_capacity(vcfs.len());
        let mut indices = Vec::with_capacity(vcfs.len());
        for vcf in vcfs {
            let vcf = if vcf.ends_with(".gz") {
                vcf
            } else {
                info!(vcf = %vcf, "Compressing known-sites VCF with bgzip");
                let output = self.docker_run(false, GATK_IMAGE, &["bgzip", &vcf]).await?;
                if !output.success() {
                    return Err(LibraryError::AuxiliaryPreparation {
                        artifact: format!("bgzip of '{vcf}'"),
                        reason: exit_reason(&output),
                    });
                }
                format!("{vcf}.gz")
            };

            let index = format!("{vcf}.tbi");
            if !is_file(Path::new(&index)).await {
                info!(vcf = %vcf, "Indexing known-sites VCF with tabix");
                let output = self
                    .docker_run(false, GATK_IMAGE, &["tabix", "-f", "-p", "vcf", &vcf])
                    .await?;
                if !output.success() {
                    return Err(LibraryError::AuxiliaryPreparation {
                        artifact: format!("tabix index of '{vcf}'"),
                        reason: exit_reason(&output),
                    });
                }
            }

            compressed.push(Value::String(vcf));
            indices.push(Value::String(index));
        }

        localized.set(KNOWN_SITES_VCFS_KEY, Value::Array(compressed));
        localized.set(KNOWN_SITES_INDICES_KEY, Value::Array(indices));
        self.persist(localized).await
    }

    /// Bring one reference into the library, preferring an existing copy.
    async fn fetch(&self, key: &str, value: &str) -> Result<PathBuf, LibraryError> {
        let name = Path::new(value)
            .file_name()
            .ok_or_else(|| LibraryError::Localization {
                key: key.to_string(),
                reason: format!("'{value}' has no file name"),
            })?;
        let dest = self.library.join(name);

        if is_file(&dest).await {
            debug!(path = %dest.display(), "Reference already in library");
            return Ok(dest);
        }

        if is_file(Path::new(value)).await {
            info!(source = %value, dest = %dest.display(), "Copying reference into library");
            fs::copy(value, &dest).await?;
        } else if value.starts_with("gs://") {
            info!(source = %value, "Fetching reference with gsutil");
            let args = [
                "cp".to_string(),
                value.to_string(),
                path_string(&self.library),
            ];
            let output = self.runner.run("gsutil", &args).await?;
            if !output.success() {
                return Err(self.transfer_error(key, value, &output));
            }
        } else if value.starts_with("http://")
            || value.starts_with("https://")
            || value.starts_with("ftp://")
        {
            info!(source = %value, "Fetching reference with wget");
            let args = [value.to_string(), "-O".to_string(), path_string(&dest)];
            let output = self.runner.run("wget", &args).await?;
            if !output.success() {
                return Err(self.transfer_error(key, value, &output));
            }
        } else {
            return Err(LibraryError::Localization {
                key: key.to_string(),
                reason: format!("'{value}' is neither a local file nor a supported URL"),
            });
        }

        Ok(dest)
    }

    /// Run a tool inside a container with the library bind-mounted at
    /// its own path, so tool-visible paths equal host paths.
    async fn docker_run(
        &self,
        as_root: bool,
        image: &str,
        tool: &[&str],
    ) -> Result<CommandOutput, LibraryError> {
        let library = path_string(&self.library);
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{library}:{library}"),
        ];
        if as_root {
            args.push("--user".to_string());
            args.push("root".to_string());
        }
        args.push(image.to_string());
        args.extend(tool.iter().map(|part| part.to_string()));
        Ok(self.runner.run("docker", &args).await?)
    }

    async fn load_cache(&self) -> Result<Option<Map<String, Value>>, LibraryError> {
        match fs::read_to_string(&self.cache_path).await {
            Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(map) => Ok(Some(map)),
                Err(error) => {
                    warn!(
                        cache = %self.cache_path.display(),
                        error = %error,
                        "Discarding unreadable reference cache"
                    );
                    Ok(None)
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn persist(&self, localized: &LocalizedConfig) -> Result<(), LibraryError> {
        let text = serde_json::to_string_pretty(localized.entries())?;
        fs::write(&self.cache_path, text).await?;
        Ok(())
    }

    fn localized_fasta(
        &self,
        localized: &LocalizedConfig,
        artifact: &str,
    ) -> Result<String, LibraryError> {
        localized
            .get_str(REF_FASTA_KEY)
            .map(str::to_string)
            .ok_or_else(|| LibraryError::AuxiliaryPreparation {
                artifact: artifact.to_string(),
                reason: format!("'{REF_FASTA_KEY}' is not configured"),
            })
    }

    fn transfer_error(&self, key: &str, value: &str, output: &CommandOutput) -> LibraryError {
        LibraryError::Localization {
            key: key.to_string(),
            reason: format!("transfer of '{value}' failed: {}", exit_reason(output)),
        }
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

fn exit_reason(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("exit code {}", output.code)
    } else {
        format!("exit code {}: {stderr}", output.code)
    }
}

/// Reference library errors
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// A configured reference could not be brought into the library.
    #[error("cannot localize '{key}': {reason}")]
    Localization {
        /// Workflow key being localized.
        key: String,
        /// What went wrong.
        reason: String,
    },

    /// An auxiliary file could not be derived.
    #[error("cannot prepare {artifact}: {reason}")]
    AuxiliaryPreparation {
        /// Artifact being derived (e.g. "bwa index").
        artifact: String,
        /// What went wrong.
        reason: String,
    },

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
