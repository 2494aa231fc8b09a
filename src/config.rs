// ⚙️ Pipeline Configuration
// One explicit struct handed to every stage - no process-wide paths or globals

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

pub const DEFAULT_BATCH_SIZE: usize = 5_000;
pub const DEFAULT_EXPORT_CHUNK_SIZE: usize = 100_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// SOURCE FILES
// ============================================================================

/// Line-delimited JSON export, one file per entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePaths {
    pub business: PathBuf,
    pub review: PathBuf,
    pub tip: PathBuf,
    pub user: PathBuf,
}

impl SourcePaths {
    /// Conventional file names of the Yelp academic dataset inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        SourcePaths {
            business: dir.join("yelp_academic_dataset_business.json"),
            review: dir.join("yelp_academic_dataset_review.json"),
            tip: dir.join("yelp_academic_dataset_tip.json"),
            user: dir.join("yelp_academic_dataset_user.json"),
        }
    }
}

impl Default for SourcePaths {
    fn default() -> Self {
        SourcePaths::in_dir("./yelp_json")
    }
}

// ============================================================================
// DECODE POLICY
// ============================================================================

/// What a loader does when a line fails to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Abort the loader on the first bad line
    #[default]
    Strict,
    /// Log, count and continue; the store may then be missing records
    SkipInvalid,
}

// ============================================================================
// SUBSET PREDICATE
// ============================================================================

/// Conjunctive filter a business must satisfy to survive cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetPredicate {
    /// Exact match against `business.state`
    pub state: String,
    /// At least one `business_categories.category` must equal this
    pub category: String,
}

impl SubsetPredicate {
    pub fn new(state: impl Into<String>, category: impl Into<String>) -> Self {
        SubsetPredicate {
            state: state.into(),
            category: category.into(),
        }
    }

    /// Stable fingerprint used to tell whether a persisted cleanup checkpoint
    /// belongs to this predicate
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.state.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.category.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl Default for SubsetPredicate {
    fn default() -> Self {
        SubsetPredicate::new("FL", "Gyms")
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite store file
    pub store_path: PathBuf,
    pub sources: SourcePaths,
    /// Records per transaction in the batch writer
    pub batch_size: usize,
    pub decode_policy: DecodePolicy,
    pub subset: SubsetPredicate,
    /// Directory receiving the parquet files
    pub export_dir: PathBuf,
    /// Rows per record batch when exporting
    pub export_chunk_size: usize,
    /// How long a loader waits on a locked store before failing
    pub busy_timeout_ms: u64,
    /// Remove any existing store before loading (full rebuild)
    pub fresh_store: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            store_path: PathBuf::from("./data/yelp.db"),
            sources: SourcePaths::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            decode_policy: DecodePolicy::default(),
            subset: SubsetPredicate::default(),
            export_dir: PathBuf::from("./data"),
            export_chunk_size: DEFAULT_EXPORT_CHUNK_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            fresh_store: true,
        }
    }
}

impl PipelineConfig {
    /// Layout where sources, store and exports share one data directory
    pub fn from_data_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        PipelineConfig {
            store_path: dir.join("yelp.db"),
            sources: SourcePaths::in_dir(dir),
            export_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    /// Load a TOML config; every field is optional and falls back to its default
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be positive".into()));
        }
        if self.export_chunk_size == 0 {
            return Err(PipelineError::Config(
                "export_chunk_size must be positive".into(),
            ));
        }
        if self.subset.state.trim().is_empty() || self.subset.category.trim().is_empty() {
            return Err(PipelineError::Config(
                "subset predicate needs both a state and a category".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.decode_policy, DecodePolicy::Strict);
        assert_eq!(config.subset, SubsetPredicate::new("FL", "Gyms"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
batch_size = 250
decode_policy = "skip_invalid"

[subset]
state = "PA"
category = "Yoga"
"#
        )
        .unwrap();

        let config = PipelineConfig::from_toml_file(file.path()).unwrap();

        assert_eq!(config.batch_size, 250);
        assert_eq!(config.decode_policy, DecodePolicy::SkipInvalid);
        assert_eq!(config.subset.state, "PA");
        assert_eq!(config.export_chunk_size, DEFAULT_EXPORT_CHUNK_SIZE);
        assert!(config.fresh_store);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_data_dir_layout() {
        let config = PipelineConfig::from_data_dir("/tmp/yelp");
        assert_eq!(config.store_path, PathBuf::from("/tmp/yelp/yelp.db"));
        assert_eq!(
            config.sources.tip,
            PathBuf::from("/tmp/yelp/yelp_academic_dataset_tip.json")
        );
    }

    #[test]
    fn test_predicate_fingerprint_distinguishes_clauses() {
        let a = SubsetPredicate::new("FL", "Gyms");
        let b = SubsetPredicate::new("FLG", "yms");
        assert_eq!(a.fingerprint(), SubsetPredicate::new("FL", "Gyms").fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
