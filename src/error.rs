// ⚠️ Error Taxonomy
// Typed failures for every pipeline stage; stage drivers add context with anyhow

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::loaders::EntityKind;

// ============================================================================
// DECODE ERRORS
// ============================================================================

/// Why a single source line could not become a typed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Not valid JSON (syntax error, truncated line)
    Malformed,
    /// Valid JSON but a required field is absent or has the wrong type
    MissingField,
    /// Field present but its value cannot be interpreted (e.g. bad timestamp)
    InvalidValue,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DecodeErrorKind::Malformed => "malformed JSON",
            DecodeErrorKind::MissingField => "missing required field",
            DecodeErrorKind::InvalidValue => "invalid value",
        };
        f.write_str(label)
    }
}

/// A line of line-delimited JSON that failed to decode
#[derive(Debug, Clone, Error)]
#[error("{path}:{line}: {kind}: {reason}")]
pub struct DecodeError {
    pub path: String,
    /// 1-based line number in the source file
    pub line: usize,
    pub kind: DecodeErrorKind,
    pub reason: String,
}

// ============================================================================
// PIPELINE ERRORS
// ============================================================================

/// One failed loader inside the parallel load phase
#[derive(Debug)]
pub struct LoaderFailure {
    pub kind: EntityKind,
    pub error: PipelineError,
}

impl fmt::Display for LoaderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} loader: {}", self.kind.name(), self.error)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "{loader} source file not found: {path}\n  \
         Download the Yelp Open Dataset (https://business.yelp.com/data/resources/open-dataset/) \
         and point the configured source path at the extracted JSON file."
    )]
    SourceNotFound { loader: String, path: PathBuf },

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("write of batch {batch} into `{table}` failed, batch rolled back: {source}")]
    StoreWrite {
        table: String,
        batch: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("unparseable hours for business {business_id} on {day}: {raw:?}")]
    Hours {
        business_id: String,
        day: String,
        raw: String,
    },

    #[error("export of {file} failed: {reason}")]
    Export { file: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} loader(s) failed: {}", .0.len(), join_failures(.0))]
    LoadersFailed(Vec<LoaderFailure>),
}

fn join_failures(failures: &[LoaderFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_names_line_and_reason() {
        let err = DecodeError {
            path: "review.json".to_string(),
            line: 42,
            kind: DecodeErrorKind::MissingField,
            reason: "missing field `review_id`".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("review.json:42"));
        assert!(msg.contains("missing required field"));
        assert!(msg.contains("review_id"));
    }

    #[test]
    fn test_source_not_found_has_remediation() {
        let err = PipelineError::SourceNotFound {
            loader: "tip".to_string(),
            path: PathBuf::from("/data/tip.json"),
        };

        let msg = err.to_string();
        assert!(msg.contains("tip source file not found"));
        assert!(msg.contains("Download the Yelp Open Dataset"));
    }

    #[test]
    fn test_aggregate_failure_lists_every_loader() {
        let err = PipelineError::LoadersFailed(vec![
            LoaderFailure {
                kind: EntityKind::Review,
                error: PipelineError::Config("boom".to_string()),
            },
            LoaderFailure {
                kind: EntityKind::User,
                error: PipelineError::Config("bang".to_string()),
            },
        ]);

        let msg = err.to_string();
        assert!(msg.starts_with("2 loader(s) failed"));
        assert!(msg.contains("review loader"));
        assert!(msg.contains("user loader"));
    }
}
