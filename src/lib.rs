// Yelp Warehouse - Core Library
// JSONL dataset -> normalized SQLite store -> filtered subset -> parquet

pub mod error;
pub mod config;
pub mod schema;
pub mod records;
pub mod decoder;
pub mod batch;
pub mod loaders;
pub mod attributes;     // Attribute Normalizer
pub mod hours;          // Hours Merger
pub mod cleanup;        // Subset Filter / Cascade Cleaner
pub mod events;         // Run audit trail
pub mod export;         // Parquet exporter
pub mod pipeline;

// Re-export commonly used types
pub use error::{DecodeError, DecodeErrorKind, LoaderFailure, PipelineError, PipelineResult};
pub use config::{DecodePolicy, PipelineConfig, SourcePaths, SubsetPredicate};
pub use schema::{open_store, setup_database, count_rows, list_tables};
pub use records::{BusinessRecord, ReviewRecord, TipRecord, UserRecord, SourceRecord};
pub use decoder::{Decoded, JsonLinesDecoder};
pub use batch::{BatchStats, BatchWriter, StoreRecord};
pub use loaders::{load_all, run_loader, EntityKind, LoadReport};
pub use attributes::{
    coerce_attribute, normalize_attributes, load_features,
    FeatureMap, FeatureValue, NormalizeReport,
};
pub use hours::{merge_hours, load_schedule, parse_hours_range, Day, MergeReport, Schedule, TimeInterval};
pub use cleanup::{CascadeCleaner, CleanupReport, CleanupStage, StageOutcome};
pub use events::{events_for_run, insert_event, Event};
pub use export::{export_all, ExportReport, ExportedFile};
pub use pipeline::{Pipeline, PipelineReport, Stage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
