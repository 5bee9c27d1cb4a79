//! Shared data models for the recut timeline engine.
//!
//! This crate provides Serde-serializable types for:
//! - Classifier output (scored segments, severity and action scales)
//! - Merged windows, cut tasks and replacement results
//! - Timeline segments and the assembly report
//! - Jobs, their state machine and persisted window records
//! - Reconstruction and encoding configuration

pub mod config;
pub mod encoding;
pub mod job;
pub mod record;
pub mod segment;
pub mod timeline;
pub mod timestamp;
pub mod window;

pub use config::{ConfigError, ReconcilePolicy, ReconstructionConfig, STRICT_SCORE_THRESHOLD};
pub use encoding::EncodingConfig;
pub use job::{
    AssemblyReport, ConcatStrategy, JobId, JobRecord, JobState, SourceInfo, WindowOutcome,
};
pub use record::{
    migrate_window_record, migrate_window_records, RecordError, WindowRecord, SCHEMA_VERSION,
};
pub use segment::{parse_segments, ScoredSegment, SegmentError, Severity, SuggestedAction};
pub use timeline::{total_span, TimelineSegment};
pub use timestamp::{format_seconds, parse_timestamp, TimestampError};
pub use window::{Degradation, MergedWindow, ReplacementResult, ReplacementTask, WindowStatus};
