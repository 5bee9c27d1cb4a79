//! Timeline reconstruction worker.
//!
//! This crate provides:
//! - Interval merging and cut-window location
//! - Per-window replacement chain (synthesis, normalization, duration
//!   reconciliation, audio re-sync)
//! - Segment assembly with stream-copy to re-encode fallback
//! - Job orchestration, persistence and resume
//! - Scene analysis over pluggable detector and classifier services

pub mod analysis;
pub mod assembler;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod job_store;
pub mod locator;
pub mod logging;
pub mod merger;
pub mod metrics;
pub mod prompt;
pub mod replacement;
pub mod retry;

pub use assembler::{plan_timeline, Assembler, AssemblyObserver, AssemblyPhase, WindowResult};
pub use collaborators::{
    Classifier, PrerenderedSynthesizer, SceneDetector, SceneRange, SynthesisRequest,
    SynthesizedClip, Synthesizer,
};
pub use config::WorkerConfig;
pub use engine::ReconstructionEngine;
pub use error::{WorkerError, WorkerResult};
pub use job_store::{FileJobStore, JobStore};
pub use locator::{locate, locate_all, LocatorParams};
pub use logging::JobLogger;
pub use merger::merge;
