//! Relief Ingest Crate
//!
//! Streaming ingestion for the relief terrain reconstructor: tail the
//! sample log, parse HIT/MISS records, feed the spacing-enforcing point
//! index, and keep the binary database saved with a debounce policy.

pub mod parser;
pub mod runner;
pub mod tailer;

pub use parser::{parse_line, Record};
pub use runner::{
    ingest_once, run_stream, IngestError, IngestSummary, RunnerConfig, StreamOutcome,
};
pub use tailer::{LogTailer, ResetReason, TailError, TailEvent, FRAGMENT_PREFIX};
