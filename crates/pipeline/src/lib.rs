//! `pipeline` crate: adaptive execution retrieval and enrichment.
//!
//! Time-chunked fetching with degrading chunk sizes, tenant batch fan-out,
//! two-phase trigger classification, a session-scoped reference cache and
//! retry ledger, and background reconciliation. [`ExecutionPipeline`] is the
//! entry point.

pub mod cache;
pub mod classify;
pub mod config;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod fanout;
pub mod ledger;
pub mod merge;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;
pub mod source;
pub mod window;

pub use cache::ReferenceCache;
pub use config::{
    ChunkStep, ChunkTable, EnrichmentConfig, FanOutConfig, PipelineConfig, ReconcileConfig,
};
pub use error::PipelineError;
pub use ledger::{FailedRange, RetryLedger};
pub use merge::MergeStats;
pub use pipeline::{ExecutionPipeline, ExecutionQuery};
pub use reconcile::{ProgressEvent, ReconcileOptions, ReconcileSummary};
pub use window::{TimeRange, TimeWindow};
