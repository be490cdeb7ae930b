//! Pipeline-level error types.
//!
//! Only [`PipelineError`] ever reaches a caller. Everything else that can go
//! wrong while fetching is absorbed, logged, and turned into a partial
//! result plus a retry-ledger entry.

use records::{QueryError, RawExecution};
use thiserror::Error;

use crate::window::ChunkRange;

/// Fatal conditions surfaced by the public API.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration cannot drive the pipeline.
    #[error("pipeline is not configured: {0}")]
    NotConfigured(String),

    /// No tenant ids were passed and no default tenant is configured.
    #[error("no tenant ids given and no default tenant configured")]
    MissingTenants,

    /// The requested window is empty, negative, or not finite.
    #[error("invalid window: newest {newest_days} days ago, oldest {oldest_days} days ago")]
    InvalidWindow {
        newest_days: f64,
        oldest_days: f64,
    },
}

/// Why one chunk fetch failed. Drives chunk-size reduction; never surfaced.
#[derive(Debug, Error)]
pub enum ChunkFailure {
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Every finished batch failed and none produced rows.
    #[error("{failed} of {total} tenant batches failed and none returned rows")]
    Batches {
        failed: usize,
        total: usize,
    },
}

/// Returned by the strict scheduler when it gives up on a window.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Even the smallest chunk failed; rows fetched before that are kept.
    #[error("gave up on {} after exhausting every chunk size", .range.range)]
    Abandoned {
        range: ChunkRange,
        recovered: Vec<RawExecution>,
    },
}
