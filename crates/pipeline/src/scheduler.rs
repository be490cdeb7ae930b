//! Time-chunk scheduler.
//!
//! Walks a window from its newest end backwards, one chunk per request:
//! 1. Take the current chunk size and cut `[current, current + size]`,
//!    clipped to the window.
//! 2. Fetch it with that size's timeout.
//! 3. On success keep the rows and move past the chunk. If the success was
//!    slower than the size's budget, later chunks use the next smaller size.
//! 4. On failure move to the next smaller size and retry from the same
//!    point. At the smallest size the range is either skipped (interactive)
//!    or the whole window is abandoned (strict).
//! 5. A success that filled the row limit is treated like a failure: the
//!    rows are dropped and the range is fetched again at the next smaller
//!    size. At the smallest size the capped rows are kept and the chunk is
//!    reported as truncated.
//! 6. Sleep a fixed delay between requests.
//!
//! Chunk sizes only ever shrink within one run.

use std::time::Duration;

use async_trait::async_trait;
use records::RawExecution;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::ChunkTable;
use crate::error::{ChunkFailure, ScheduleError};
use crate::window::{AnchoredWindow, ChunkRange, EPSILON_DAYS};

// ---------------------------------------------------------------------------
// RangeSource
// ---------------------------------------------------------------------------

/// Where the scheduler gets rows for one chunk from.
#[async_trait]
pub trait RangeSource: Send {
    /// Fetch every row in `chunk`, giving up after `timeout`.
    async fn fetch(
        &mut self,
        chunk: &ChunkRange,
        timeout: Duration,
    ) -> Result<Vec<RawExecution>, ChunkFailure>;

    /// Called when the scheduler skips `chunk` for good.
    fn give_up(&mut self, _chunk: &ChunkRange) {}

    /// Whether `rows` hit the row limit, so the chunk may hold more.
    fn truncated(&self, _rows: &[RawExecution]) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// What to do when the smallest chunk size still fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// Log the range, leave it out, and keep walking.
    SkipRange,
    /// Stop and return [`ScheduleError::Abandoned`].
    Abandon,
}

/// Result of walking one window.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub rows: Vec<RawExecution>,
    /// Chunks fetched successfully, newest first.
    pub fetched: Vec<ChunkRange>,
    /// Chunks given up on at the smallest size, newest first.
    pub skipped: Vec<ChunkRange>,
    /// Chunks that still hit the row limit at the smallest size.
    pub truncated: Vec<ChunkRange>,
    /// Chunk-size index the run ended on.
    pub chunk_index: usize,
    /// Requests issued, retries included.
    pub fetches: usize,
    /// Failed requests that were retried at a smaller size.
    pub retries: usize,
}

/// State carried from one iteration to the next.
#[derive(Debug)]
struct ChunkCursor {
    current_days: f64,
    chunk_index: usize,
    rows: Vec<RawExecution>,
}

pub struct ChunkScheduler<'a> {
    table: &'a ChunkTable,
    inter_chunk_delay: Duration,
    exhaustion: Exhaustion,
}

impl<'a> ChunkScheduler<'a> {
    pub fn new(table: &'a ChunkTable, inter_chunk_delay: Duration, exhaustion: Exhaustion) -> Self {
        Self { table, inter_chunk_delay, exhaustion }
    }

    /// Fetch every chunk of `window` from `source`.
    ///
    /// # Errors
    /// Only with [`Exhaustion::Abandon`], when even the smallest chunk fails.
    #[instrument(skip_all, fields(span_days = window.oldest_days() - window.newest_days()))]
    pub async fn run<S>(
        &self,
        window: &AnchoredWindow,
        source: &mut S,
    ) -> Result<ScheduleOutcome, ScheduleError>
    where
        S: RangeSource + ?Sized,
    {
        let oldest = window.oldest_days();
        let smallest = self.table.smallest_index();
        let mut outcome = ScheduleOutcome::default();
        let mut cursor = ChunkCursor {
            current_days: window.newest_days(),
            chunk_index: 0,
            rows: Vec::new(),
        };

        while oldest - cursor.current_days > EPSILON_DAYS {
            if outcome.fetches > 0 && !self.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }

            let step = &self.table.steps[cursor.chunk_index];
            let older = (cursor.current_days + step.days).min(oldest);
            let chunk = window.chunk(cursor.current_days, older);

            let started = Instant::now();
            outcome.fetches += 1;
            let result = source.fetch(&chunk, step.timeout).await;
            let elapsed = started.elapsed();

            match result {
                Ok(rows) if cursor.chunk_index < smallest && source.truncated(&rows) => {
                    cursor.chunk_index += 1;
                    outcome.retries += 1;
                    warn!(
                        chunk_days = chunk.days(),
                        rows = rows.len(),
                        next_chunk_days = self.table.steps[cursor.chunk_index].days,
                        "chunk hit the row limit; refetching with a smaller chunk"
                    );
                }
                Ok(rows) => {
                    if source.truncated(&rows) {
                        warn!(
                            range = %chunk.range,
                            rows = rows.len(),
                            "smallest chunk hit the row limit; rows beyond it are missing"
                        );
                        outcome.truncated.push(chunk);
                    }
                    debug!(
                        chunk_days = chunk.days(),
                        rows = rows.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "chunk fetched"
                    );
                    if elapsed > step.budget && cursor.chunk_index < smallest {
                        cursor.chunk_index += 1;
                        debug!(
                            next_chunk_days = self.table.steps[cursor.chunk_index].days,
                            "chunk was slow; shrinking later chunks"
                        );
                    }
                    cursor.rows.extend(rows);
                    outcome.fetched.push(chunk);
                    cursor.current_days = older;
                }
                Err(failure) if cursor.chunk_index < smallest => {
                    cursor.chunk_index += 1;
                    outcome.retries += 1;
                    warn!(
                        chunk_days = chunk.days(),
                        timeout_ms = step.timeout.as_millis() as u64,
                        next_chunk_days = self.table.steps[cursor.chunk_index].days,
                        error = %failure,
                        "chunk failed; retrying with a smaller chunk"
                    );
                }
                Err(failure) => match self.exhaustion {
                    Exhaustion::SkipRange => {
                        warn!(
                            range = %chunk.range,
                            error = %failure,
                            "smallest chunk failed; leaving range out"
                        );
                        source.give_up(&chunk);
                        outcome.skipped.push(chunk);
                        cursor.current_days = older;
                    }
                    Exhaustion::Abandon => {
                        warn!(
                            range = %chunk.range,
                            error = %failure,
                            "smallest chunk failed; abandoning"
                        );
                        return Err(ScheduleError::Abandoned {
                            range: chunk,
                            recovered: cursor.rows,
                        });
                    }
                },
            }
        }

        outcome.rows = cursor.rows;
        outcome.chunk_index = cursor.chunk_index;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkStep;
    use crate::window::TimeWindow;
    use chrono::{TimeZone, Utc};
    use records::QueryError;
    use transport::TransportError;

    /// Scripted source: one entry per request, `None` meaning "fail",
    /// `Some(d)` meaning "succeed after `d`".
    struct ScriptedSource {
        script: Vec<Option<Duration>>,
        seen: Vec<ChunkRange>,
        given_up: Vec<ChunkRange>,
        /// Chunks longer than this many days come back full.
        full_above_days: Option<f64>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<Duration>>) -> Self {
            Self {
                script,
                seen: Vec::new(),
                given_up: Vec::new(),
                full_above_days: None,
            }
        }

        fn full_above(mut self, days: f64) -> Self {
            self.full_above_days = Some(days);
            self
        }
    }

    #[async_trait]
    impl RangeSource for ScriptedSource {
        async fn fetch(
            &mut self,
            chunk: &ChunkRange,
            _timeout: Duration,
        ) -> Result<Vec<RawExecution>, ChunkFailure> {
            let call = self.seen.len();
            self.seen.push(*chunk);
            match self.script.get(call).copied().flatten() {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Vec::new())
                }
                None => Err(ChunkFailure::Query(QueryError::Transport(TransportError::Timeout {
                    operation: "ListExecutions".into(),
                    timeout_ms: 1,
                }))),
            }
        }

        fn give_up(&mut self, chunk: &ChunkRange) {
            self.given_up.push(*chunk);
        }

        fn truncated(&self, _rows: &[RawExecution]) -> bool {
            match (self.full_above_days, self.seen.last()) {
                (Some(limit), Some(chunk)) => chunk.days() > limit,
                _ => false,
            }
        }
    }

    fn table() -> ChunkTable {
        ChunkTable {
            steps: vec![
                ChunkStep::new(4.0, Duration::from_secs(10), Duration::from_secs(5)),
                ChunkStep::new(2.0, Duration::from_secs(20), Duration::from_secs(10)),
                ChunkStep::new(1.0, Duration::from_secs(30), Duration::from_secs(15)),
            ],
        }
    }

    fn window(days: f64) -> AnchoredWindow {
        let anchor = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        AnchoredWindow::new(anchor, TimeWindow::last_days(days))
    }

    fn fast() -> Option<Duration> {
        Some(Duration::from_millis(10))
    }

    /// Fetched and skipped chunks must tile the window with no gap or overlap.
    fn assert_tiles(outcome: &ScheduleOutcome, days: f64) {
        let mut chunks: Vec<ChunkRange> =
            outcome.fetched.iter().chain(outcome.skipped.iter()).copied().collect();
        chunks.sort_by(|a, b| a.newer_days.total_cmp(&b.newer_days));

        let mut expected_start = 0.0;
        for chunk in &chunks {
            assert_eq!(chunk.newer_days, expected_start, "gap or overlap at {expected_start}");
            expected_start = chunk.older_days;
        }
        assert_eq!(expected_start, days);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_service_uses_the_largest_chunks() {
        let table = table();
        let scheduler =
            ChunkScheduler::new(&table, Duration::from_millis(50), Exhaustion::SkipRange);
        let mut source = ScriptedSource::new(vec![fast(); 8]);

        let outcome = scheduler.run(&window(9.0), &mut source).await.unwrap();

        let spans: Vec<f64> = source.seen.iter().map(ChunkRange::days).collect();
        assert_eq!(spans, vec![4.0, 4.0, 1.0]);
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.chunk_index, 0);
        assert_tiles(&outcome, 9.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_retries_the_same_start_with_a_smaller_chunk() {
        let table = table();
        let scheduler = ChunkScheduler::new(&table, Duration::ZERO, Exhaustion::SkipRange);
        let mut source = ScriptedSource::new(vec![None, fast(), fast(), fast()]);

        let outcome = scheduler.run(&window(5.0), &mut source).await.unwrap();

        assert_eq!(source.seen[0].newer_days, 0.0);
        assert_eq!(source.seen[1].newer_days, 0.0);
        assert_eq!(source.seen[1].days(), 2.0);
        assert_eq!(outcome.chunk_index, 1);
        assert_eq!(outcome.retries, 1);
        assert_tiles(&outcome, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_success_shrinks_later_chunks_but_keeps_rows() {
        let table = table();
        let scheduler = ChunkScheduler::new(&table, Duration::ZERO, Exhaustion::SkipRange);
        let mut source = ScriptedSource::new(vec![Some(Duration::from_secs(7)), fast(), fast()]);

        let outcome = scheduler.run(&window(6.0), &mut source).await.unwrap();

        let spans: Vec<f64> = source.seen.iter().map(ChunkRange::days).collect();
        assert_eq!(spans, vec![4.0, 2.0]);
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.chunk_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_range_is_skipped_and_walk_continues() {
        let table = table();
        let scheduler = ChunkScheduler::new(&table, Duration::ZERO, Exhaustion::SkipRange);
        // 4d fails, 2d fails, 1d fails -> skip [0,1]; then [1,2], [2,3] succeed at 1d.
        let mut source = ScriptedSource::new(vec![None, None, None, fast(), fast()]);

        let outcome = scheduler.run(&window(3.0), &mut source).await.unwrap();

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(source.given_up.len(), 1);
        assert_eq!(outcome.skipped[0].newer_days, 0.0);
        assert_eq!(outcome.skipped[0].older_days, 1.0);
        assert_eq!(outcome.fetched.len(), 2);
        assert_tiles(&outcome, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_mode_abandons_instead_of_skipping() {
        let table = table();
        let scheduler = ChunkScheduler::new(&table, Duration::ZERO, Exhaustion::Abandon);
        let mut source = ScriptedSource::new(vec![fast(), None, None]);

        let err = scheduler.run(&window(8.0), &mut source).await.unwrap_err();

        let ScheduleError::Abandoned { range, .. } = err;
        assert_eq!(range.newer_days, 4.0);
        assert_eq!(range.days(), 1.0);
        assert!(source.given_up.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_page_refetches_the_same_start_with_a_smaller_chunk() {
        let table = table();
        let scheduler = ChunkScheduler::new(&table, Duration::ZERO, Exhaustion::SkipRange);
        let mut source = ScriptedSource::new(vec![fast(); 8]).full_above(1.5);

        let outcome = scheduler.run(&window(4.0), &mut source).await.unwrap();

        let spans: Vec<f64> = source.seen.iter().map(ChunkRange::days).collect();
        assert_eq!(spans, vec![4.0, 2.0, 1.0, 1.0, 1.0, 1.0]);
        assert!(source.seen[..3].iter().all(|c| c.newer_days == 0.0));
        assert_eq!(outcome.retries, 2);
        assert!(outcome.truncated.is_empty());
        assert_eq!(outcome.fetched.len(), 4);
        assert_tiles(&outcome, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_page_at_the_smallest_size_is_kept_and_reported() {
        let table = table();
        let scheduler = ChunkScheduler::new(&table, Duration::ZERO, Exhaustion::SkipRange);
        let mut source = ScriptedSource::new(vec![fast(); 8]).full_above(0.0);

        let outcome = scheduler.run(&window(2.0), &mut source).await.unwrap();

        let spans: Vec<f64> = source.seen.iter().map(ChunkRange::days).collect();
        assert_eq!(spans, vec![2.0, 2.0, 1.0, 1.0]);
        assert_eq!(outcome.truncated.len(), 2);
        assert_eq!(outcome.fetched.len(), 2);
        assert!(outcome.skipped.is_empty());
        assert_tiles(&outcome, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn coverage_holds_for_many_failure_patterns() {
        let table = table();
        let scheduler = ChunkScheduler::new(&table, Duration::ZERO, Exhaustion::SkipRange);

        for pattern in 0u32..64 {
            let script: Vec<Option<Duration>> = (0..64)
                .map(|i| if (pattern >> (i % 6)) & 1 == 1 { None } else { fast() })
                .collect();
            let mut source = ScriptedSource::new(script);
            let days = 2.5 + f64::from(pattern % 7);

            let outcome = scheduler.run(&window(days), &mut source).await.unwrap();
            assert_tiles(&outcome, days);
        }
    }
}
