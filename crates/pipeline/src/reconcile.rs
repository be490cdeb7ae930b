//! Background reconciliation.
//!
//! Runs after the caller already has a first result:
//! 1. drain fan-out batches that were still running when their fetch returned,
//! 2. retry the context lookup of every unresolved record with a longer timeout,
//! 3. retry every failed tenant, a fixed number at a time, with the strict
//!    chunk table,
//! 4. enrich recovered rows and merge everything into the caller's records by id.
//!
//! Progress goes out as [`ProgressEvent`]s. A consumer that hangs up is
//! logged once and otherwise ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use records::{ExecutionRecord, RawExecution};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use transport::QueryTransport;

use crate::cache::ReferenceCache;
use crate::config::{ChunkTable, PipelineConfig};
use crate::enrich::{enrich_records, resolve_contexts, LookupPacing};
use crate::error::ScheduleError;
use crate::fanout::PendingBatches;
use crate::ledger::{FailedRange, RetryLedger};
use crate::merge::{dedup_raw, merge_by_id, MergeStats};
use crate::scheduler::{ChunkScheduler, Exhaustion};
use crate::source::DirectRangeSource;
use crate::window::AnchoredWindow;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Incremental reconciliation status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { total: usize },
    Advanced { completed: usize, total: usize, recovered: usize },
    TenantAbandoned { tenant_id: String },
    Finished { summary: ReconcileSummary },
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Unresolved records plus failed tenants that were retried.
    pub retried: usize,
    /// Records that gained provenance plus rows that were newly merged.
    pub recovered: usize,
    /// Tenants given up on during this pass.
    pub abandoned: usize,
    /// Rows delivered by batches that outlived their fetch.
    pub late_rows: usize,
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub retry_enrichment: bool,
    pub retry_batches: bool,
    /// Overrides `ReconcileConfig::abandon_exhausted_tenants` when set.
    pub abandon_exhausted: Option<bool>,
    pub progress: Option<UnboundedSender<ProgressEvent>>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            retry_enrichment: true,
            retry_batches: true,
            abandon_exhausted: None,
            progress: None,
        }
    }
}

impl ReconcileOptions {
    pub fn with_progress(mut self, progress: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

struct ProgressReporter {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    fn new(tx: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self { tx }
    }

    fn emit(&mut self, event: ProgressEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.send(event).is_err() {
            warn!("progress receiver dropped; continuing without progress events");
            self.tx = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Tenant retry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TenantRetry {
    tenant_id: String,
    rows: Vec<RawExecution>,
    /// Ranges still missing after the retry.
    missing: Vec<FailedRange>,
    abandoned: bool,
}

/// Re-fetch every failed range of one tenant with the strict table.
async fn retry_tenant(
    transport: Arc<dyn QueryTransport>,
    tenant_id: String,
    ranges: Vec<FailedRange>,
    table: ChunkTable,
    inter_chunk_delay: std::time::Duration,
    exhaustion: Exhaustion,
    row_limit: u32,
) -> TenantRetry {
    let scheduler = ChunkScheduler::new(&table, inter_chunk_delay, exhaustion);
    let mut retry = TenantRetry {
        tenant_id,
        rows: Vec::new(),
        missing: Vec::new(),
        abandoned: false,
    };

    for failed in ranges {
        let mut source = DirectRangeSource::new(
            Arc::clone(&transport),
            retry.tenant_id.clone(),
            failed.workflow_id.clone(),
            row_limit,
        );
        match scheduler.run(&AnchoredWindow::over(failed.range), &mut source).await {
            Ok(outcome) => {
                retry.rows.extend(outcome.rows);
                retry.missing.extend(
                    outcome
                        .skipped
                        .iter()
                        .map(|chunk| FailedRange::new(chunk.range, failed.workflow_id.as_deref())),
                );
            }
            Err(ScheduleError::Abandoned { range, recovered }) => {
                warn!(
                    tenant_id = %retry.tenant_id,
                    range = %range.range,
                    "smallest retry chunk failed; abandoning tenant"
                );
                retry.rows.extend(recovered);
                retry.abandoned = true;
                break;
            }
        }
    }
    retry
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Borrows the pipeline's session state for one pass.
pub(crate) struct Reconciler<'a> {
    pub transport: &'a Arc<dyn QueryTransport>,
    pub config: &'a PipelineConfig,
    pub cache: &'a mut ReferenceCache,
    pub ledger: &'a mut RetryLedger,
    pub pending: &'a mut PendingBatches,
}

impl Reconciler<'_> {
    /// Await outstanding fan-out batches and merge their rows.
    ///
    /// Late failures go into the ledger. Returns the merge stats and how
    /// many rows arrived late.
    pub async fn collect_late(
        &mut self,
        results: &mut Vec<ExecutionRecord>,
    ) -> (MergeStats, usize) {
        if self.pending.is_empty() {
            return (MergeStats::default(), 0);
        }
        let late = self.pending.collect().await;
        for (tenant_ids, scope) in &late.failed {
            self.ledger.record_failed_batch(tenant_ids, scope.clone());
        }
        let late_rows = late.rows.len();
        let stats = self.merge_rows(results, late.rows).await;
        info!(
            late_rows,
            inserted = stats.inserted,
            failed = late.failed.len(),
            "late batches collected"
        );
        (stats, late_rows)
    }

    /// Enrich rows not already present in `results` and merge them.
    async fn merge_rows(
        &mut self,
        results: &mut Vec<ExecutionRecord>,
        rows: Vec<RawExecution>,
    ) -> MergeStats {
        let known: HashSet<&str> = results.iter().map(|r| r.id.as_str()).collect();
        let fresh: Vec<RawExecution> = dedup_raw(rows)
            .into_iter()
            .filter(|row| !known.contains(row.id.as_str()))
            .collect();
        if fresh.is_empty() {
            return MergeStats::default();
        }
        let enriched = enrich_records(
            self.transport,
            &self.config.enrichment,
            &mut *self.cache,
            &mut *self.ledger,
            fresh,
        )
        .await;
        merge_by_id(results, enriched)
    }

    #[instrument(skip_all, fields(
        unresolved = self.ledger.unresolved_count(),
        failed_tenants = self.ledger.failed_tenant_count(),
        pending_batches = self.pending.waiting_batches(),
    ))]
    pub async fn run(
        &mut self,
        results: &mut Vec<ExecutionRecord>,
        options: ReconcileOptions,
    ) -> ReconcileSummary {
        let mut progress = ProgressReporter::new(options.progress);
        let mut summary = ReconcileSummary::default();

        if self.ledger.is_empty() && self.pending.is_empty() {
            debug!("nothing outstanding; reconcile is a no-op");
            progress.emit(ProgressEvent::Started { total: 0 });
            progress.emit(ProgressEvent::Finished { summary });
            return summary;
        }

        let (late, late_rows) = self.collect_late(results).await;
        summary.late_rows = late_rows;
        summary.inserted += late.inserted;
        summary.updated += late.updated;

        // Unresolved records the caller still holds; anything else is stale.
        let index: HashMap<&str, usize> =
            results.iter().enumerate().map(|(i, r)| (r.id.as_str(), i)).collect();
        let mut retry_records = Vec::new();
        if options.retry_enrichment {
            let ids: Vec<String> = self.ledger.unresolved_ids().map(str::to_owned).collect();
            for id in ids {
                match index.get(id.as_str()) {
                    Some(&i) => retry_records.push(results[i].clone()),
                    None => {
                        debug!(execution_id = %id, "unresolved id no longer in results; dropping");
                        self.ledger.resolve(&id);
                    }
                }
            }
        }
        drop(index);

        let tenants: Vec<(String, Vec<FailedRange>)> = if options.retry_batches {
            self.ledger
                .failed_tenants()
                .iter()
                .filter(|(tenant_id, _)| !self.ledger.is_abandoned(tenant_id))
                .map(|(tenant_id, ranges)| (tenant_id.clone(), ranges.clone()))
                .collect()
        } else {
            Vec::new()
        };

        let total = retry_records.len() + tenants.len();
        summary.retried = total;
        progress.emit(ProgressEvent::Started { total });
        let mut completed = 0;

        // ------ Enrichment retries ------
        if !retry_records.is_empty() {
            // A catalog outage during the fetch leaves the cache unbuilt.
            self.cache
                .ensure_built(self.transport, self.config.enrichment.catalog_timeout)
                .await;
            let pacing = LookupPacing {
                timeout: self.config.reconcile.context_timeout,
                ..LookupPacing::interactive(&self.config.enrichment)
            };
            let batch_size = pacing.batch_size.max(1);
            for (batch_index, start) in (0..retry_records.len()).step_by(batch_size).enumerate() {
                if batch_index > 0 && !pacing.batch_delay.is_zero() {
                    tokio::time::sleep(pacing.batch_delay).await;
                }
                let end = (start + batch_size).min(retry_records.len());
                let targets: Vec<usize> = (start..end).collect();
                let resolved = resolve_contexts(
                    self.transport,
                    pacing,
                    &*self.cache,
                    &mut *self.ledger,
                    &mut retry_records,
                    &targets,
                )
                .await;
                summary.recovered += resolved;
                completed += targets.len();
                progress.emit(ProgressEvent::Advanced {
                    completed,
                    total,
                    recovered: summary.recovered,
                });
            }

            let resolved: Vec<ExecutionRecord> =
                retry_records.into_iter().filter(|r| r.trigger_info.is_some()).collect();
            let stats = merge_by_id(results, resolved);
            summary.updated += stats.updated;
        }

        // ------ Tenant retries ------
        if !tenants.is_empty() {
            let exhaustion = if options
                .abandon_exhausted
                .unwrap_or(self.config.reconcile.abandon_exhausted_tenants)
            {
                Exhaustion::Abandon
            } else {
                Exhaustion::SkipRange
            };
            let cap = self.config.reconcile.tenant_concurrency.max(1);
            let mut queue = tenants.into_iter();
            let mut in_flight = JoinSet::new();
            let mut recovered_rows = Vec::new();

            loop {
                while in_flight.len() < cap {
                    let Some((tenant_id, ranges)) = queue.next() else { break };
                    debug!(tenant_id = %tenant_id, ranges = ranges.len(), "retrying tenant");
                    in_flight.spawn(retry_tenant(
                        Arc::clone(self.transport),
                        tenant_id,
                        ranges,
                        self.config.strict.clone(),
                        self.config.inter_chunk_delay,
                        exhaustion,
                        self.config.row_limit,
                    ));
                }
                let Some(joined) = in_flight.join_next().await else { break };
                completed += 1;

                match joined {
                    Ok(retry) => {
                        let rows = retry.rows.len();
                        if retry.abandoned {
                            self.ledger.abandon_tenant(&retry.tenant_id);
                            summary.abandoned += 1;
                            progress.emit(ProgressEvent::TenantAbandoned {
                                tenant_id: retry.tenant_id.clone(),
                            });
                        } else {
                            debug!(
                                tenant_id = %retry.tenant_id,
                                rows,
                                still_missing = retry.missing.len(),
                                "tenant retried"
                            );
                            self.ledger.replace_tenant_ranges(&retry.tenant_id, retry.missing);
                        }
                        recovered_rows.extend(retry.rows);
                    }
                    // The tenant keeps its ledger entry and is retried next pass.
                    Err(e) => warn!(error = %e, "tenant retry task failed"),
                }
                progress.emit(ProgressEvent::Advanced {
                    completed,
                    total,
                    recovered: summary.recovered + recovered_rows.len(),
                });
            }

            let stats = self.merge_rows(results, recovered_rows).await;
            summary.recovered += stats.inserted;
            summary.inserted += stats.inserted;
            summary.updated += stats.updated;
        }

        info!(
            retried = summary.retried,
            recovered = summary.recovered,
            abandoned = summary.abandoned,
            late_rows = summary.late_rows,
            "reconcile finished"
        );
        progress.emit(ProgressEvent::Finished { summary });
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn dropped_receiver_never_panics_the_reporter() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut reporter = ProgressReporter::new(Some(tx));

        reporter.emit(ProgressEvent::Started { total: 1 });
        assert!(reporter.tx.is_none());
        reporter.emit(ProgressEvent::Finished { summary: ReconcileSummary::default() });
    }

    #[test]
    fn progress_events_serialise_with_event_tag() {
        let event = ProgressEvent::Advanced { completed: 1, total: 3, recovered: 2 };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["event"], "advanced");
        assert_eq!(value["recovered"], 2);
    }
}
