//! Tenant batch fan-out.
//!
//! Splits a tenant set into fixed-size batches, launches them all with a
//! small stagger, and waits until one of:
//! - every batch finished,
//! - the early-return threshold is met *and* some rows arrived,
//! - the maximum wait elapsed.
//!
//! Batches still running at that point keep running. Their reports stay
//! queued in an [`OutstandingFetch`] that a later call can drain with
//! [`PendingBatches::collect`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use records::queries::executions::{list_executions, ExecutionFilter};
use records::{QueryError, RawExecution};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use transport::QueryTransport;

use crate::config::FanOutConfig;
use crate::ledger::FailedRange;
use crate::window::TimeRange;

/// What one batch task reports back.
#[derive(Debug)]
pub struct BatchReport {
    pub index: usize,
    pub tenant_ids: Vec<String>,
    pub result: Result<Vec<RawExecution>, QueryError>,
}

/// Batches of one fan-out that had not reported when it returned.
#[derive(Debug)]
pub struct OutstandingFetch {
    scope: FailedRange,
    reports: mpsc::UnboundedReceiver<BatchReport>,
    waiting: BTreeMap<usize, Vec<String>>,
}

impl OutstandingFetch {
    pub fn waiting_batches(&self) -> usize {
        self.waiting.len()
    }

    /// Wait for every remaining batch. Each batch carries its own timeout,
    /// so this always finishes.
    async fn drain(mut self, into: &mut LateBatches) {
        while let Some(report) = self.reports.recv().await {
            self.waiting.remove(&report.index);
            match report.result {
                Ok(rows) => {
                    debug!(batch = report.index, rows = rows.len(), "late batch arrived");
                    into.rows.extend(rows);
                }
                Err(e) => {
                    warn!(batch = report.index, error = %e, "late batch failed");
                    into.failed.push((report.tenant_ids, self.scope.clone()));
                }
            }
        }
        // A batch that never reported died without sending; treat it as failed.
        for (index, tenant_ids) in std::mem::take(&mut self.waiting) {
            warn!(batch = index, "batch task ended without a report");
            into.failed.push((tenant_ids, self.scope.clone()));
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug)]
pub struct FanOutResult {
    pub rows: Vec<RawExecution>,
    pub total_batches: usize,
    pub completed: usize,
    /// Tenant ids of every batch that failed.
    pub failed: Vec<Vec<String>>,
    pub outstanding: Option<OutstandingFetch>,
}

/// Fetch `filter`'s range for every tenant in `tenant_ids`, batched.
///
/// `filter.organization_ids` is ignored; each batch sets its own.
#[instrument(skip_all, fields(tenants = tenant_ids.len(), range = %range))]
pub async fn fan_out(
    transport: &Arc<dyn QueryTransport>,
    tenant_ids: &[String],
    filter: &ExecutionFilter,
    config: &FanOutConfig,
    batch_timeout: Duration,
    range: TimeRange,
) -> FanOutResult {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut waiting = BTreeMap::new();

    for (index, batch) in tenant_ids.chunks(config.batch_size.max(1)).enumerate() {
        waiting.insert(index, batch.to_vec());

        let tx = tx.clone();
        let transport = Arc::clone(transport);
        let filter = ExecutionFilter {
            organization_ids: batch.to_vec(),
            ..filter.clone()
        };
        let delay = config.stagger * index as u32;

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = list_executions(transport.as_ref(), &filter, batch_timeout).await;
            let _ = tx.send(BatchReport {
                index,
                tenant_ids: filter.organization_ids,
                result,
            });
        });
    }
    drop(tx);

    let total_batches = waiting.len();
    let threshold = config.early_return_threshold(total_batches);
    let deadline = Instant::now() + config.max_wait;

    let mut rows = Vec::new();
    let mut failed = Vec::new();
    let mut completed = 0usize;
    let mut channel_closed = false;

    while completed < total_batches {
        if completed >= threshold && !rows.is_empty() {
            info!(completed, total_batches, "early return; remaining batches keep running");
            break;
        }

        tokio::select! {
            report = rx.recv() => {
                let Some(report) = report else {
                    channel_closed = true;
                    break;
                };
                waiting.remove(&report.index);
                completed += 1;
                match report.result {
                    Ok(batch_rows) => {
                        debug!(batch = report.index, rows = batch_rows.len(), "batch finished");
                        rows.extend(batch_rows);
                    }
                    Err(e) => {
                        warn!(
                            batch = report.index,
                            tenants = ?report.tenant_ids,
                            error = %e,
                            "batch failed; queued for retry"
                        );
                        failed.push(report.tenant_ids);
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(completed, total_batches, "max wait elapsed; returning partial rows");
                break;
            }
        }
    }

    // Senders all gone but some batches never reported: their tasks died.
    if channel_closed {
        for (index, tenant_ids) in std::mem::take(&mut waiting) {
            warn!(batch = index, "batch task ended without a report");
            failed.push(tenant_ids);
        }
    }

    let outstanding = (!waiting.is_empty()).then(|| OutstandingFetch {
        scope: FailedRange::new(range, filter.workflow_id.as_deref()),
        reports: rx,
        waiting,
    });

    FanOutResult {
        rows,
        total_batches,
        completed,
        failed,
        outstanding,
    }
}

// ---------------------------------------------------------------------------
// PendingBatches
// ---------------------------------------------------------------------------

/// Rows and failures from batches that finished after their fan-out returned.
#[derive(Debug, Default)]
pub struct LateBatches {
    pub rows: Vec<RawExecution>,
    pub failed: Vec<(Vec<String>, FailedRange)>,
}

/// Every outstanding fetch of the session.
#[derive(Debug, Default)]
pub struct PendingBatches {
    fetches: Vec<OutstandingFetch>,
}

impl PendingBatches {
    pub fn push(&mut self, fetch: OutstandingFetch) {
        self.fetches.push(fetch);
    }

    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }

    /// Batches still waited on across all fetches.
    pub fn waiting_batches(&self) -> usize {
        self.fetches.iter().map(OutstandingFetch::waiting_batches).sum()
    }

    /// Await every outstanding batch and hand back what they produced.
    pub async fn collect(&mut self) -> LateBatches {
        let mut late = LateBatches::default();
        for fetch in std::mem::take(&mut self.fetches) {
            fetch.drain(&mut late).await;
        }
        late
    }
}
