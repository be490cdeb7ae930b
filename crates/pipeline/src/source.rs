//! Chunk sources backed by the remote query service.
//!
//! [`TenantRangeSource`] drives the interactive fetch: one request when the
//! tenant set fits in a batch, a fan-out otherwise. [`DirectRangeSource`]
//! fetches a single tenant and is what reconciliation retries with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use records::queries::executions::{list_executions, ExecutionFilter};
use records::RawExecution;
use tracing::{debug, warn};
use transport::QueryTransport;

use crate::config::FanOutConfig;
use crate::error::ChunkFailure;
use crate::fanout::{fan_out, PendingBatches};
use crate::ledger::{FailedRange, RetryLedger};
use crate::scheduler::RangeSource;
use crate::window::ChunkRange;

fn filter_for(
    chunk: &ChunkRange,
    tenants: Vec<String>,
    workflow_id: Option<&str>,
    limit: u32,
) -> ExecutionFilter {
    ExecutionFilter {
        from: chunk.range.from,
        to: chunk.range.to,
        organization_ids: tenants,
        workflow_id: workflow_id.map(str::to_owned),
        limit,
    }
}

// ---------------------------------------------------------------------------
// TenantRangeSource
// ---------------------------------------------------------------------------

/// Fetches a chunk for a whole tenant set.
///
/// Failed batches are written to the ledger and batches still running when
/// a fan-out returns are parked in `pending`. A chunk only counts as failed
/// when batches failed and no rows came back at all.
pub struct TenantRangeSource<'a> {
    pub transport: &'a Arc<dyn QueryTransport>,
    pub tenants: &'a [String],
    pub workflow_id: Option<&'a str>,
    pub row_limit: u32,
    pub fan_out: &'a FanOutConfig,
    pub ledger: &'a mut RetryLedger,
    pub pending: &'a mut PendingBatches,
}

#[async_trait]
impl RangeSource for TenantRangeSource<'_> {
    async fn fetch(
        &mut self,
        chunk: &ChunkRange,
        timeout: Duration,
    ) -> Result<Vec<RawExecution>, ChunkFailure> {
        let filter = filter_for(chunk, self.tenants.to_vec(), self.workflow_id, self.row_limit);

        if self.tenants.len() <= self.fan_out.batch_size {
            return Ok(list_executions(self.transport.as_ref(), &filter, timeout).await?);
        }

        let result = fan_out(
            self.transport,
            self.tenants,
            &filter,
            self.fan_out,
            timeout,
            chunk.range,
        )
        .await;
        if let Some(outstanding) = result.outstanding {
            debug!(waiting = outstanding.waiting_batches(), "parking outstanding batches");
            self.pending.push(outstanding);
        }

        if result.rows.is_empty() && !result.failed.is_empty() {
            return Err(ChunkFailure::Batches {
                failed: result.failed.len(),
                total: result.total_batches,
            });
        }

        let scope = FailedRange::new(chunk.range, self.workflow_id);
        for tenant_ids in &result.failed {
            self.ledger.record_failed_batch(tenant_ids, scope.clone());
        }
        Ok(result.rows)
    }

    fn give_up(&mut self, chunk: &ChunkRange) {
        warn!(
            tenants = self.tenants.len(),
            range = %chunk.range,
            "recording skipped range for every tenant"
        );
        self.ledger
            .record_failed_batch(self.tenants, FailedRange::new(chunk.range, self.workflow_id));
    }

    /// The limit applies per request, so count rows per fan-out batch.
    fn truncated(&self, rows: &[RawExecution]) -> bool {
        let limit = self.row_limit as usize;
        self.tenants.chunks(self.fan_out.batch_size.max(1)).any(|batch| {
            rows.iter()
                .filter(|row| batch.contains(&row.organization.id))
                .count()
                >= limit
        })
    }
}

// ---------------------------------------------------------------------------
// DirectRangeSource
// ---------------------------------------------------------------------------

/// Fetches a chunk for one tenant with a single request. Owns its data so
/// it can move into a spawned task.
pub struct DirectRangeSource {
    transport: Arc<dyn QueryTransport>,
    tenant_id: String,
    workflow_id: Option<String>,
    row_limit: u32,
}

impl DirectRangeSource {
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        tenant_id: impl Into<String>,
        workflow_id: Option<String>,
        row_limit: u32,
    ) -> Self {
        Self {
            transport,
            tenant_id: tenant_id.into(),
            workflow_id,
            row_limit,
        }
    }
}

#[async_trait]
impl RangeSource for DirectRangeSource {
    async fn fetch(
        &mut self,
        chunk: &ChunkRange,
        timeout: Duration,
    ) -> Result<Vec<RawExecution>, ChunkFailure> {
        let filter = filter_for(
            chunk,
            vec![self.tenant_id.clone()],
            self.workflow_id.as_deref(),
            self.row_limit,
        );
        Ok(list_executions(self.transport.as_ref(), &filter, timeout).await?)
    }

    fn truncated(&self, rows: &[RawExecution]) -> bool {
        rows.len() >= self.row_limit as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{AnchoredWindow, TimeWindow};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use transport::mock::{MockReply, MockTransport};
    use transport::QueryRequest;

    fn chunk() -> ChunkRange {
        let anchor = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        AnchoredWindow::new(anchor, TimeWindow::last_days(1.0)).chunk(0.0, 1.0)
    }

    fn tenants(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("org-{i}")).collect()
    }

    fn first_org(request: &QueryRequest) -> String {
        request
            .variable("organizationIds")
            .and_then(|v| v[0].as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn rows_for(request: &QueryRequest) -> Value {
        let org = first_org(request);
        json!({ "executions": [{
            "id": format!("exec-{org}"),
            "createdAt": "2026-10-17T10:00:00Z",
            "updatedAt": "2026-10-17T10:00:00Z",
            "status": "succeeded",
            "workflow": { "id": "wf", "name": "W" },
            "organization": { "id": org }
        }] })
    }

    #[tokio::test(start_paused = true)]
    async fn small_tenant_set_is_one_request() {
        let mock = MockTransport::new(|r| MockReply::value(rows_for(r)));
        let transport: Arc<dyn QueryTransport> = Arc::new(mock.clone());
        let (mut ledger, mut pending) = (RetryLedger::new(), PendingBatches::default());
        let fan_out = FanOutConfig::default();
        let tenants = tenants(3);

        let mut source = TenantRangeSource {
            transport: &transport,
            tenants: &tenants,
            workflow_id: Some("wf-1"),
            row_limit: 100,
            fan_out: &fan_out,
            ledger: &mut ledger,
            pending: &mut pending,
        };
        let rows = source.fetch(&chunk(), Duration::from_secs(5)).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(mock.call_count(), 1);
        let request = &mock.calls()[0];
        assert_eq!(request.variable("organizationIds"), Some(&json!(["org-1", "org-2", "org-3"])));
        assert_eq!(request.variable("workflowId"), Some(&json!("wf-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_fan_out_failure_goes_to_ledger() {
        let transport: Arc<dyn QueryTransport> = Arc::new(MockTransport::new(|r| {
            if first_org(r) == "org-6" {
                MockReply::service_error("overloaded")
            } else {
                MockReply::value(rows_for(r))
            }
        }));
        let (mut ledger, mut pending) = (RetryLedger::new(), PendingBatches::default());
        let fan_out = FanOutConfig::default();
        let tenants = tenants(12);

        let mut source = TenantRangeSource {
            transport: &transport,
            tenants: &tenants,
            workflow_id: None,
            row_limit: 100,
            fan_out: &fan_out,
            ledger: &mut ledger,
            pending: &mut pending,
        };
        let rows = source.fetch(&chunk(), Duration::from_secs(5)).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(ledger.failed_tenant_count(), 5);
        assert!(ledger.failed_tenants().contains_key("org-10"));
        assert!(!ledger.failed_tenants().contains_key("org-11"));
    }

    #[tokio::test(start_paused = true)]
    async fn all_batches_failing_fails_the_chunk_without_ledger_entries() {
        let transport: Arc<dyn QueryTransport> =
            Arc::new(MockTransport::new(|_| MockReply::service_error("down")));
        let (mut ledger, mut pending) = (RetryLedger::new(), PendingBatches::default());
        let fan_out = FanOutConfig::default();
        let tenants = tenants(8);

        let mut source = TenantRangeSource {
            transport: &transport,
            tenants: &tenants,
            workflow_id: None,
            row_limit: 100,
            fan_out: &fan_out,
            ledger: &mut ledger,
            pending: &mut pending,
        };
        let result = source.fetch(&chunk(), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ChunkFailure::Batches { failed: 2, total: 2 })));

        source.give_up(&chunk());
        assert_eq!(ledger.failed_tenant_count(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn row_limit_is_checked_per_batch() {
        let transport: Arc<dyn QueryTransport> =
            Arc::new(MockTransport::new(|r| MockReply::value(rows_for(r))));
        let (mut ledger, mut pending) = (RetryLedger::new(), PendingBatches::default());
        let fan_out = FanOutConfig::default();
        let tenants = tenants(12);

        let mut source = TenantRangeSource {
            transport: &transport,
            tenants: &tenants,
            workflow_id: None,
            row_limit: 1,
            fan_out: &fan_out,
            ledger: &mut ledger,
            pending: &mut pending,
        };
        let rows = source.fetch(&chunk(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(source.truncated(&rows));

        // Three rows overall, but one per batch is under a limit of two.
        source.row_limit = 2;
        assert!(!source.truncated(&rows));
    }

    #[tokio::test]
    async fn direct_source_reports_a_full_page() {
        let mock = MockTransport::new(|r| MockReply::value(rows_for(r)));
        let source = DirectRangeSource::new(Arc::new(mock.clone()), "org-7", None, 1);
        let mut roomy = DirectRangeSource::new(Arc::new(mock), "org-7", None, 50);

        let rows = roomy.fetch(&chunk(), Duration::from_secs(5)).await.unwrap();
        assert!(source.truncated(&rows));
        assert!(!roomy.truncated(&rows));
    }

    #[tokio::test]
    async fn direct_source_queries_one_tenant() {
        let mock = MockTransport::new(|r| MockReply::value(rows_for(r)));
        let mut source = DirectRangeSource::new(Arc::new(mock.clone()), "org-7", None, 50);

        let rows = source.fetch(&chunk(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(rows[0].id, "exec-org-7");
        assert_eq!(mock.calls()[0].variable("organizationIds"), Some(&json!(["org-7"])));
    }
}
