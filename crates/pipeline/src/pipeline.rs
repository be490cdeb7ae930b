//! The public retrieval entry points.
//!
//! `ExecutionPipeline` owns every piece of session state: the reference
//! cache, the retry ledger, and the batches still running from earlier
//! fan-outs. Nothing is process-global; dropping the pipeline drops the
//! session.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use records::{ExecutionRecord, TriggerKind};
use tracing::{info, instrument, warn};
use transport::QueryTransport;
use uuid::Uuid;

use crate::cache::ReferenceCache;
use crate::config::PipelineConfig;
use crate::enrich::enrich_records;
use crate::error::{PipelineError, ScheduleError};
use crate::fanout::PendingBatches;
use crate::ledger::RetryLedger;
use crate::merge::{dedup_raw, MergeStats};
use crate::reconcile::{ReconcileOptions, ReconcileSummary, Reconciler};
use crate::scheduler::{ChunkScheduler, Exhaustion};
use crate::source::TenantRangeSource;
use crate::window::{AnchoredWindow, TimeWindow};

/// One retrieval request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionQuery {
    pub window: TimeWindow,
    /// Tenants to fetch; `None` or empty means the configured default.
    pub tenant_ids: Option<Vec<String>>,
    pub workflow_id: Option<String>,
    /// Attach trigger provenance. Without it records carry no `trigger_info`.
    pub enrich: bool,
}

impl ExecutionQuery {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            tenant_ids: None,
            workflow_id: None,
            enrich: true,
        }
    }

    pub fn tenants(mut self, tenant_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tenant_ids = Some(tenant_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn enrich(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }
}

pub struct ExecutionPipeline {
    transport: Arc<dyn QueryTransport>,
    config: PipelineConfig,
    cache: ReferenceCache,
    ledger: RetryLedger,
    pending: PendingBatches,
}

impl ExecutionPipeline {
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            cache: ReferenceCache::new(),
            ledger: RetryLedger::new(),
            pending: PendingBatches::default(),
        })
    }

    // ------ Retrieval ------

    /// Fetch every execution in the query's window.
    ///
    /// Only a bad window or a missing tenant set fails the call. Anything
    /// that goes wrong while fetching shrinks the result instead and is
    /// left in the ledger for [`ExecutionPipeline::reconcile`].
    #[instrument(skip_all, fields(
        run_id = %Uuid::new_v4(),
        newest_days = query.window.newest_days,
        oldest_days = query.window.oldest_days,
        enrich = query.enrich,
    ))]
    pub async fn fetch(
        &mut self,
        query: &ExecutionQuery,
    ) -> Result<Vec<ExecutionRecord>, PipelineError> {
        query.window.validate()?;
        let tenants = self.resolve_tenants(query.tenant_ids.as_deref())?;
        let window = AnchoredWindow::new(Utc::now(), query.window);

        let scheduler = ChunkScheduler::new(
            &self.config.interactive,
            self.config.inter_chunk_delay,
            Exhaustion::SkipRange,
        );
        let mut source = TenantRangeSource {
            transport: &self.transport,
            tenants: &tenants,
            workflow_id: query.workflow_id.as_deref(),
            row_limit: self.config.row_limit,
            fan_out: &self.config.fan_out,
            ledger: &mut self.ledger,
            pending: &mut self.pending,
        };

        let rows = match scheduler.run(&window, &mut source).await {
            Ok(outcome) => {
                info!(
                    rows = outcome.rows.len(),
                    chunks = outcome.fetched.len(),
                    skipped = outcome.skipped.len(),
                    truncated = outcome.truncated.len(),
                    retries = outcome.retries,
                    "window fetched"
                );
                outcome.rows
            }
            Err(ScheduleError::Abandoned { range, recovered }) => {
                warn!(range = %range.range, "interactive fetch stopped early");
                recovered
            }
        };
        let rows = dedup_raw(rows);

        if !query.enrich {
            return Ok(rows.into_iter().map(ExecutionRecord::from).collect());
        }
        Ok(enrich_records(
            &self.transport,
            &self.config.enrichment,
            &mut self.cache,
            &mut self.ledger,
            rows,
        )
        .await)
    }

    /// Fetch executions for `tenant_ids` (or the default tenant).
    pub async fn fetch_executions(
        &mut self,
        window: TimeWindow,
        tenant_ids: Option<&[String]>,
        enrich: bool,
    ) -> Result<Vec<ExecutionRecord>, PipelineError> {
        let query = ExecutionQuery {
            window,
            tenant_ids: tenant_ids.map(<[String]>::to_vec),
            workflow_id: None,
            enrich,
        };
        self.fetch(&query).await
    }

    /// Fetch enriched executions and keep those whose trigger is `kind`.
    ///
    /// Records still unresolved have no kind and are left out.
    pub async fn fetch_executions_by_trigger_kind(
        &mut self,
        kind: TriggerKind,
        window: TimeWindow,
        workflow_id: Option<&str>,
        tenant_ids: Option<&[String]>,
    ) -> Result<Vec<ExecutionRecord>, PipelineError> {
        let query = ExecutionQuery {
            window,
            tenant_ids: tenant_ids.map(<[String]>::to_vec),
            workflow_id: workflow_id.map(str::to_owned),
            enrich: true,
        };
        let mut records = self.fetch(&query).await?;
        records.retain(|record| record.trigger_kind() == Some(kind));
        Ok(records)
    }

    // ------ Follow-up ------

    /// Retry what earlier fetches left behind and merge it into `results`.
    ///
    /// Safe to call repeatedly; with nothing outstanding it makes no remote
    /// calls.
    pub async fn reconcile(
        &mut self,
        results: &mut Vec<ExecutionRecord>,
        options: ReconcileOptions,
    ) -> ReconcileSummary {
        self.reconciler().run(results, options).await
    }

    /// Wait for fan-out batches still running and merge their rows.
    pub async fn collect_late_batches(&mut self, results: &mut Vec<ExecutionRecord>) -> MergeStats {
        self.reconciler().collect_late(results).await.0
    }

    /// Drop the reference cache; the next enrichment rebuilds it.
    pub fn clear_reference_cache(&mut self) {
        self.cache.clear();
    }

    // ------ Accessors ------

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    pub fn reference_cache(&self) -> &ReferenceCache {
        &self.cache
    }

    /// Whether [`ExecutionPipeline::reconcile`] has anything to do.
    pub fn has_outstanding_work(&self) -> bool {
        !self.ledger.is_empty() || !self.pending.is_empty()
    }

    fn reconciler(&mut self) -> Reconciler<'_> {
        Reconciler {
            transport: &self.transport,
            config: &self.config,
            cache: &mut self.cache,
            ledger: &mut self.ledger,
            pending: &mut self.pending,
        }
    }

    /// De-duplicated tenant ids, falling back to the default tenant.
    fn resolve_tenants(&self, requested: Option<&[String]>) -> Result<Vec<String>, PipelineError> {
        let mut seen = HashSet::new();
        let tenants: Vec<String> = requested
            .unwrap_or_default()
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
            .map(str::to_owned)
            .collect();
        if !tenants.is_empty() {
            return Ok(tenants);
        }
        self.config
            .default_tenant
            .clone()
            .map(|tenant| vec![tenant])
            .ok_or(PipelineError::MissingTenants)
    }
}
