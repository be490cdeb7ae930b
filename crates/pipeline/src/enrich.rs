//! Trigger/provenance enrichment.
//!
//! Raw rows go through structural inference first. Only rows it cannot
//! classify cost a context lookup, and those lookups run in small batches.
//! A failed lookup never fails the call: the record comes back unresolved
//! and retryable, and its id goes into the retry ledger.

use std::sync::Arc;
use std::time::Duration;

use records::queries::executions::get_execution_context;
use records::{ExecutionRecord, RawExecution};
use tracing::{debug, info, instrument, warn};
use transport::QueryTransport;

use crate::cache::ReferenceCache;
use crate::classify::{classify_context, infer_trigger, name_from_cache, wants_trigger_name};
use crate::config::EnrichmentConfig;
use crate::ledger::RetryLedger;

/// How the context lookups of one pass are paced.
#[derive(Debug, Clone, Copy)]
pub struct LookupPacing {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub timeout: Duration,
}

impl LookupPacing {
    pub fn interactive(config: &EnrichmentConfig) -> Self {
        Self {
            batch_size: config.context_batch_size,
            batch_delay: config.context_batch_delay,
            timeout: config.context_timeout,
        }
    }
}

/// Attach trigger provenance to every row.
///
/// Returns one record per input row, in input order.
#[instrument(skip_all, fields(rows = raws.len()))]
pub async fn enrich_records(
    transport: &Arc<dyn QueryTransport>,
    config: &EnrichmentConfig,
    cache: &mut ReferenceCache,
    ledger: &mut RetryLedger,
    raws: Vec<RawExecution>,
) -> Vec<ExecutionRecord> {
    let mut records: Vec<ExecutionRecord> = raws.into_iter().map(ExecutionRecord::from).collect();

    // Phase 1
    let mut inferred = Vec::new();
    let mut needs_context = Vec::new();
    for (i, record) in records.iter().enumerate() {
        match infer_trigger(record, config) {
            Some(info) => inferred.push((i, info)),
            None => needs_context.push(i),
        }
    }

    let wants_names = inferred.iter().any(|(i, info)| wants_trigger_name(&records[*i], info));
    if !needs_context.is_empty() || wants_names {
        cache.ensure_built(transport, config.catalog_timeout).await;
    }

    for (i, info) in inferred {
        let info = name_from_cache(&records[i], info, cache);
        records[i].apply_trigger(info);
    }
    debug!(
        inferred = records.len() - needs_context.len(),
        pending = needs_context.len(),
        "structural inference done"
    );

    // Phase 2
    if !needs_context.is_empty() {
        resolve_contexts(
            transport,
            LookupPacing::interactive(config),
            cache,
            ledger,
            &mut records,
            &needs_context,
        )
        .await;
    }
    records
}

/// Look up and classify the contexts of `records[targets]`.
///
/// Lookups within a batch run concurrently; batches are separated by the
/// pacing delay. Successes are applied and cleared from the ledger, failures
/// are marked unresolved and recorded. Returns how many were resolved.
pub async fn resolve_contexts(
    transport: &Arc<dyn QueryTransport>,
    pacing: LookupPacing,
    cache: &ReferenceCache,
    ledger: &mut RetryLedger,
    records: &mut [ExecutionRecord],
    targets: &[usize],
) -> usize {
    let mut resolved = 0;

    for (batch_index, batch) in targets.chunks(pacing.batch_size.max(1)).enumerate() {
        if batch_index > 0 && !pacing.batch_delay.is_zero() {
            tokio::time::sleep(pacing.batch_delay).await;
        }

        let lookups: Vec<_> = batch
            .iter()
            .map(|&i| {
                let transport = Arc::clone(transport);
                let execution_id = records[i].id.clone();
                let handle = tokio::spawn(async move {
                    get_execution_context(transport.as_ref(), &execution_id, pacing.timeout).await
                });
                (i, handle)
            })
            .collect();

        for (i, handle) in lookups {
            let record = &mut records[i];
            match handle.await {
                Ok(Ok(context)) => {
                    let (info, user) = classify_context(record, &context, cache);
                    record.apply_trigger(info);
                    if record.user.is_none() {
                        record.user = user;
                    }
                    ledger.resolve(&record.id);
                    resolved += 1;
                }
                Ok(Err(e)) => {
                    warn!(
                        execution_id = %record.id,
                        timed_out = e.is_timeout(),
                        timeout_ms = pacing.timeout.as_millis() as u64,
                        error = %e,
                        "context lookup failed; returning record unresolved"
                    );
                    record.mark_unresolved();
                    ledger.record_unresolved(record.id.clone());
                }
                Err(e) => {
                    warn!(execution_id = %record.id, error = %e, "context lookup task died");
                    record.mark_unresolved();
                    ledger.record_unresolved(record.id.clone());
                }
            }
        }
    }

    info!(looked_up = targets.len(), resolved, "context lookups finished");
    resolved
}
