//! The retry ledger: incomplete work accumulated across fetches.
//!
//! Two kinds of entries:
//! - execution ids whose context lookup failed (single-item retry), and
//! - tenant ids whose batch fetch failed, with every time range that failed
//!   for them (batch retry).
//!
//! Tenants have set semantics: recording the same tenant twice never yields
//! two entries. Each tenant keeps a list of failed ranges, each with the
//! workflow filter of the request that failed. Tenants abandoned
//! during reconciliation are remembered for the rest of the session and never
//! re-enter the ledger.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::window::TimeRange;

/// One time range a tenant could not be fetched for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailedRange {
    pub range: TimeRange,
    pub workflow_id: Option<String>,
}

impl FailedRange {
    pub fn new(range: TimeRange, workflow_id: Option<&str>) -> Self {
        Self {
            range,
            workflow_id: workflow_id.map(str::to_owned),
        }
    }
}

impl From<TimeRange> for FailedRange {
    fn from(range: TimeRange) -> Self {
        Self { range, workflow_id: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryLedger {
    unresolved: BTreeSet<String>,
    failed_tenants: BTreeMap<String, Vec<FailedRange>>,
    abandoned: BTreeSet<String>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ------ Enrichment failures ------

    /// Returns `true` if the id was not already recorded.
    pub fn record_unresolved(&mut self, execution_id: impl Into<String>) -> bool {
        self.unresolved.insert(execution_id.into())
    }

    /// Drop an id after a successful retry. Returns `true` if it was present.
    pub fn resolve(&mut self, execution_id: &str) -> bool {
        self.unresolved.remove(execution_id)
    }

    pub fn is_unresolved(&self, execution_id: &str) -> bool {
        self.unresolved.contains(execution_id)
    }

    pub fn unresolved_ids(&self) -> impl Iterator<Item = &str> {
        self.unresolved.iter().map(String::as_str)
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    // ------ Batch failures ------

    /// Record that `tenant_ids` could not be fetched for `range`.
    pub fn record_failed_batch(&mut self, tenant_ids: &[String], range: impl Into<FailedRange>) {
        let range = range.into();
        for tenant_id in tenant_ids {
            if self.abandoned.contains(tenant_id) {
                debug!(
                    tenant_id = %tenant_id,
                    "tenant abandoned earlier this session; not recording"
                );
                continue;
            }
            let ranges = self.failed_tenants.entry(tenant_id.clone()).or_default();
            if !ranges.contains(&range) {
                ranges.push(range.clone());
            }
        }
    }

    pub fn failed_tenants(&self) -> &BTreeMap<String, Vec<FailedRange>> {
        &self.failed_tenants
    }

    pub fn failed_tenant_count(&self) -> usize {
        self.failed_tenants.len()
    }

    /// Replace a tenant's failed ranges with those still missing.
    pub fn replace_tenant_ranges(&mut self, tenant_id: &str, missing: Vec<FailedRange>) {
        if missing.is_empty() {
            self.failed_tenants.remove(tenant_id);
        } else {
            self.failed_tenants.insert(tenant_id.to_string(), missing);
        }
    }

    /// Stop retrying a tenant for the rest of the session.
    pub fn abandon_tenant(&mut self, tenant_id: &str) {
        self.failed_tenants.remove(tenant_id);
        self.abandoned.insert(tenant_id.to_string());
    }

    pub fn is_abandoned(&self, tenant_id: &str) -> bool {
        self.abandoned.contains(tenant_id)
    }

    /// Nothing left to retry.
    pub fn is_empty(&self) -> bool {
        self.unresolved.is_empty() && self.failed_tenants.is_empty()
    }
}
