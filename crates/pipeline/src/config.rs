//! Pipeline configuration.
//!
//! Every knob has a default tuned for an interactive dashboard session.
//! The numbers are empirical; only the shape of each policy is load-bearing
//! (chunk timeouts grow as chunks shrink, fan-out never waits unbounded).
//! Durations are written as milliseconds when (de)serialised.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PipelineError;

// ---------------------------------------------------------------------------
// Chunk tables
// ---------------------------------------------------------------------------

/// One rung of the chunk-size ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStep {
    /// Width of the chunk in days.
    pub days: f64,
    /// Hard limit; the request is aborted after this long.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Soft budget; a success slower than this degrades later chunks.
    #[serde(rename = "budget_ms", with = "duration_ms")]
    pub budget: Duration,
}

impl ChunkStep {
    pub fn new(days: f64, timeout: Duration, budget: Duration) -> Self {
        Self { days, timeout, budget }
    }
}

/// Chunk sizes from largest to smallest, with timeouts that grow as the
/// chunks shrink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkTable {
    pub steps: Vec<ChunkStep>,
}

impl ChunkTable {
    /// Ladder used by the initial, interactive fetch.
    pub fn interactive() -> Self {
        Self::from_secs(&[
            (6.0, 20, 12),
            (3.0, 25, 15),
            (2.0, 30, 18),
            (1.0, 35, 21),
            (0.5, 40, 24),
            (0.25, 45, 27),
            (0.1, 50, 30),
        ])
    }

    /// Shorter, tighter ladder used by background reconciliation.
    pub fn strict() -> Self {
        Self::from_secs(&[(2.0, 10, 6), (1.0, 12, 7), (0.5, 15, 9)])
    }

    fn from_secs(steps: &[(f64, u64, u64)]) -> Self {
        Self {
            steps: steps
                .iter()
                .map(|&(days, timeout, budget)| {
                    ChunkStep::new(days, Duration::from_secs(timeout), Duration::from_secs(budget))
                })
                .collect(),
        }
    }

    pub fn smallest_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err(format!("{name} chunk table is empty"));
        }
        for step in &self.steps {
            if !(step.days.is_finite() && step.days > 0.0) {
                return Err(format!(
                    "{name} chunk size {} is not a positive number of days",
                    step.days
                ));
            }
            if step.timeout.is_zero() || step.budget > step.timeout {
                return Err(format!(
                    "{name} chunk of {} days needs 0 < budget <= timeout",
                    step.days
                ));
            }
        }
        for pair in self.steps.windows(2) {
            if pair[1].days >= pair[0].days {
                return Err(format!("{name} chunk sizes must strictly decrease"));
            }
            if pair[1].timeout < pair[0].timeout {
                return Err(format!("{name} chunk timeouts must not shrink with the chunk size"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Tenant batch fan-out policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Maximum tenant ids per request.
    pub batch_size: usize,
    /// Delay between consecutive batch launches.
    #[serde(rename = "stagger_ms", with = "duration_ms")]
    pub stagger: Duration,
    /// Fraction of batches that must finish before an early return is allowed.
    pub early_return_fraction: f64,
    /// Upper bound on the time spent waiting for batches.
    #[serde(rename = "max_wait_ms", with = "duration_ms")]
    pub max_wait: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            stagger: Duration::from_millis(100),
            early_return_fraction: 0.8,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl FanOutConfig {
    /// Number of finished batches at which an early return becomes possible.
    pub fn early_return_threshold(&self, total_batches: usize) -> usize {
        let needed = (self.early_return_fraction * total_batches as f64).ceil() as usize;
        needed.clamp(1, total_batches.max(1))
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Payload keys starting with any of these mark an app-platform trigger.
    pub reserved_key_prefixes: Vec<String>,
    /// Workflows whose name contains one of these are classified as skipped.
    pub skip_workflow_patterns: Vec<String>,
    /// Context lookups issued together.
    pub context_batch_size: usize,
    #[serde(rename = "context_batch_delay_ms", with = "duration_ms")]
    pub context_batch_delay: Duration,
    #[serde(rename = "context_timeout_ms", with = "duration_ms")]
    pub context_timeout: Duration,
    #[serde(rename = "catalog_timeout_ms", with = "duration_ms")]
    pub catalog_timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            reserved_key_prefixes: vec!["__app_".to_string()],
            skip_workflow_patterns: Vec::new(),
            context_batch_size: 10,
            context_batch_delay: Duration::from_millis(100),
            context_timeout: Duration::from_secs(8),
            catalog_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Tenants retried at the same time. This is the only explicit
    /// backpressure against the remote service.
    pub tenant_concurrency: usize,
    /// Timeout for retried context lookups.
    #[serde(rename = "context_timeout_ms", with = "duration_ms")]
    pub context_timeout: Duration,
    /// Give up on a tenant for the session once its smallest retry chunk fails.
    pub abandon_exhausted_tenants: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tenant_concurrency: 3,
            context_timeout: Duration::from_secs(20),
            abandon_exhausted_tenants: true,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Tuning knobs for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub interactive: ChunkTable,
    pub strict: ChunkTable,
    #[serde(rename = "inter_chunk_delay_ms", with = "duration_ms")]
    pub inter_chunk_delay: Duration,
    pub fan_out: FanOutConfig,
    /// Row limit sent with every `ListExecutions` request.
    pub row_limit: u32,
    /// Tenant used when the caller passes none.
    pub default_tenant: Option<String>,
    pub enrichment: EnrichmentConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interactive: ChunkTable::interactive(),
            strict: ChunkTable::strict(),
            inter_chunk_delay: Duration::from_millis(250),
            fan_out: FanOutConfig::default(),
            row_limit: 5000,
            default_tenant: None,
            enrichment: EnrichmentConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.interactive
            .validate("interactive")
            .and_then(|_| self.strict.validate("strict"))
            .map_err(PipelineError::NotConfigured)?;

        let fraction = self.fan_out.early_return_fraction;
        if self.fan_out.batch_size == 0 {
            return Err(PipelineError::NotConfigured("fan-out batch size is zero".into()));
        }
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(PipelineError::NotConfigured(format!(
                "early return fraction {fraction} is outside (0, 1]"
            )));
        }
        if self.fan_out.max_wait.is_zero() {
            return Err(PipelineError::NotConfigured("fan-out max wait is zero".into()));
        }
        if self.row_limit == 0 {
            return Err(PipelineError::NotConfigured("row limit is zero".into()));
        }
        if self.enrichment.context_batch_size == 0 {
            return Err(PipelineError::NotConfigured("context batch size is zero".into()));
        }
        if self.enrichment.skip_workflow_patterns.iter().any(String::is_empty)
            || self.enrichment.reserved_key_prefixes.iter().any(String::is_empty)
        {
            return Err(PipelineError::NotConfigured(
                "empty skip pattern or reserved prefix would match everything".into(),
            ));
        }
        if self.reconcile.tenant_concurrency == 0 {
            return Err(PipelineError::NotConfigured("reconcile concurrency is zero".into()));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().expect("default config must validate");
    }

    #[test]
    fn timeouts_grow_as_chunks_shrink() {
        for table in [ChunkTable::interactive(), ChunkTable::strict()] {
            for pair in table.steps.windows(2) {
                assert!(pair[0].days > pair[1].days);
                assert!(pair[0].timeout < pair[1].timeout);
            }
        }
        assert!(ChunkTable::strict().steps.len() < ChunkTable::interactive().steps.len());
    }

    #[test]
    fn partial_json_overrides_keep_defaults() {
        let config: PipelineConfig = serde_json::from_value(json!({
            "default_tenant": "org-1",
            "fan_out": { "batch_size": 8, "max_wait_ms": 5000 },
            "strict": [{ "days": 1.0, "timeout_ms": 4000, "budget_ms": 2000 }]
        }))
        .expect("valid config");

        assert_eq!(config.default_tenant.as_deref(), Some("org-1"));
        assert_eq!(config.fan_out.batch_size, 8);
        assert_eq!(config.fan_out.max_wait, Duration::from_secs(5));
        assert_eq!(config.fan_out.stagger, Duration::from_millis(100));
        assert_eq!(config.strict.steps.len(), 1);
        assert_eq!(config.interactive, ChunkTable::interactive());
        config.validate().expect("still valid");
    }

    #[test]
    fn growing_chunk_sizes_are_rejected() {
        let mut config = PipelineConfig::default();
        config.strict.steps.reverse();
        assert!(matches!(config.validate(), Err(PipelineError::NotConfigured(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = PipelineConfig::default();
        config.fan_out.batch_size = 0;
        assert!(matches!(config.validate(), Err(PipelineError::NotConfigured(_))));
    }

    #[test]
    fn early_return_threshold_rounds_up() {
        let fan_out = FanOutConfig::default();
        assert_eq!(fan_out.early_return_threshold(3), 3);
        assert_eq!(fan_out.early_return_threshold(5), 4);
        assert_eq!(fan_out.early_return_threshold(10), 8);
        assert_eq!(fan_out.early_return_threshold(1), 1);
    }
}
