//! Metrics collection for authorizer observability

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Authorizer metrics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthorizerMetrics {
    /// Single-action checks that produced a decision
    pub total_checks: u64,

    /// Checks resolved to allow
    pub allowed_checks: u64,

    /// Checks resolved to deny
    pub denied_checks: u64,

    /// Cache hits
    pub cache_hits: u64,

    /// Cache misses
    pub cache_misses: u64,

    /// Predicate invocations (cache misses that reached a rule function)
    pub predicate_invocations: u64,

    /// Checks that fell through to the default deny rule
    pub default_denials: u64,

    /// Failed predicate invocations
    pub predicate_errors: u64,

    /// Latency of predicate invocations
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl AuthorizerMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_checks + self.denied_checks;
        if total == 0 {
            0.0
        } else {
            self.allowed_checks as f64 / total as f64
        }
    }
}

/// Metrics collector with Prometheus-compatible export
pub struct MetricsCollector {
    metrics: Arc<RwLock<AuthorizerMetrics>>,

    /// Recent latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(AuthorizerMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(1_024))),
            max_samples: 10_000,
        }
    }

    pub async fn record_cache_hit(&self) {
        self.metrics.write().await.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self) {
        self.metrics.write().await.cache_misses += 1;
    }

    pub async fn record_default_denial(&self) {
        self.metrics.write().await.default_denials += 1;
    }

    /// Record a resolved check
    pub async fn record_decision(&self, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;

        if allowed {
            metrics.allowed_checks += 1;
        } else {
            metrics.denied_checks += 1;
        }
    }

    /// Record one predicate invocation and how long it took
    pub async fn record_invocation(&self, latency: Duration, failed: bool) {
        {
            let mut samples = self.latency_samples.write().await;
            samples.push(latency.as_secs_f64() * 1000.0);
            if samples.len() > self.max_samples {
                samples.drain(0..1_000);
            }
        }

        let mut metrics = self.metrics.write().await;
        metrics.predicate_invocations += 1;
        if failed {
            metrics.predicate_errors += 1;
        }
    }

    /// Get current metrics snapshot
    ///
    /// Latency figures are computed here from the retained samples.
    pub async fn get_metrics(&self) -> AuthorizerMetrics {
        let mut metrics = self.metrics.read().await.clone();

        let mut sorted = self.latency_samples.read().await.clone();
        if !sorted.is_empty() {
            sorted.sort_by(f64::total_cmp);
            metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
            metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
            metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
        }

        metrics
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = AuthorizerMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics in Prometheus format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics().await;

        format!(
            r#"# HELP ui_authz_checks_total Resolved authorization checks
# TYPE ui_authz_checks_total counter
ui_authz_checks_total {}

# HELP ui_authz_allowed_total Checks resolved to allow
# TYPE ui_authz_allowed_total counter
ui_authz_allowed_total {}

# HELP ui_authz_denied_total Checks resolved to deny
# TYPE ui_authz_denied_total counter
ui_authz_denied_total {}

# HELP ui_authz_cache_hits_total Cache hits
# TYPE ui_authz_cache_hits_total counter
ui_authz_cache_hits_total {}

# HELP ui_authz_cache_misses_total Cache misses
# TYPE ui_authz_cache_misses_total counter
ui_authz_cache_misses_total {}

# HELP ui_authz_predicate_invocations_total Rule function invocations
# TYPE ui_authz_predicate_invocations_total counter
ui_authz_predicate_invocations_total {}

# HELP ui_authz_predicate_errors_total Failed rule function invocations
# TYPE ui_authz_predicate_errors_total counter
ui_authz_predicate_errors_total {}

# HELP ui_authz_predicate_latency_seconds Rule function latency
# TYPE ui_authz_predicate_latency_seconds summary
ui_authz_predicate_latency_seconds{{quantile="0.5"}} {}
ui_authz_predicate_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.total_checks,
            metrics.allowed_checks,
            metrics.denied_checks,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.predicate_invocations,
            metrics.predicate_errors,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
