//! Composite authorizer
//!
//! Resolves `(subject, action, value)` checks through the rule registry,
//! memoizes each decision, and combines several actions with AND semantics.

pub mod cache;
pub mod metrics;

pub use cache::{CacheConfig, CacheKey, CacheStats, DecisionCache};
pub use metrics::{AuthorizerMetrics, MetricsCollector};

use crate::error::{AuthzError, Result};
use crate::rules::{RuleRegistry, RuleSource};
use crate::types::{AuthorizationRequest, Context, RuleMeta};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Authorizer configuration
#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    /// Memoize decisions per `(subject, action, value)`
    pub enable_cache: bool,

    /// Cache size and expiry
    pub cache_config: CacheConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Share one predicate invocation between concurrent identical checks.
    /// Off by default: concurrent first checks of the same key each invoke
    /// the predicate.
    pub dedup_in_flight: bool,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_config: CacheConfig::default(),
            enable_metrics: true,
            dedup_in_flight: false,
        }
    }
}

/// Advisory authorizer for UI affordances
///
/// Decisions only decide what to show; the remote service behind the rule
/// functions stays authoritative.
///
/// # Architecture
///
/// ```text
/// authorize_all ─┬─ authorize_one ─→ [DecisionCache] ─miss→ RuleRegistry → Predicate
///                ├─ authorize_one ─→ ...
///                └─ AND over all results
/// ```
///
/// Once a key has resolved, its predicate is never invoked again for the
/// lifetime of the authorizer (until the rules are reconfigured or the cache
/// is invalidated).
pub struct Authorizer {
    registry: RwLock<Arc<RuleRegistry>>,

    cache: Option<Arc<DecisionCache>>,

    /// Pending resolutions, used when `dedup_in_flight` is on
    in_flight: DashMap<CacheKey, Arc<OnceCell<bool>>>,

    /// Bumped by `configure` so results from replaced rules are not cached
    generation: AtomicU64,

    metrics: Option<Arc<MetricsCollector>>,

    config: AuthorizerConfig,
}

impl Authorizer {
    /// Create an authorizer with the default configuration
    pub fn new(registry: RuleRegistry) -> Self {
        Self::with_config(registry, AuthorizerConfig::default())
    }

    /// Create an authorizer with custom configuration
    pub fn with_config(registry: RuleRegistry, config: AuthorizerConfig) -> Self {
        let cache = config
            .enable_cache
            .then(|| Arc::new(DecisionCache::new(config.cache_config.clone())));

        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));

        info!(
            "Authorizer initialized with {} rules, cache={}, metrics={}, dedup={}",
            registry.rule_count(),
            config.enable_cache,
            config.enable_metrics,
            config.dedup_in_flight
        );

        Self {
            registry: RwLock::new(Arc::new(registry)),
            cache,
            in_flight: DashMap::new(),
            generation: AtomicU64::new(0),
            metrics,
            config,
        }
    }

    /// Replace the entire rule set
    ///
    /// Decisions cached under the previous rules are dropped.
    pub fn configure(&self, registry: RuleRegistry) {
        let rule_count = registry.rule_count();
        *self.registry.write() = Arc::new(registry);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.in_flight.clear();

        if let Some(cache) = &self.cache {
            cache.clear();
        }

        info!("Authorizer reconfigured with {} rules", rule_count);
    }

    /// Current rule set
    pub fn registry(&self) -> Arc<RuleRegistry> {
        Arc::clone(&self.registry.read())
    }

    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Check a single action
    ///
    /// A cached decision is returned without invoking the predicate.
    /// Predicate failures are returned as [`AuthzError::PredicateFailed`] and
    /// are never cached.
    pub async fn authorize_one(&self, subject: &str, action: &str, context: &Context) -> Result<bool> {
        let allowed = match &self.cache {
            Some(cache) => self.authorize_cached(cache, subject, action, context).await?,
            None if self.config.dedup_in_flight => {
                let key = DecisionCache::compute_key(subject, action, context)?;
                self.share_in_flight(key, || self.invoke(subject, action, context))
                    .await?
            }
            None => self.invoke(subject, action, context).await?,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_decision(allowed).await;
        }

        Ok(allowed)
    }

    /// Check that every action is allowed
    ///
    /// All checks run concurrently and are awaited to completion before the
    /// results are combined, so successful siblings of a failing check are
    /// still cached. An empty action list is allowed.
    pub async fn authorize_all<S>(&self, subject: &str, actions: &[S], context: &Context) -> Result<bool>
    where
        S: AsRef<str>,
    {
        if actions.is_empty() {
            debug!("No actions requested for subject={}, allowed", subject);
            return Ok(true);
        }

        let results = join_all(
            actions
                .iter()
                .map(|action| self.authorize_one(subject, action.as_ref(), context)),
        )
        .await;

        let mut allowed = true;
        for result in results {
            allowed &= result?;
        }

        debug!(
            "Composite decision for subject={} over {} actions: {}",
            subject,
            actions.len(),
            if allowed { "ALLOW" } else { "DENY" }
        );

        Ok(allowed)
    }

    /// Resolve a whole request
    pub async fn authorize(&self, request: &AuthorizationRequest) -> Result<bool> {
        self.authorize_all(&request.subject, &request.actions, &request.context)
            .await
    }

    /// Drop every cached decision
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Decision cache invalidated");
        }
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Get authorizer metrics
    pub async fn get_metrics(&self) -> Option<AuthorizerMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Metrics collector, for export
    pub fn metrics_collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    async fn authorize_cached(
        &self,
        cache: &DecisionCache,
        subject: &str,
        action: &str,
        context: &Context,
    ) -> Result<bool> {
        let key = DecisionCache::compute_key(subject, action, context)?;

        if let Some(allowed) = cache.get(&key) {
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_hit().await;
            }
            debug!("Cache hit for {}.{}", subject, action);
            return Ok(allowed);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss().await;
        }

        if !self.config.dedup_in_flight {
            return self.resolve_and_cache(cache, key, subject, action, context).await;
        }

        self.resolve_shared(cache, key, subject, action, context).await
    }

    /// Cached resolution shared between concurrent identical checks
    async fn resolve_shared(
        &self,
        cache: &DecisionCache,
        key: CacheKey,
        subject: &str,
        action: &str,
        context: &Context,
    ) -> Result<bool> {
        self.share_in_flight(key, || async move {
            // A sibling may have resolved and released its cell since our miss
            if let Some(allowed) = cache.peek(&key) {
                return Ok(allowed);
            }
            self.resolve_and_cache(cache, key, subject, action, context)
                .await
        })
        .await
    }

    /// Run `init` once per key among concurrent callers
    ///
    /// If `init` fails, the error goes to the caller that ran it and each
    /// waiter then runs its own `init`, one after another.
    async fn share_in_flight<F, Fut>(&self, key: CacheKey, init: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let cell = {
            let entry = self
                .in_flight
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(&*entry)
        };

        let result = cell.get_or_try_init(init).await.copied();

        self.in_flight
            .remove_if(&key, |_, pending| Arc::ptr_eq(pending, &cell));

        result
    }

    /// Invoke the predicate and record the first answer for `key`
    ///
    /// Answers from rules replaced by `configure` while the predicate was
    /// pending are returned to the caller but never left in the cache.
    async fn resolve_and_cache(
        &self,
        cache: &DecisionCache,
        key: CacheKey,
        subject: &str,
        action: &str,
        context: &Context,
    ) -> Result<bool> {
        let generation = self.generation.load(Ordering::SeqCst);
        let allowed = self.invoke(subject, action, context).await?;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Rules replaced while resolving {}.{}, not caching", subject, action);
            return Ok(allowed);
        }

        let stored = cache.insert_if_absent(key, allowed);

        // `configure` bumps the generation before clearing, so an insert that
        // raced it is either cleared there or caught here.
        if self.generation.load(Ordering::SeqCst) != generation {
            cache.remove(&key);
            debug!("Rules replaced while caching {}.{}, entry dropped", subject, action);
            return Ok(allowed);
        }

        Ok(stored)
    }

    async fn invoke(&self, subject: &str, action: &str, context: &Context) -> Result<bool> {
        let resolved = self.registry.read().resolve(subject, action);

        if resolved.source == RuleSource::Default {
            debug!("No rule for {}.{}, default deny", subject, action);
            if let Some(metrics) = &self.metrics {
                metrics.record_default_denial().await;
            }
        }

        let meta = RuleMeta::new(subject, action);
        let start = Instant::now();
        let outcome = resolved.predicate.evaluate(context.value(), &meta).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_invocation(start.elapsed(), outcome.is_err()).await;
        }

        match outcome {
            Ok(allowed) => {
                debug!(
                    "Predicate {}.{} resolved to {} ({:?})",
                    subject,
                    action,
                    if allowed { "ALLOW" } else { "DENY" },
                    resolved.source
                );
                Ok(allowed)
            }
            Err(source) => {
                warn!("Predicate {}.{} failed: {:#}", subject, action, source);
                Err(AuthzError::predicate_failed(subject, action, source))
            }
        }
    }
}
