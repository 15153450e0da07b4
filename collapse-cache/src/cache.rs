/*!
The [`ResilientCache`] wrapper (spec §4.6): `delegate.op → timeout(d) →
breaker.run`, composed as small explicit async functions the way
`emit_batcher::tokio::spawn` composes a receiver loop around an injected
wait function, rather than a generic `tower::Service` stack.
*/

use std::{sync::Arc, time::Duration};

use collapse_core::{clock::Clock, CollapseError};

use crate::{
    breaker::{BreakerConfig, CircuitBreaker},
    delegate::CacheDelegate,
    metrics::CacheMetrics,
    timeout::with_timeout,
};

/**
Builds a [`ResilientCache`] (spec §6's resilient cache constructor
arguments: `{delegateCache, cacheName, timeout, breakerConfig,
metricRegistry}`).
*/
pub struct ResilientCacheBuilder<K, V> {
    delegate: Option<Arc<dyn CacheDelegate<K, V>>>,
    name: Option<String>,
    timeout: Option<Duration>,
    breaker_config: BreakerConfig,
    metric_sink: Arc<dyn collapse_core::metrics::MetricSink>,
    compatibility_label: bool,
    clock: Arc<dyn Clock>,
}

impl<K, V> Default for ResilientCacheBuilder<K, V> {
    fn default() -> Self {
        ResilientCacheBuilder {
            delegate: None,
            name: None,
            timeout: None,
            breaker_config: BreakerConfig::default(),
            metric_sink: Arc::new(collapse_core::metrics::NoopMetricSink),
            compatibility_label: false,
            clock: Arc::new(collapse_core::clock::TokioClock),
        }
    }
}

impl<K, V> ResilientCacheBuilder<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /**
    Start building a resilient cache.
    */
    pub fn new() -> Self {
        Self::default()
    }

    /**
    Required. The underlying cache backend.
    */
    pub fn delegate(mut self, delegate: impl CacheDelegate<K, V>) -> Self {
        self.delegate = Some(Arc::new(delegate));
        self
    }

    /**
    Required. Identifies this cache in metric names (spec §6's `cacheName`).
    */
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /**
    Required. The per-call deadline enforced around every `get`/`put`.
    */
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /**
    Override the circuit breaker's configuration. Defaults to
    [`BreakerConfig::default`].
    */
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /**
    Bind a metric registry, optionally attaching the hierarchical path
    as a tag on the dimensional metrics too.
    */
    pub fn metrics(mut self, sink: impl collapse_core::metrics::MetricSink, compatibility_label: bool) -> Self {
        self.metric_sink = Arc::new(sink);
        self.compatibility_label = compatibility_label;
        self
    }

    /**
    Override the clock driving the breaker's open-state wait timer.
    Defaults to [`collapse_core::clock::TokioClock`].
    */
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /**
    Validate the configuration and build the cache.
    */
    pub fn build(self) -> Result<ResilientCache<K, V>, CollapseError> {
        let delegate = self
            .delegate
            .ok_or_else(|| CollapseError::ContractViolation("`delegate` is required".into()))?;
        let name = self
            .name
            .ok_or_else(|| CollapseError::ContractViolation("`name` is required".into()))?;
        let timeout = self
            .timeout
            .ok_or_else(|| CollapseError::ContractViolation("`timeout` is required".into()))?;

        if timeout.is_zero() {
            return Err(CollapseError::ContractViolation("`timeout` must be > 0".into()));
        }

        let metrics = CacheMetrics::new(self.metric_sink, name.clone(), self.compatibility_label);

        Ok(ResilientCache {
            delegate,
            name,
            timeout,
            breaker: Arc::new(CircuitBreaker::new(self.breaker_config, self.clock)),
            metrics: Arc::new(metrics),
        })
    }
}

/**
An async cache wrapped with a per-call timeout and a shared circuit
breaker (spec §4.6).
*/
pub struct ResilientCache<K, V> {
    delegate: Arc<dyn CacheDelegate<K, V>>,
    name: String,
    timeout: Duration,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<CacheMetrics>,
}

impl<K, V> Clone for ResilientCache<K, V> {
    fn clone(&self) -> Self {
        ResilientCache {
            delegate: self.delegate.clone(),
            name: self.name.clone(),
            timeout: self.timeout,
            breaker: self.breaker.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<K, V> ResilientCache<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /**
    Start building a resilient cache.
    */
    pub fn builder() -> ResilientCacheBuilder<K, V> {
        ResilientCacheBuilder::new()
    }

    /**
    This cache's name, as it appears in its metric names.
    */
    pub fn name(&self) -> &str {
        &self.name
    }

    /**
    The breaker's current state, for diagnostics.
    */
    pub fn breaker_state(&self) -> crate::breaker::CircuitState {
        self.breaker.state()
    }

    /**
    Look up `key` through the timeout and circuit breaker.
    */
    pub async fn get(&self, key: K) -> Result<V, CollapseError> {
        self.call("get", move |delegate| delegate.get(key)).await
    }

    /**
    Store `value` under `key` through the timeout and circuit breaker.
    */
    pub async fn put(&self, key: K, value: V) -> Result<(), CollapseError> {
        self.call("put", move |delegate| delegate.put(key, value)).await
    }

    async fn call<T, F>(&self, operation: &str, f: F) -> Result<T, CollapseError>
    where
        F: FnOnce(&dyn CacheDelegate<K, V>) -> crate::delegate::BoxFuture<Result<T, collapse_core::BoxError>>,
    {
        let permit = match self.breaker.acquire() {
            Ok(permit) => permit,
            Err(err) => {
                self.report_circuit_gauges();
                return Err(err);
            }
        };

        let result = with_timeout(self.timeout, f(self.delegate.as_ref())).await;

        match &result {
            Ok(_) => permit.success(),
            Err(CollapseError::Timeout(_)) => {
                self.metrics.record_timeout(operation);
                permit.failure();
            }
            Err(_) => permit.failure(),
        }

        self.report_circuit_gauges();
        result
    }

    fn report_circuit_gauges(&self) {
        let (successful, failed, rejected) = self.breaker.gauges();
        self.metrics.record_circuit(successful, failed, rejected);
    }
}
