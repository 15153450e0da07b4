/*!
The fixed metric names a resilient cache emits (spec §6): unlike
`collapse`'s [`collapse_core::metrics::MetricId`], which parameterizes a
single qualifier across a family of suffixes, the cache's hierarchical and
dimensional names use two unrelated roots (`reactive-cache.<name>.*` vs
`cache_request_timeouts` / `cache_circuit_*`), so this crate records them
directly against a [`collapse_core::metrics::MetricSink`] rather than
through `MetricId`'s single-formula naming.
*/

use std::sync::Arc;

use collapse_core::metrics::MetricSink;

/**
Emits the timeout and circuit-breaker metrics for one resilient cache
(spec §6's metric name table).
*/
pub(crate) struct CacheMetrics {
    sink: Arc<dyn MetricSink>,
    name: String,
    compatibility_label: bool,
}

impl CacheMetrics {
    pub(crate) fn new(sink: Arc<dyn MetricSink>, name: impl Into<String>, compatibility_label: bool) -> Self {
        CacheMetrics {
            sink,
            name: name.into(),
            compatibility_label,
        }
    }

    /**
    `reactive-cache.<name>.<operation>.timeout` / `cache_request_timeouts{name,operation}`.
    */
    pub(crate) fn record_timeout(&self, operation: &str) {
        let hierarchical = format!("reactive-cache.{}.{}.timeout", self.name, operation);
        self.sink.increment_counter(&hierarchical, &[], 1.0);

        let mut tags = vec![("name", self.name.as_str()), ("operation", operation)];
        if self.compatibility_label {
            tags.push(("hierarchical_name", hierarchical.as_str()));
        }
        self.sink.increment_counter("cache_request_timeouts", &tags, 1.0);
    }

    /**
    `reactive-cache.<name>.circuit.{successful,failed,rejected}` /
    `cache_circuit_<kind>{name}`.
    */
    pub(crate) fn record_circuit(&self, successful: f64, failed: f64, rejected: f64) {
        self.record_gauge("successful", successful);
        self.record_gauge("failed", failed);
        self.record_gauge("rejected", rejected);
    }

    fn record_gauge(&self, kind: &str, value: f64) {
        let hierarchical = format!("reactive-cache.{}.circuit.{}", self.name, kind);
        self.sink.record_gauge(&hierarchical, &[], value);

        let dimensional = format!("cache_circuit_{kind}");
        let mut tags = vec![("name", self.name.as_str())];
        if self.compatibility_label {
            tags.push(("hierarchical_name", hierarchical.as_str()));
        }
        self.sink.record_gauge(&dimensional, &tags, value);
    }
}
