/*!
The [`MetricId`] type and the [`MetricSink`] collaborator trait.

The metric registry itself is an external collaborator (out of scope per
the top-level spec); what belongs here is the naming scheme that
parameterizes every metric this workspace emits across two conventions:
a dotted hierarchical path (`reactive-cache.my-cache.get.timeout`) and a
tagged dimensional name (`cache_request_timeouts{name=my-cache,operation=get}`).

Modeled on `emit_core::well_known`'s dual naming, but expressed as plain
owned data rather than the teacher's zero-copy `Key`/`Value` machinery,
which this crate has no use for since it never captures arbitrary
structured event payloads.
*/

use std::time::Duration;

/**
A tag attached to a dimensional metric.
*/
pub type Tag = (String, String);

/**
Parameterizes the name(s) a metric is recorded under.

Built once per collapser or resilient cache and reused for every metric
that component emits, so hierarchical/dimensional selection and
user-supplied tags stay consistent across `pending`, `batch.size`,
`item.delay`, `item.completion`, `timeout`, and circuit-breaker metrics.
*/
#[derive(Clone, Debug, Default)]
pub struct MetricId {
    qualifier: Option<String>,
    tags: Vec<Tag>,
    hierarchical: bool,
    dimensional: bool,
    compatibility_label: bool,
}

impl MetricId {
    /**
    A `MetricId` that emits nothing; the default for components that
    don't bind a [`MetricSink`].
    */
    pub fn disabled() -> Self {
        MetricId::default()
    }

    /**
    Emit dotted hierarchical metric names rooted at `qualifier`, e.g.
    `<qualifier>.item.pending`.
    */
    pub fn hierarchical(qualifier: impl Into<String>) -> Self {
        MetricId {
            qualifier: Some(qualifier.into()),
            hierarchical: true,
            ..MetricId::default()
        }
    }

    /**
    Emit tagged dimensional metric names, e.g. `<qualifier>_pending`.
    */
    pub fn dimensional(qualifier: impl Into<String>) -> Self {
        MetricId {
            qualifier: Some(qualifier.into()),
            dimensional: true,
            ..MetricId::default()
        }
    }

    /**
    Emit both naming schemes for the same underlying metric.
    */
    pub fn both(qualifier: impl Into<String>) -> Self {
        let qualifier = qualifier.into();
        MetricId {
            qualifier: Some(qualifier.clone()),
            hierarchical: true,
            dimensional: true,
            ..MetricId::default()
        }
    }

    /**
    Attach a tag carried on every dimensional metric this id produces.
    */
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /**
    When set, dimensional metrics additionally carry the hierarchical
    path as a tag, bridging the two naming schemes for dashboards that
    only understand one of them.
    */
    pub fn with_compatibility_label(mut self, enabled: bool) -> Self {
        self.compatibility_label = enabled;
        self
    }

    fn hierarchical_name(&self, suffix: &str) -> Option<String> {
        self.hierarchical
            .then(|| format!("{}.{suffix}", self.qualifier.as_deref().unwrap_or("collapse")))
    }

    fn dimensional_name(&self, suffix: &str) -> Option<String> {
        self.dimensional
            .then(|| format!("{}_{suffix}", self.qualifier.as_deref().unwrap_or("collapse")))
    }

    fn dimensional_tags(&self, hierarchical_name: Option<&str>) -> Vec<(String, String)> {
        let mut tags = self.tags.clone();
        if self.compatibility_label {
            if let Some(name) = hierarchical_name {
                tags.push(("hierarchical_name".to_string(), name.to_string()));
            }
        }
        tags
    }

    /**
    Record a distribution sample under this id's configured naming
    scheme(s).

    The hierarchical and dimensional suffixes are given separately since
    the two schemes don't share a shape: `item.pending` (hierarchical)
    is `pending` (dimensional), `batch.size` is `batch_size`, and so on
    per the workspace's metric name table.
    */
    pub fn record_distribution(
        &self,
        sink: &dyn MetricSink,
        hierarchical_suffix: &str,
        dimensional_suffix: &str,
        value: f64,
    ) {
        let hierarchical = self.hierarchical_name(hierarchical_suffix);
        if let Some(name) = &hierarchical {
            sink.record_distribution(name, &[], value);
        }
        if let Some(name) = self.dimensional_name(dimensional_suffix) {
            let tags = self.dimensional_tags(hierarchical.as_deref());
            sink.record_distribution(&name, &borrow_tags(&tags), value);
        }
    }

    /**
    Record a timer sample under this id's configured naming scheme(s).
    See [`MetricId::record_distribution`] for why the two suffixes are
    given separately.
    */
    pub fn record_timer(
        &self,
        sink: &dyn MetricSink,
        hierarchical_suffix: &str,
        dimensional_suffix: &str,
        value: Duration,
    ) {
        let hierarchical = self.hierarchical_name(hierarchical_suffix);
        if let Some(name) = &hierarchical {
            sink.record_timer(name, &[], value);
        }
        if let Some(name) = self.dimensional_name(dimensional_suffix) {
            let tags = self.dimensional_tags(hierarchical.as_deref());
            sink.record_timer(&name, &borrow_tags(&tags), value);
        }
    }
}

fn borrow_tags(tags: &[(String, String)]) -> Vec<(&str, &str)> {
    tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

/**
An external metrics registry.

Out of scope for this workspace to implement; callers bind a concrete
registry (statsd, Prometheus, `emit`'s own metric `Source`, ...) by
implementing this trait.
*/
pub trait MetricSink: Send + Sync + 'static {
    /**
    Record a distribution sample under `name`.
    */
    fn record_distribution(&self, name: &str, tags: &[(&str, &str)], value: f64);

    /**
    Record a timer sample under `name`.
    */
    fn record_timer(&self, name: &str, tags: &[(&str, &str)], value: Duration);

    /**
    Increment a counter under `name` by `value`.
    */
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)], value: f64);

    /**
    Record a gauge reading under `name`.
    */
    fn record_gauge(&self, name: &str, tags: &[(&str, &str)], value: f64);
}

/**
A [`MetricSink`] that discards everything. The default when no registry
is bound.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetricSink;

impl MetricSink for NoopMetricSink {
    fn record_distribution(&self, _name: &str, _tags: &[(&str, &str)], _value: f64) {}
    fn record_timer(&self, _name: &str, _tags: &[(&str, &str)], _value: Duration) {}
    fn increment_counter(&self, _name: &str, _tags: &[(&str, &str)], _value: f64) {}
    fn record_gauge(&self, _name: &str, _tags: &[(&str, &str)], _value: f64) {}
}
