use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use collapse_cache::{delegate, BreakerConfig, CollapseError, ResilientCache};
use collapse_core::metrics::MetricSink;

#[derive(Default)]
struct Recording {
    counters: Mutex<Vec<(String, Vec<(String, String)>, f64)>>,
}

impl MetricSink for Recording {
    fn record_distribution(&self, _name: &str, _tags: &[(&str, &str)], _value: f64) {}
    fn record_timer(&self, _name: &str, _tags: &[(&str, &str)], _value: Duration) {}
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        self.counters.lock().unwrap().push((
            name.to_string(),
            tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            value,
        ));
    }
    fn record_gauge(&self, _name: &str, _tags: &[(&str, &str)], _value: f64) {}
}

impl Recording {
    fn count(&self, name: &str) -> f64 {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, _, v)| v)
            .sum()
    }
}

#[tokio::test(start_paused = true)]
async fn a_slow_delegate_call_times_out_and_counts_it() {
    let metrics = Arc::new(Recording::default());

    let cache: ResilientCache<String, String> = ResilientCache::builder()
        .delegate(delegate(
            |_key: String| async move {
                tokio::time::sleep(Duration::from_millis(15)).await;
                Ok("value".to_string())
            },
            |_key: String, _value: String| async move { Ok(()) },
        ))
        .name("my-cache")
        .timeout(Duration::from_millis(10))
        .metrics(SharedSink(metrics.clone()), false)
        .build()
        .unwrap();

    let result = cache.get("a".to_string()).await;
    assert!(matches!(result, Err(CollapseError::Timeout(_))));
    assert_eq!(metrics.count("cache_request_timeouts"), 1.0);
}

/// Forwards to a shared [`Recording`], since `ResilientCacheBuilder::metrics`
/// takes ownership of its sink but the test needs to inspect it afterwards.
struct SharedSink(Arc<Recording>);

impl MetricSink for SharedSink {
    fn record_distribution(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        self.0.record_distribution(name, tags, value);
    }
    fn record_timer(&self, name: &str, tags: &[(&str, &str)], value: Duration) {
        self.0.record_timer(name, tags, value);
    }
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        self.0.increment_counter(name, tags, value);
    }
    fn record_gauge(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        self.0.record_gauge(name, tags, value);
    }
}

#[tokio::test(start_paused = true)]
async fn the_breaker_opens_after_two_failures_and_rejects_the_next_calls() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();

    let cache: ResilientCache<String, String> = ResilientCache::builder()
        .delegate(delegate(
            move |_key: String| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async move { Err(Box::<dyn std::error::Error + Send + Sync>::from("boom")) }
            },
            |_key: String, _value: String| async move { Ok(()) },
        ))
        .name("flaky-cache")
        .timeout(Duration::from_secs(1))
        .breaker_config(BreakerConfig {
            failure_rate_threshold: 0.5,
            sliding_window_size: 2,
            minimum_number_of_calls: 2,
            permitted_calls_in_half_open_state: 1,
            wait_duration_in_open_state: Duration::from_secs(60),
        })
        .build()
        .unwrap();

    assert!(cache.get("a".to_string()).await.is_err());
    assert!(cache.get("b".to_string()).await.is_err());

    assert!(matches!(
        cache.get("c".to_string()).await,
        Err(CollapseError::CallNotPermitted(_))
    ));
    assert!(matches!(
        cache.get("d".to_string()).await,
        Err(CollapseError::CallNotPermitted(_))
    ));
    assert!(matches!(
        cache.put("e".to_string(), "v".to_string()).await,
        Err(CollapseError::CallNotPermitted(_))
    ));

    assert_eq!(calls.load(Ordering::SeqCst), 2, "delegate must not be invoked while open");
}
