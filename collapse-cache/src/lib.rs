/*!
A resilient async cache wrapper: every operation runs `delegate.op →
timeout(d) → breaker.run`, with one circuit breaker shared across all
operations of a given cache (spec §4.6).

```
# use std::time::Duration;
# use collapse_cache::{delegate, ResilientCache};
# async fn run() -> Result<(), collapse_core::CollapseError> {
let cache: ResilientCache<String, String> = ResilientCache::builder()
    .delegate(delegate(
        |key: String| async move { Ok(format!("value for {key}")) },
        |_key: String, _value: String| async move { Ok(()) },
    ))
    .name("my-cache")
    .timeout(Duration::from_millis(50))
    .build()?;

let value = cache.get("a".to_string()).await?;
# let _ = value;
# Ok(())
# }
```
*/

#![deny(missing_docs)]

mod breaker;
mod cache;
mod delegate;
mod metrics;
mod timeout;

pub use breaker::{BreakerConfig, CircuitState};
pub use cache::{ResilientCache, ResilientCacheBuilder};
pub use delegate::{delegate, CacheDelegate, FnCacheDelegate};

pub use collapse_core::{BoxError, CollapseError};
