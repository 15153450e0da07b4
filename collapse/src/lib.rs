/*!
A fan-out/fan-in request collapser: buffer concurrent single-item `apply`
calls into size- or time-bounded batches, invoke a user-supplied bulk
provider once per batch, and demultiplex the bulk response back to every
caller that asked for it.

```
# use std::time::Duration;
# use collapse::Collapser;
# async fn run() -> Result<(), collapse_core::CollapseError> {
let collapser: Collapser<u64, (u64, String)> = Collapser::builder()
    .bulk_provider(|ids: Vec<u64>| async move {
        Ok(ids.into_iter().map(|id| (id, id.to_string())).collect())
    })
    .context_value_matcher(|id, (value_id, _)| id == value_id)
    .batch_size(50)
    .maximum_wait_time(Duration::from_millis(10))
    .build()?;

let emitted = collapser.apply(1).await;
# let _ = emitted;
# Ok(())
# }
```
*/

#![deny(missing_docs)]

mod aggregator;
mod executor;

pub mod builder;
mod types;

pub use builder::{BulkProvider, Collapser, CollapserBuilder, Emitted};
pub use types::PendingOutcome;

pub use collapse_core::{BoxError, CollapseError};
