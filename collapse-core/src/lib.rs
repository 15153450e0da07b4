/*!
Shared primitives used across the `collapse` workspace: a diagnostic
[`ctxt::Ctxt`] propagator, a [`clock::Clock`] and [`scheduler::Scheduler`]
pair that tests can swap for deterministic time, an error taxonomy, and a
[`metrics::MetricId`] that parameterizes metric names across hierarchical
and dimensional naming schemes.

None of this crate implements batching or circuit breaking itself; it's the
ambient layer both [`collapse`](https://docs.rs/collapse) and
[`collapse-cache`](https://docs.rs/collapse-cache) build on.
*/

#![deny(missing_docs)]

pub mod ctxt;
pub mod error;
pub mod metrics;

#[cfg(feature = "tokio")]
pub mod clock;
#[cfg(feature = "tokio")]
pub mod scheduler;

pub use error::{BoxError, CollapseError};
