/*!
The [`Clock`] type.

A clock is a service that returns the current point in time. Tests
substitute a `tokio`-paused clock so timers (the aggregator's max-wait timer,
the timeout operator's deadline) can be driven deterministically without
real sleeps, per `tokio::time`'s pause/advance test idiom.

Modeled on `emit_core::clock::Clock`, narrowed to the one reading this
workspace needs: a monotonic `tokio::time::Instant`, which tracks the paused
test clock the way `std::time::Instant` does not.
*/

use tokio::time::Instant;

/**
A service to measure the current time.
*/
pub trait Clock: Send + Sync + 'static {
    /**
    Read the current time.
    */
    fn now(&self) -> Instant;
}

/**
The default [`Clock`], backed by `tokio::time::Instant::now()`.

Under `tokio::time::pause()` this reads the paused virtual clock, which
is what lets tests advance the aggregator's timers without sleeping.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}
