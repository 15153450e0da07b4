/*!
The [`Scheduler`] type.

The collapser and resilient cache need three independently-swappable
schedulers (spec: the *collapser scheduler* serializing batch membership and
timers, the *batch scheduler* invoking the bulk provider, the *emit
scheduler* fanning results back to subscribers). Each is just a place to run
a future; this trait is the seam tests use to run everything on one
single-threaded runtime for deterministic interleaving, the way
`emit_batcher::Receiver::exec` takes an injected `wait` closure instead of
calling `tokio::time::sleep` directly.
*/

use std::{future::Future, pin::Pin, sync::Arc};

/**
A place to run background work.

The default [`TokioScheduler`] spawns onto whatever `tokio` runtime is
current. A platform parallel scheduler, per spec `§6`.
*/
pub trait Scheduler: Clone + Send + Sync + 'static {
    /**
    Run `fut` to completion, without blocking the caller.
    */
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/**
The default [`Scheduler`], backed by [`tokio::spawn`].
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut);
    }
}

/**
An object-safe [`Scheduler`].

`Scheduler::spawn` is generic over the future type, so it can't be
called through a `dyn Scheduler`. This is the boxed-future seam that
lets a collapser hold three independently-configured schedulers
(spec §6's `scheduler`, `batchScheduler`, `emitScheduler`) as plain
`Arc<dyn DynScheduler>` fields instead of three more type parameters.
*/
pub trait DynScheduler: Send + Sync + 'static {
    /**
    Run a boxed future to completion, without blocking the caller.
    */
    fn spawn_boxed(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>);
}

impl<S: Scheduler> DynScheduler for S {
    fn spawn_boxed(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        Scheduler::spawn(self, fut);
    }
}

/**
Spawn `fut` on a `dyn DynScheduler`, boxing it first.
*/
pub fn spawn_on(scheduler: &Arc<dyn DynScheduler>, fut: impl Future<Output = ()> + Send + 'static) {
    scheduler.spawn_boxed(Box::pin(fut));
}
