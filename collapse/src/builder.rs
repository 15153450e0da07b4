/*!
[`CollapserBuilder`]: the keyword-option builder for a [`Collapser`] (spec
§6), and the [`BulkProvider`] collaborator trait it's built around.
*/

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use collapse_core::{
    clock::{Clock, TokioClock},
    ctxt::{Ctxt, ThreadLocalCtxt},
    metrics::{MetricId, MetricSink, NoopMetricSink},
    scheduler::{spawn_on, DynScheduler, TokioScheduler},
    BoxError, CollapseError,
};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::{
    aggregator,
    executor,
    types::{PendingItem, PendingOutcome},
};

/**
A boxed, `'static` future, the shape `BulkProvider::call` returns so the
trait stays object-safe across arbitrary provider future types.
*/
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/**
The downstream asynchronous function taking a list of contexts and
returning a list of values (spec glossary: "bulk provider").

Implemented automatically for any `Fn(Vec<C>) -> Fut` closure, so most
callers never name this trait directly.
*/
pub trait BulkProvider<C, V>: Send + Sync + 'static {
    /**
    Invoke the provider with an ordered batch of contexts.
    */
    fn call(&self, contexts: Vec<C>) -> BoxFuture<Result<Vec<V>, BoxError>>;
}

impl<C, V, F, Fut> BulkProvider<C, V> for F
where
    F: Fn(Vec<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<V>, BoxError>> + Send + 'static,
{
    fn call(&self, contexts: Vec<C>) -> BoxFuture<Result<Vec<V>, BoxError>> {
        Box::pin((self)(contexts))
    }
}

/**
Builds a [`Collapser`] (spec §6's `CollapserConfig`).

`bulk_provider`, `context_value_matcher` and `maximum_wait_time` are
required; everything else has the defaults spec §6 lists.
*/
pub struct CollapserBuilder<C, V> {
    bulk_provider: Option<Arc<dyn BulkProvider<C, V>>>,
    matcher: Option<Arc<dyn Fn(&C, &V) -> bool + Send + Sync>>,
    batch_size: usize,
    max_wait: Option<Duration>,
    max_concurrency: usize,
    metric_id: MetricId,
    metric_sink: Arc<dyn MetricSink>,
    ctxt: Arc<dyn Ctxt>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn DynScheduler>,
    batch_scheduler: Arc<dyn DynScheduler>,
    emit_scheduler: Arc<dyn DynScheduler>,
}

impl<C, V> Default for CollapserBuilder<C, V> {
    fn default() -> Self {
        CollapserBuilder {
            bulk_provider: None,
            matcher: None,
            batch_size: 1,
            max_wait: None,
            max_concurrency: 1,
            metric_id: MetricId::disabled(),
            metric_sink: Arc::new(NoopMetricSink),
            ctxt: Arc::new(ThreadLocalCtxt),
            clock: Arc::new(TokioClock),
            scheduler: Arc::new(TokioScheduler),
            batch_scheduler: Arc::new(TokioScheduler),
            emit_scheduler: Arc::new(TokioScheduler),
        }
    }
}

impl<C, V> CollapserBuilder<C, V>
where
    C: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    /**
    Start building a [`Collapser`].
    */
    pub fn new() -> Self {
        Self::default()
    }

    /**
    Required. The downstream call invoked with the ordered contexts of
    a closed batch.
    */
    pub fn bulk_provider(mut self, provider: impl BulkProvider<C, V>) -> Self {
        self.bulk_provider = Some(Arc::new(provider));
        self
    }

    /**
    Required. `(context, value) -> bool`, used to demultiplex a bulk
    response back to the pending items that asked for it.
    */
    pub fn context_value_matcher(mut self, matcher: impl Fn(&C, &V) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /**
    Default 1. The batch closes and dispatches once it holds this many
    items.
    */
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /**
    Required. How long a batch waits for more items before dispatching
    whatever it has.
    */
    pub fn maximum_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /**
    Default 1. The number of bulk-provider calls allowed in flight at
    once.
    */
    pub fn batch_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /**
    Bind a metric registry and the naming scheme to report under.
    */
    pub fn metrics(mut self, sink: impl MetricSink, metric_id: MetricId) -> Self {
        self.metric_sink = Arc::new(sink);
        self.metric_id = metric_id;
        self
    }

    /**
    Override the diagnostic-context propagator. Defaults to
    [`ThreadLocalCtxt`].
    */
    pub fn ctxt(mut self, ctxt: impl Ctxt) -> Self {
        self.ctxt = Arc::new(ctxt);
        self
    }

    /**
    Override the clock used to arm the max-wait timer. Defaults to
    [`TokioClock`].
    */
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /**
    Override the collapser scheduler (owns batch membership and timers).
    */
    pub fn scheduler(mut self, scheduler: impl collapse_core::scheduler::Scheduler) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /**
    Override the batch scheduler (runs bulk-provider calls).
    */
    pub fn batch_scheduler(mut self, scheduler: impl collapse_core::scheduler::Scheduler) -> Self {
        self.batch_scheduler = Arc::new(scheduler);
        self
    }

    /**
    Override the emit scheduler (delivers results to subscribers).
    */
    pub fn emit_scheduler(mut self, scheduler: impl collapse_core::scheduler::Scheduler) -> Self {
        self.emit_scheduler = Arc::new(scheduler);
        self
    }

    /**
    Validate the configuration and spawn the collapser scheduler,
    batch scheduler, and emit scheduler loops.
    */
    pub fn build(self) -> Result<Collapser<C, V>, CollapseError> {
        let bulk_provider = self
            .bulk_provider
            .ok_or_else(|| CollapseError::ContractViolation("`bulk_provider` is required".into()))?;
        let matcher = self
            .matcher
            .ok_or_else(|| CollapseError::ContractViolation("`context_value_matcher` is required".into()))?;
        let max_wait = self
            .max_wait
            .ok_or_else(|| CollapseError::ContractViolation("`maximum_wait_time` is required".into()))?;

        if self.batch_size == 0 {
            return Err(CollapseError::ContractViolation("`batch_size` must be >= 1".into()));
        }
        if max_wait.is_zero() {
            return Err(CollapseError::ContractViolation("`maximum_wait_time` must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(CollapseError::ContractViolation("`batch_max_concurrency` must be >= 1".into()));
        }

        let (submit_tx, submit_rx) = mpsc::unbounded_channel::<PendingItem<C, V>>();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let inflight = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        spawn_on(
            &self.scheduler,
            aggregator::run(
                submit_rx,
                batch_tx,
                cancel.clone(),
                cancelled.clone(),
                self.clock.clone(),
                aggregator::AggregatorConfig {
                    batch_size: self.batch_size,
                    max_wait,
                    metric_id: self.metric_id.clone(),
                    metric_sink: self.metric_sink.clone(),
                    inflight: inflight.clone(),
                },
            ),
        );

        let executor_config = Arc::new(executor::ExecutorConfig {
            bulk_provider,
            matcher,
            max_concurrency: self.max_concurrency,
            metric_id: self.metric_id,
            metric_sink: self.metric_sink,
            ctxt: self.ctxt.clone(),
            batch_scheduler: self.batch_scheduler,
            emit_scheduler: self.emit_scheduler,
            inflight,
        });

        spawn_on(&self.scheduler, executor::run(batch_rx, executor_config));

        Ok(Collapser {
            submit_tx,
            cancel,
            cancelled,
            ctxt: self.ctxt,
            clock: self.clock,
        })
    }
}

/**
The fan-out request collapser (spec §4's "aggregator + executor pair").

Clone and share across callers; every [`Collapser::apply`] call feeds
the same batch aggregator.
*/
pub struct Collapser<C, V> {
    submit_tx: mpsc::UnboundedSender<PendingItem<C, V>>,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    ctxt: Arc<dyn Ctxt>,
    clock: Arc<dyn Clock>,
}

impl<C, V> Clone for Collapser<C, V> {
    fn clone(&self) -> Self {
        Collapser {
            submit_tx: self.submit_tx.clone(),
            cancel: self.cancel.clone(),
            cancelled: self.cancelled.clone(),
            ctxt: self.ctxt.clone(),
            clock: self.clock.clone(),
        }
    }
}

/**
A value (or empty completion) delivered to a subscriber, with the
diagnostic context captured at subscription time installed for as long
as this value is held (spec §4.3's "temporarily installs the snapshot
... at every emission").

Drop it (or destructure with [`Emitted::into_outcome`]) once the caller
is done reacting to the value to release the restored context frame.
*/
pub struct Emitted<V> {
    outcome: PendingOutcome<V>,
    _ctxt_guard: collapse_core::ctxt::ContextGuard,
}

impl<V> Emitted<V> {
    /**
    Take the outcome out, dropping the context guard.
    */
    pub fn into_outcome(self) -> PendingOutcome<V> {
        self.outcome
    }

    /**
    Borrow the outcome without dropping the context guard.
    */
    pub fn outcome(&self) -> &PendingOutcome<V> {
        &self.outcome
    }
}

impl<C, V> Collapser<C, V>
where
    C: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    /**
    Start building a collapser.
    */
    pub fn builder() -> CollapserBuilder<C, V> {
        CollapserBuilder::new()
    }

    /**
    Subscribe for a single value for `context` (spec §4.1's `apply`).

    Registers a `PendingItem` with the aggregator immediately (the Rust
    rendering of "on subscription, enqueue": unlike a lazily-polled
    reactive producer, the registration happens as soon as this is
    called, matching how the pack's own request batchers register
    before returning a reply future). Resolves once the item's batch
    has been dispatched and demultiplexed, or hangs forever if the
    collapser is or becomes cancelled first (spec §4.2's "cancel ...
    rejects subsequent apply calls by never completing their sinks").
    */
    pub async fn apply(&self, context: C) -> Emitted<V> {
        if self.cancelled.load(Ordering::Acquire) {
            abandon().await;
        }

        let ctxt_snapshot = self.ctxt.snapshot();
        let submitted_at = self.clock.now();
        let (sink, recv) = oneshot::channel();

        let item = PendingItem {
            context,
            sink,
            submitted_at,
            ctxt_snapshot: ctxt_snapshot.clone(),
            matched: false,
            pending_outcome: None,
        };

        if self.submit_tx.send(item).is_err() {
            abandon().await;
        }

        match recv.await {
            Ok(outcome) => Emitted {
                outcome,
                _ctxt_guard: self.ctxt.restore(&ctxt_snapshot),
            },
            // The batch this item belonged to was discarded by `cancel()`
            // rather than dispatched; spec §9 says `cancel` discards
            // silently, so this waiter is simply abandoned too.
            Err(_) => abandon().await,
        }
    }

    /**
    Close any open batch without dispatching it, and abandon all
    subsequent and in-flight `apply` calls. Idempotent (spec §5).
    */
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.cancel.notify_one();
        }
    }
}

async fn abandon() -> ! {
    std::future::pending::<()>().await;
    unreachable!("pending::<()> never resolves")
}
