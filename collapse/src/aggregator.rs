/*!
The batch aggregator: a single-writer task that owns the current open
[`Batch`] exclusively (spec §4.1, §5's "collapser scheduler"), modeled on
`emit_batcher`'s `State` guarded by one lock, generalized here into a
dedicated task plus channel so there's nothing to lock at all — membership,
size triggers, and time triggers are all serialized by being handled in one
`select!` loop on one task.
*/

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use collapse_core::{clock::Clock, metrics::MetricId};
use tokio::{
    sync::{mpsc, Notify},
    time::Instant,
};

use crate::types::{Batch, CloseReason, PendingItem};

pub(crate) struct AggregatorConfig {
    pub(crate) batch_size: usize,
    pub(crate) max_wait: std::time::Duration,
    pub(crate) metric_id: MetricId,
    pub(crate) metric_sink: Arc<dyn collapse_core::metrics::MetricSink>,
    /**
    Shared with the executor: the count of items submitted but not yet
    completed (spec §4.1/§6's `pending`), not just the open batch's
    length, which undercounts once a batch has dispatched but not
    finished.
    */
    pub(crate) inflight: Arc<AtomicUsize>,
}

/**
Runs until `submit_rx` is closed (the [`crate::Collapser`] was dropped)
or `cancel` is notified (the [`crate::Collapser`] was cancelled).

Never dispatches an empty batch (spec §3's `Batch` invariant): the only
two triggers that close a batch, size and timer, both check
`!batch.is_empty()` first.
*/
pub(crate) async fn run<C, V>(
    mut submit_rx: mpsc::UnboundedReceiver<PendingItem<C, V>>,
    batch_tx: mpsc::UnboundedSender<Batch<C, V>>,
    cancel: Arc<Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
) {
    let mut batch: Vec<PendingItem<C, V>> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.notified() => {
                tracing::debug!(items = batch.len(), "collapser cancelled; discarding open batch");
                return;
            }

            item = submit_rx.recv() => {
                match item {
                    Some(item) => {
                        if batch.is_empty() {
                            deadline = Some(clock.now() + config.max_wait);
                        }
                        batch.push(item);
                        let inflight = config.inflight.fetch_add(1, Ordering::Relaxed) + 1;

                        config.metric_id.record_distribution(
                            config.metric_sink.as_ref(),
                            "item.pending",
                            "pending",
                            inflight as f64,
                        );

                        if batch.len() >= config.batch_size {
                            deadline = None;
                            dispatch(&mut batch, CloseReason::SizeReached, &batch_tx, &config);
                        }
                    }
                    None => {
                        tracing::debug!(items = batch.len(), "collapser dropped; discarding open batch");
                        return;
                    }
                }
            }

            _ = wait_for(deadline) => {
                deadline = None;
                if !batch.is_empty() {
                    dispatch(&mut batch, CloseReason::TimeExpired, &batch_tx, &config);
                }
            }
        }

        if cancelled.load(Ordering::Acquire) {
            tracing::debug!(items = batch.len(), "collapser cancelled; discarding open batch");
            return;
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/**
Close the current batch and hand it to the executor.

Tie-break per spec §4.1: whichever trigger (size or timer) observes the
batch non-empty first wins. Because both triggers run inside the same
`select!` arm on the same task, there's no race to break: exactly one of
them ever sees a non-empty batch for a given item set.
*/
fn dispatch<C, V>(
    batch: &mut Vec<PendingItem<C, V>>,
    close_reason: CloseReason,
    batch_tx: &mpsc::UnboundedSender<Batch<C, V>>,
    config: &AggregatorConfig,
) {
    let items = std::mem::take(batch);

    config.metric_id.record_distribution(
        config.metric_sink.as_ref(),
        "batch.size",
        "batch_size",
        items.len() as f64,
    );

    let batch = Batch {
        items,
        created_at: Instant::now(),
        close_reason,
    };

    // The executor outlives the aggregator for the lifetime of the
    // collapser, so this only fails if the whole collapser is already
    // being torn down; either way there's nothing to recover.
    let _ = batch_tx.send(batch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use collapse_core::{clock::TokioClock, ctxt::ContextSnapshot, metrics::NoopMetricSink};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    fn item(context: u64) -> (PendingItem<u64, u64>, oneshot::Receiver<crate::types::PendingOutcome<u64>>) {
        let (sink, recv) = oneshot::channel();
        (
            PendingItem {
                context,
                sink,
                submitted_at: Instant::now(),
                ctxt_snapshot: ContextSnapshot::empty(),
                matched: false,
                pending_outcome: None,
            },
            recv,
        )
    }

    fn config(batch_size: usize) -> AggregatorConfig {
        AggregatorConfig {
            batch_size,
            max_wait: std::time::Duration::from_secs(60),
            metric_id: MetricId::disabled(),
            metric_sink: Arc::new(NoopMetricSink),
            inflight: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_batch_never_exceeds_batch_size() {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Batch<u64, u64>>();
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        tokio::spawn(run(submit_rx, batch_tx, cancel, cancelled, Arc::new(TokioClock), config(3)));

        let mut receivers = Vec::new();
        for i in 0..3 {
            let (item, recv) = item(i);
            submit_tx.send(item).unwrap();
            receivers.push(recv);
        }

        let batch = batch_rx.recv().await.expect("a full batch should dispatch immediately");
        assert!(batch.items.len() <= 3);
        assert_eq!(batch.items.len(), 3);
        assert_eq!(batch.close_reason, CloseReason::SizeReached);
    }

    #[tokio::test(start_paused = true)]
    async fn no_batch_is_ever_dispatched_empty() {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel::<PendingItem<u64, u64>>();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Batch<u64, u64>>();
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        tokio::spawn(run(submit_rx, batch_tx, cancel, cancelled, Arc::new(TokioClock), config(10)));

        // Nothing is ever submitted; advance well past `max_wait` and
        // confirm no batch shows up.
        tokio::time::advance(std::time::Duration::from_secs(120)).await;
        drop(submit_tx);

        assert!(batch_rx.recv().await.is_none());
    }
}
