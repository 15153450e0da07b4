/*!
The batch executor & demultiplexer (spec §4.2): invokes the bulk provider
for each closed batch under a bounded-concurrency gate, then matches each
returned value back to the pending item that asked for it.
*/

use std::sync::{atomic::AtomicUsize, Arc};

use collapse_core::{
    ctxt::Ctxt,
    metrics::MetricId,
    scheduler::{spawn_on, DynScheduler},
    CollapseError,
};
use tokio::{
    sync::{mpsc, Semaphore},
    time::Instant,
};

use crate::{
    builder::BulkProvider,
    types::{Batch, PendingItem, PendingOutcome},
};

pub(crate) struct ExecutorConfig<C, V> {
    pub(crate) bulk_provider: Arc<dyn BulkProvider<C, V>>,
    pub(crate) matcher: Arc<dyn Fn(&C, &V) -> bool + Send + Sync>,
    pub(crate) max_concurrency: usize,
    pub(crate) metric_id: MetricId,
    pub(crate) metric_sink: Arc<dyn collapse_core::metrics::MetricSink>,
    pub(crate) ctxt: Arc<dyn Ctxt>,
    /**
    Shared with the aggregator; decremented here as each item is
    emitted so `pending` reflects the true inflight count.
    */
    pub(crate) inflight: Arc<AtomicUsize>,
    /**
    Runs the bulk-provider call for each dispatched batch (spec §5's
    "batch scheduler").
    */
    pub(crate) batch_scheduler: Arc<dyn DynScheduler>,
    /**
    Fans results back to pending subscribers once a bulk call returns,
    so that work doesn't run on the bulk-provider's own task (spec
    §4.2's "emit scheduler").
    */
    pub(crate) emit_scheduler: Arc<dyn DynScheduler>,
}

/**
Runs until `batch_rx` is closed, i.e. the aggregator task has ended.

Dispatch order between batches is preserved in submission order (spec
§5): permits are acquired here, sequentially, in the order batches
arrive from the aggregator, before the bulk-provider call for that
batch is spawned on the batch scheduler. Completion order after that
depends on the provider.
*/
pub(crate) async fn run<C, V>(mut batch_rx: mpsc::UnboundedReceiver<Batch<C, V>>, config: Arc<ExecutorConfig<C, V>>)
where
    C: Clone + Send + 'static,
    V: Send + 'static,
{
    let gate = Arc::new(Semaphore::new(config.max_concurrency));

    while let Some(batch) = batch_rx.recv().await {
        let permit = gate
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed while the executor runs");

        let config = config.clone();
        spawn_on(&config.batch_scheduler.clone(), async move {
            run_batch(batch, config).await;
            drop(permit);
        });
    }
}

async fn run_batch<C, V>(mut batch: Batch<C, V>, config: Arc<ExecutorConfig<C, V>>)
where
    C: Clone + Send + 'static,
    V: Send + 'static,
{
    let call_started = Instant::now();
    for item in &batch.items {
        if let Some(delay) = call_started.checked_duration_since(item.submitted_at) {
            config
                .metric_id
                .record_timer(config.metric_sink.as_ref(), "item.delay", "item_delay", delay);
        }
    }

    let contexts: Vec<C> = batch.items.iter().map(|item| item.context.clone()).collect();
    let result = config.bulk_provider.call(contexts).await;

    match result {
        Ok(values) => match_values(&mut batch.items, values, config.matcher.as_ref()),
        Err(err) => {
            tracing::warn!(error = %err, items = batch.items.len(), "bulk provider call failed");
            fan_out_error(&mut batch.items, CollapseError::provider_msg(err.to_string()));
        }
    }

    complete_unmatched(&mut batch.items);

    let items = batch.items;
    spawn_on(&config.emit_scheduler.clone(), async move {
        emit_all(items, &config);
    });
}

/**
First-match-wins demultiplexing, scanning left-to-right by context
arrival order (spec §4.2, §8's context-matching property).
*/
fn match_values<C, V>(
    items: &mut [PendingItem<C, V>],
    values: Vec<V>,
    matcher: &(dyn Fn(&C, &V) -> bool + Send + Sync),
) {
    if values.is_empty() && !items.is_empty() {
        tracing::debug!("bulk provider returned an empty response; no items will be matched");
    }

    for value in values {
        let claimed = items
            .iter()
            .position(|item| !item.matched && matcher(&item.context, &value));

        match claimed {
            Some(idx) => {
                items[idx].matched = true;
                items[idx].pending_outcome = Some(PendingOutcome::Value(value));
            }
            None => {
                tracing::debug!("bulk provider response value matched no pending item; discarding");
            }
        }
    }
}

fn fan_out_error<C, V>(items: &mut [PendingItem<C, V>], err: CollapseError) {
    for item in items {
        if !item.matched {
            item.matched = true;
            item.pending_outcome = Some(PendingOutcome::Err(err.clone()));
        }
    }
}

fn complete_unmatched<C, V>(items: &mut [PendingItem<C, V>]) {
    for item in items {
        if item.pending_outcome.is_none() {
            item.pending_outcome = Some(PendingOutcome::Empty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collapse_core::ctxt::ContextSnapshot;
    use tokio::sync::oneshot;

    fn item(context: u64) -> PendingItem<u64, u64> {
        let (sink, _recv) = oneshot::channel();
        PendingItem {
            context,
            sink,
            submitted_at: Instant::now(),
            ctxt_snapshot: ContextSnapshot::empty(),
            matched: false,
            pending_outcome: None,
        }
    }

    #[test]
    fn matching_is_first_match_wins_left_to_right() {
        // Two items both match `value == 0`; only the first (by arrival
        // order) should claim it.
        let mut items = vec![item(1), item(1)];
        let matcher = |context: &u64, value: &u64| context == value;

        match_values(&mut items, vec![1], &matcher);

        assert!(items[0].matched);
        assert!(!items[1].matched);
        assert!(matches!(items[0].pending_outcome, Some(PendingOutcome::Value(1))));
        assert!(items[1].pending_outcome.is_none());
    }

    #[test]
    fn every_returned_value_claims_at_most_one_item() {
        let mut items = vec![item(1), item(2), item(3)];
        let matcher = |context: &u64, value: &u64| context == value;

        match_values(&mut items, vec![3, 1], &matcher);

        assert!(matches!(items[0].pending_outcome, Some(PendingOutcome::Value(1))));
        assert!(items[1].pending_outcome.is_none());
        assert!(matches!(items[2].pending_outcome, Some(PendingOutcome::Value(3))));
    }

    #[test]
    fn complete_unmatched_fills_every_remaining_item_with_empty() {
        let mut items = vec![item(1), item(2)];
        match_values(&mut items, vec![1], &|c: &u64, v: &u64| c == v);
        complete_unmatched(&mut items);

        assert!(matches!(items[0].pending_outcome, Some(PendingOutcome::Value(1))));
        assert!(matches!(items[1].pending_outcome, Some(PendingOutcome::Empty)));
    }

    #[test]
    fn a_provider_error_fans_out_to_every_unmatched_item() {
        let mut items = vec![item(1), item(2)];
        fan_out_error(&mut items, CollapseError::provider_msg("boom"));

        assert!(items.iter().all(|item| matches!(item.pending_outcome, Some(PendingOutcome::Err(_)))));
    }
}

fn emit_all<C, V>(items: Vec<PendingItem<C, V>>, config: &ExecutorConfig<C, V>) {
    for item in items {
        let PendingItem {
            sink,
            submitted_at,
            ctxt_snapshot,
            pending_outcome,
            ..
        } = item;

        let outcome = pending_outcome.expect("every item has an outcome by the time it's emitted");

        let _guard = config.ctxt.restore(&ctxt_snapshot);

        config.inflight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

        config.metric_id.record_timer(
            config.metric_sink.as_ref(),
            "item.completion",
            "item_completion",
            submitted_at.elapsed(),
        );

        // Ignored: the caller may have dropped its receiver (unsubscribed)
        // before the batch dispatched; spec §5 says that completion is
        // simply ignored, not an error.
        let _ = sink.send(outcome);
    }
}
