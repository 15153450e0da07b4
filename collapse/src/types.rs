/*!
The data model shared by the aggregator and executor: [`PendingItem`],
[`Batch`], [`CloseReason`] and [`PendingOutcome`] — the Rust shapes of
spec §3's `PendingItem`/`Batch` records.
*/

use collapse_core::{ctxt::ContextSnapshot, CollapseError};
use tokio::{sync::oneshot, time::Instant};

/**
The result delivered to one waiting caller.

A `PendingItem` is fulfilled with exactly one of these: a matched value,
an empty completion (no returned value matched this item's context), or
an error fanned out from a failed bulk call.
*/
#[derive(Debug)]
pub enum PendingOutcome<V> {
    /**
    A bulk-provider value matched this item's context.
    */
    Value(V),
    /**
    No value matched; the item completes without one.
    */
    Empty,
    /**
    The batch this item belonged to failed.
    */
    Err(CollapseError),
}

/**
One caller awaiting a single value, buffered into the current open
batch until it's dispatched.
*/
pub(crate) struct PendingItem<C, V> {
    pub(crate) context: C,
    pub(crate) sink: oneshot::Sender<PendingOutcome<V>>,
    pub(crate) submitted_at: Instant,
    pub(crate) ctxt_snapshot: ContextSnapshot,
    /**
    Set once a returned value has claimed this item, so a later value
    in the same response can't also claim it (first-match-wins).
    */
    pub(crate) matched: bool,
    /**
    The outcome this item will be fulfilled with, filled in during
    demultiplexing and delivered once every value has been matched.
    */
    pub(crate) pending_outcome: Option<PendingOutcome<V>>,
}

/**
Why a batch was closed and handed to the executor.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /**
    The batch reached `batchSize`.
    */
    SizeReached,
    /**
    The max-wait timer fired before the batch filled.
    */
    TimeExpired,
    /**
    The collapser was cancelled; the batch is discarded, not dispatched.
    */
    Cancelled,
}

/**
An ordered group of pending items dispatched to the bulk provider
together.
*/
pub(crate) struct Batch<C, V> {
    pub(crate) items: Vec<PendingItem<C, V>>,
    pub(crate) created_at: Instant,
    pub(crate) close_reason: CloseReason,
}
