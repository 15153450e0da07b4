use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use collapse::Collapser;

#[tokio::test]
async fn items_collapse_into_one_bulk_call_at_batch_size() {
    tokio::time::pause();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();

    let collapser: Collapser<u64, (u64, u64)> = Collapser::builder()
        .bulk_provider(move |ids: Vec<u64>| {
            calls2.fetch_add(1, Ordering::SeqCst);
            async move { Ok(ids.into_iter().map(|id| (id, id * 10)).collect()) }
        })
        .context_value_matcher(|id, (value_id, _)| id == value_id)
        .batch_size(3)
        .maximum_wait_time(Duration::from_secs(1))
        .build()
        .unwrap();

    let a = tokio::spawn({
        let collapser = collapser.clone();
        async move { collapser.apply(1).await.into_outcome() }
    });
    let b = tokio::spawn({
        let collapser = collapser.clone();
        async move { collapser.apply(2).await.into_outcome() }
    });
    let c = tokio::spawn({
        let collapser = collapser.clone();
        async move { collapser.apply(3).await.into_outcome() }
    });

    let (a, b, c) = tokio::join!(a, b, c);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(a.unwrap(), collapse::PendingOutcome::Value((1, 10))));
    assert!(matches!(b.unwrap(), collapse::PendingOutcome::Value((2, 20))));
    assert!(matches!(c.unwrap(), collapse::PendingOutcome::Value((3, 30))));
}

#[tokio::test]
async fn a_batch_dispatches_on_timeout_when_under_batch_size() {
    tokio::time::pause();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();

    let collapser: Collapser<u64, (u64, u64)> = Collapser::builder()
        .bulk_provider(move |ids: Vec<u64>| {
            calls2.fetch_add(1, Ordering::SeqCst);
            async move { Ok(ids.into_iter().map(|id| (id, id * 10)).collect()) }
        })
        .context_value_matcher(|id, (value_id, _)| id == value_id)
        .batch_size(10)
        .maximum_wait_time(Duration::from_millis(50))
        .build()
        .unwrap();

    let task = tokio::spawn({
        let collapser = collapser.clone();
        async move { collapser.apply(7).await.into_outcome() }
    });

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0, "batch shouldn't dispatch before the timer fires");

    tokio::time::advance(Duration::from_millis(60)).await;

    let outcome = task.await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(outcome, collapse::PendingOutcome::Value((7, 70))));
}

#[tokio::test]
async fn unmatched_items_complete_empty_not_pending_forever() {
    tokio::time::pause();

    let collapser: Collapser<u64, (u64, u64)> = Collapser::builder()
        .bulk_provider(|_ids: Vec<u64>| async move { Ok(Vec::new()) })
        .context_value_matcher(|id, (value_id, _)| id == value_id)
        .batch_size(1)
        .maximum_wait_time(Duration::from_secs(1))
        .build()
        .unwrap();

    let outcome = collapser.apply(99).await.into_outcome();
    assert!(matches!(outcome, collapse::PendingOutcome::Empty));
}

#[tokio::test]
async fn a_failed_bulk_call_fans_an_error_out_to_every_pending_item() {
    tokio::time::pause();

    let collapser: Collapser<u64, (u64, u64)> = Collapser::builder()
        .bulk_provider(|_ids: Vec<u64>| async move {
            Err(Box::<dyn std::error::Error + Send + Sync>::from("downstream unavailable"))
        })
        .context_value_matcher(|id, (value_id, _)| id == value_id)
        .batch_size(2)
        .maximum_wait_time(Duration::from_secs(1))
        .build()
        .unwrap();

    let a = tokio::spawn({
        let collapser = collapser.clone();
        async move { collapser.apply(1).await.into_outcome() }
    });
    let b = tokio::spawn({
        let collapser = collapser.clone();
        async move { collapser.apply(2).await.into_outcome() }
    });

    let (a, b) = tokio::join!(a, b);
    assert!(matches!(a.unwrap(), collapse::PendingOutcome::Err(_)));
    assert!(matches!(b.unwrap(), collapse::PendingOutcome::Err(_)));
}

#[tokio::test]
async fn cancel_discards_the_open_batch_without_invoking_the_provider() {
    tokio::time::pause();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();

    let collapser: Collapser<u64, (u64, u64)> = Collapser::builder()
        .bulk_provider(move |ids: Vec<u64>| {
            calls2.fetch_add(1, Ordering::SeqCst);
            async move { Ok(ids.into_iter().map(|id| (id, id * 10)).collect()) }
        })
        .context_value_matcher(|id, (value_id, _)| id == value_id)
        .batch_size(10)
        .maximum_wait_time(Duration::from_secs(5))
        .build()
        .unwrap();

    let pending = tokio::spawn({
        let collapser = collapser.clone();
        async move { collapser.apply(1).await }
    });

    // Give the submission a chance to reach the aggregator before cancelling.
    tokio::task::yield_now().await;
    collapser.cancel();

    let rejected = tokio::time::timeout(Duration::from_millis(50), pending).await;
    assert!(rejected.is_err(), "apply() must never resolve once cancelled");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let after_cancel = tokio::time::timeout(Duration::from_millis(50), collapser.apply(2)).await;
    assert!(after_cancel.is_err(), "apply() after cancel must never resolve either");
}
