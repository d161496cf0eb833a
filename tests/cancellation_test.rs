//! Cancellation of blocked queue operations and running pipelines

use bounded_pipeline::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_cancel_wakes_blocked_get() {
    // A get waiting on an open, empty queue returns well before its timeout
    let queue: BoundedQueue<u32> = BoundedQueue::bounded(4).expect("queue");
    let token = CancellationToken::new();

    let (q, t) = (queue.clone(), token.clone());
    let handle = thread::spawn(move || {
        let start = Instant::now();
        let result = q.get_cancellable(Duration::from_secs(10), &t);
        (result, start.elapsed())
    });

    thread::sleep(Duration::from_millis(50));
    token.cancel();

    let (result, elapsed) = handle.join().expect("getter panicked");
    assert_eq!(result, Err(GetError::Cancelled));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
}

#[test]
fn test_cancel_wakes_blocked_put() {
    let queue = BoundedQueue::bounded(1).expect("queue");
    queue.try_put(1u32).expect("first put");
    let token = CancellationToken::new();

    let (q, t) = (queue.clone(), token.clone());
    let handle = thread::spawn(move || q.put_cancellable(2, Duration::from_secs(10), &t));

    thread::sleep(Duration::from_millis(50));
    token.cancel();

    match handle.join().expect("putter panicked") {
        Err(PutError::Cancelled(value)) => assert_eq!(value, 2),
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(queue.size(), 1);
}

#[test]
fn test_cancel_running_pipeline() {
    // Slow transform, effectively endless input
    let config = PipelineConfig::new(1_000_000)
        .with_input_capacity(Capacity::Bounded(8))
        .with_poll_timeout(Duration::from_secs(5))
        .with_put_timeout(Duration::from_secs(5));
    let processed = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&processed);

    let mut pipeline = Coordinator::new(
        config,
        |id: ItemId| id.sequence,
        move |item: &Item<u64>| -> std::result::Result<u64, TransformError> {
            thread::sleep(Duration::from_millis(2));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(*item.payload())
        },
    )
    .expect("create");

    pipeline.start(2, 2).expect("start");
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    pipeline.cancel();
    let tally = pipeline
        .await_completion(Duration::from_secs(10))
        .expect("tally after cancel");

    // Long poll/put timeouts would dominate if cancellation did not wake waiters
    assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(tally.cancelled.as_deref(), Some("manually cancelled"));
    assert!(tally.items_produced < 2_000_000);
    assert!(tally.results_collected <= processed.load(Ordering::SeqCst));
    assert!(tally.is_conserved(), "{}", tally);
}

#[test]
fn test_parent_token_cancels_pipeline() {
    let shutdown = CancellationToken::new();
    let mut pipeline = Coordinator::new(
        PipelineConfig::new(1_000_000).with_input_capacity(Capacity::Bounded(4)),
        |id: ItemId| id.sequence,
        |item: &Item<u64>| -> std::result::Result<u64, TransformError> { Ok(*item.payload()) },
    )
    .expect("create")
    .with_cancellation(&shutdown);

    pipeline.start(1, 2).expect("start");
    thread::sleep(Duration::from_millis(20));
    shutdown.cancel();

    let tally = pipeline
        .await_completion(Duration::from_secs(10))
        .expect("tally");
    assert!(tally.cancelled.is_some());
    assert!(tally.is_conserved());

    // Cancelling the pipeline never propagates upwards
    assert!(shutdown.is_cancelled());
    let other = CancellationToken::new();
    let child = other.child();
    child.cancel();
    assert!(!other.is_cancelled());
}

#[test]
fn test_transform_observes_token() {
    // A long transform can watch the pipeline token itself
    let config = PipelineConfig::new(1)
        .with_poll_timeout(Duration::from_millis(10))
        .with_put_timeout(Duration::from_millis(10));
    let token = CancellationToken::new();
    let watched = token.clone();
    let saw_cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&saw_cancel);

    let mut pipeline = Coordinator::new(
        config,
        |id: ItemId| id.sequence,
        move |_: &Item<u64>| -> std::result::Result<u64, TransformError> {
            while !watched.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            flag.store(true, Ordering::SeqCst);
            Err(TransformError::fatal("cancelled mid-item"))
        },
    )
    .expect("create")
    .with_cancellation(&token);

    pipeline.start(1, 1).expect("start");
    thread::sleep(Duration::from_millis(30));
    token.cancel();

    let tally = pipeline
        .await_completion(Duration::from_secs(10))
        .expect("tally");
    assert!(saw_cancel.load(Ordering::SeqCst));
    assert_eq!(tally.items_lost, 1);
    assert!(tally.is_conserved());
}

#[test]
fn test_callbacks_run_on_cancel() {
    let token = CancellationToken::new();
    let fired = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&fired);

    let _guard = token.on_cancel(move || f.store(true, Ordering::SeqCst));
    assert!(!fired.load(Ordering::SeqCst));

    token.cancel_with_reason(CancellationReason::Custom("operator request".to_string()));
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(
        token.reason(),
        Some(CancellationReason::Custom("operator request".to_string()))
    );
}
