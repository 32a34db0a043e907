// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

//! End-to-end back-pressure scenarios.

use ackflow_engine::error::FlowError;
use ackflow_engine::flowable::{range, Flowable};
use ackflow_engine::observer::ObserverInfo;
use ackflow_engine::observers::evicting::EvictingBufferedObserver;
use ackflow_engine::subject::cached_serve_first::CachedServeFirstSubject;
use ackflow_engine::testing::observer::TestObserver;
use ackflow_engine::testing::scheduler::TestScheduler;
use ackflow_engine::Batch;
use ackflow_engine::Observable;
use ackflow_engine::Observer;
use std::sync::Arc;

/// Buffered cold source: the sink continues four times, then holds; every
/// released ack lets exactly one more element through until the range is
/// drained.
#[test]
fn test_buffered_cold_source_drains_ack_by_ack() {
    let sink = TestObserver::immediate_continue(4);
    let _sub = range(0..10)
        .buffer(1)
        .subscribe(sink.observer())
        .expect("subscribe");

    assert_eq!(sink.received(), vec![0, 1, 2, 3, 4]);
    assert!(!sink.is_completed());

    let mut seen = sink.received().len();
    while sink.ack_continue() {
        let received = sink.received();
        // Every release lets at most one more element through, in order.
        assert!(received.len() >= seen);
        assert!(received.len() <= seen + 1);
        assert_eq!(received, (0..received.len() as i64).collect::<Vec<_>>());
        seen = received.len();
        if sink.is_completed() {
            break;
        }
    }

    assert_eq!(sink.received(), (0..10).collect::<Vec<_>>());
    assert!(sink.is_completed());
}

/// Evicting buffer: five pushes against capacity four drop the eldest
/// element before the sink advances.
#[test]
fn test_evicting_buffer_drops_the_oldest() {
    let scheduler = TestScheduler::new();
    let sink = TestObserver::holding();
    let evicting = EvictingBufferedObserver::new(sink.observer(), Arc::new(scheduler.clone()), 4);

    for i in 1..=5 {
        let _ = evicting.on_next(Batch::from_vec(vec![i]));
    }
    scheduler.tick();
    assert_eq!(sink.received(), vec![2]);

    assert!(sink.ack_continue());
    scheduler.tick();
    assert_eq!(sink.received(), vec![2, 3]);
}

/// `first()` on an empty upstream delivers the empty-sequence failure with
/// no prior element.
#[test]
fn test_first_on_empty() {
    let sink = TestObserver::<i64>::immediate();
    let _sub = Flowable::empty()
        .first()
        .subscribe(sink.observer())
        .expect("subscribe");

    assert_eq!(sink.received(), Vec::<i64>::new());
    assert_eq!(sink.error(), Some(FlowError::EmptySequence));
    assert!(!sink.is_completed());
}

/// Controlled zip with always-true predicates pairs the sides in index
/// order.
#[test]
fn test_controlled_zip_pairs_in_order() {
    let left = Flowable::from_iterable(vec![1, 2, 3]);
    let right = Flowable::from_iterable(vec![10, 20, 30]);
    let sink = TestObserver::immediate();
    let _sub = left
        .controlled_zip(&right, |_, _| true, |_, _| true, |_, _| true)
        .subscribe(sink.observer())
        .expect("subscribe");

    assert_eq!(sink.received(), vec![(1, 10), (2, 20), (3, 30)]);
    assert!(sink.is_completed());
}

/// Multicast fan-out: the immediate subscriber sees everything at once, the
/// ack-holding one catches up from the buffer, and the buffer's first index
/// reaches the head only after both cursors do.
#[test]
fn test_multicast_fan_out_serves_first() {
    let scheduler = TestScheduler::new();
    let subject: CachedServeFirstSubject<i64> =
        CachedServeFirstSubject::new(Arc::new(scheduler.clone()));
    let a = TestObserver::immediate();
    let b = TestObserver::holding();
    let _sub_a = subject.observe(ObserverInfo::new(a.observer()));
    let _sub_b = subject.observe(ObserverInfo::new(b.observer()));

    for i in 1..=3 {
        let _ = subject.on_next(Batch::from_vec(vec![i]));
    }

    assert_eq!(a.received(), vec![1, 2, 3]);
    assert_eq!(b.received(), vec![1]);
    let (first_idx, _) = subject.buffer_range();
    assert!(first_idx < 3);

    while b.ack_continue() {
        scheduler.tick();
    }
    scheduler.tick();

    assert_eq!(b.received(), vec![1, 2, 3]);
    let (first_idx, last_idx) = subject.buffer_range();
    assert_eq!(first_idx, 3);
    assert_eq!(last_idx, 3);
}

/// Disposing the root silences the pipeline: nothing reaches the sink and
/// the producer sees `Stop`.
#[test]
fn test_disposal_silences_downstream() {
    use ackflow_engine::testing::source::TestSource;

    let source = TestSource::new();
    let sink = TestObserver::immediate();
    let flowable = Flowable::from_hot_observable(source.observable());
    let sub = flowable.subscribe(sink.observer()).expect("subscribe");

    let _ = source.emit(vec![1]);
    assert_eq!(sink.received(), vec![1]);

    sub.dispose();
    let ack = source.emit(vec![2]);
    assert_eq!(sink.received(), vec![1]);
    assert_eq!(ack.value(), Some(ackflow_engine::AckKind::Stop));
}
