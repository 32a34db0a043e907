// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Cold sources.
//!
//! An iterator source creates fresh iteration state per subscription and
//! pushes fixed-size batches through a scheduled emission loop: `Continue`
//! keeps the loop spinning within the execution-model budget, a pending ack
//! suspends it until resolution, `Stop` ends it. Panics raised downstream
//! while materializing a batch (user transformations are lazy) are caught
//! here, at the producer boundary, and converted into `on_error`.

use crate::batch::{Batch, BatchIter};
use crate::disposable::{BooleanDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::Observable;
use crate::observer::{ObserverInfo, ObserverRef};
use crate::scheduler::{ExecutionModel, SchedulerRef};
use ackflow_ack::{Ack, AckKind};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Observable emitting the elements of a per-subscription iterator.
pub struct IteratorSourceObservable<T> {
    make: Arc<dyn Fn() -> BatchIter<T> + Send + Sync>,
    scheduler: SchedulerRef,
    batch_size: usize,
}

impl<T: Send + 'static> IteratorSourceObservable<T> {
    /// Creates the source; `make` runs once per subscription, the emission
    /// loop runs on `scheduler`.
    pub fn new<F>(make: F, scheduler: SchedulerRef, batch_size: usize) -> Self
    where
        F: Fn() -> BatchIter<T> + Send + Sync + 'static,
    {
        IteratorSourceObservable {
            make: Arc::new(make),
            scheduler,
            batch_size: batch_size.max(1),
        }
    }
}

impl<T: Send + 'static> Observable<T> for IteratorSourceObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let disposed = BooleanDisposable::new();
        let emit = Arc::new(EmitLoop {
            observer: info.observer,
            scheduler: self.scheduler.clone(),
            execution_model: self.scheduler.execution_model(),
            batch_size: self.batch_size,
            iter: Mutex::new(Some((self.make)())),
            disposed: disposed.clone(),
        });

        self.scheduler.schedule(Box::new(move || emit.run(0)));
        Disposable::new(move || disposed.dispose())
    }
}

struct EmitLoop<T> {
    observer: ObserverRef<T>,
    scheduler: SchedulerRef,
    execution_model: ExecutionModel,
    batch_size: usize,
    iter: Mutex<Option<BatchIter<T>>>,
    disposed: BooleanDisposable,
}

impl<T: Send + 'static> EmitLoop<T> {
    fn run(self: &Arc<Self>, mut sync_index: i64) {
        loop {
            if self.disposed.is_disposed() {
                return;
            }

            let values = {
                let mut iter = self.iter.lock();
                let Some(it) = iter.as_mut() else {
                    return;
                };
                let values: Vec<T> = it.take(self.batch_size).collect();
                if values.is_empty() {
                    *iter = None;
                }
                values
            };
            if values.is_empty() {
                self.observer.on_completed();
                return;
            }

            let delivery = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.observer.on_next(Batch::from_vec(values))
            }));
            let ack = match delivery {
                Ok(ack) => ack,
                Err(payload) => {
                    *self.iter.lock() = None;
                    self.observer.on_error(FlowError::from_panic(payload));
                    return;
                }
            };

            match ack.value() {
                Some(AckKind::Continue) => {
                    let next = self.execution_model.next_frame_index(sync_index);
                    if next > 0 {
                        sync_index = next;
                    } else if next == 0 {
                        let emit = self.clone();
                        self.scheduler.schedule(Box::new(move || emit.run(0)));
                        return;
                    } else {
                        return;
                    }
                }
                Some(AckKind::Stop) => {
                    *self.iter.lock() = None;
                    return;
                }
                None => {
                    let emit = self.clone();
                    ack.subscribe(move |kind| match kind {
                        AckKind::Continue => {
                            let again = emit.clone();
                            emit.scheduler.schedule(Box::new(move || again.run(0)));
                        }
                        AckKind::Stop => {
                            *emit.iter.lock() = None;
                        }
                    });
                    return;
                }
            }
        }
    }
}

/// Observable that completes immediately with no elements.
pub struct EmptyObservable {
    scheduler: SchedulerRef,
}

impl EmptyObservable {
    /// Creates the source, completing on `scheduler`.
    #[must_use]
    pub fn new(scheduler: SchedulerRef) -> Self {
        EmptyObservable { scheduler }
    }
}

impl<T: Send + 'static> Observable<T> for EmptyObservable {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let observer = info.observer;
        self.scheduler
            .schedule(Box::new(move || observer.on_completed()));
        Disposable::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;

    fn range_source(
        scheduler: &TestScheduler,
        range: std::ops::Range<i64>,
    ) -> IteratorSourceObservable<i64> {
        IteratorSourceObservable::new(
            move || Box::new(range.clone()) as BatchIter<i64>,
            Arc::new(scheduler.clone()),
            1,
        )
    }

    #[test]
    fn test_emits_all_then_completes() {
        let scheduler = TestScheduler::new();
        let source = range_source(&scheduler, 0..5);
        let sink = TestObserver::immediate();
        let _sub = source.observe(ObserverInfo::new(sink.observer()));

        scheduler.tick();
        assert_eq!(sink.received(), vec![0, 1, 2, 3, 4]);
        assert_eq!(sink.batch_sizes(), vec![1, 1, 1, 1, 1]);
        assert!(sink.is_completed());
    }

    #[test]
    fn test_pending_ack_suspends_the_loop() {
        let scheduler = TestScheduler::new();
        let source = range_source(&scheduler, 0..5);
        let sink = TestObserver::immediate_continue(2);
        let _sub = source.observe(ObserverInfo::new(sink.observer()));

        scheduler.tick();
        assert_eq!(sink.received(), vec![0, 1, 2]);

        assert!(sink.ack_continue());
        scheduler.tick();
        assert_eq!(sink.received(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_stop_ends_the_loop() {
        let scheduler = TestScheduler::new();
        let source = range_source(&scheduler, 0..1000);
        let sink = TestObserver::stopping();
        let _sub = source.observe(ObserverInfo::new(sink.observer()));

        scheduler.tick();
        assert_eq!(sink.received(), vec![0]);
        assert!(!sink.is_completed());
    }

    #[test]
    fn test_downstream_panic_is_caught_at_the_boundary() {
        let scheduler = TestScheduler::new();
        let source = range_source(&scheduler, 0..3);

        struct PanickingSink;
        impl crate::observer::Observer<i64> for PanickingSink {
            fn on_next(&self, batch: Batch<i64>) -> Ack {
                let _ = batch.map(|_: i64| -> i64 { panic!("boom") }).materialize();
                Ack::Continue
            }
            fn on_error(&self, _error: FlowError) {}
            fn on_completed(&self) {}
        }

        let _sub = source.observe(ObserverInfo::new(Arc::new(PanickingSink)));
        scheduler.tick();
        // The loop stops after the first failed delivery.
    }
}
