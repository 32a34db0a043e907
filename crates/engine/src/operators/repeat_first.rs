// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Endless re-emission of the first element.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use crate::scheduler::{ExecutionModel, SchedulerRef};
use ackflow_ack::{Ack, AckKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Captures the first element and re-emits it in fixed-size batches forever.
///
/// Later upstream elements are ignored and upstream completion does not
/// propagate; only `Stop` from downstream (or disposal) ends the loop.
pub struct RepeatFirstObservable<T> {
    source: ObservableRef<T>,
    scheduler: SchedulerRef,
    batch_size: usize,
}

impl<T> RepeatFirstObservable<T> {
    /// Creates the operator over `source`, re-emitting on `scheduler`.
    #[must_use]
    pub fn new(source: ObservableRef<T>, scheduler: SchedulerRef, batch_size: usize) -> Self {
        RepeatFirstObservable {
            source,
            scheduler,
            batch_size: batch_size.max(1),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for RepeatFirstObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let observer = RepeatFirstObserver {
            downstream: info.observer.clone(),
            scheduler: self.scheduler.clone(),
            batch_size: self.batch_size,
            got_first: AtomicBool::new(false),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct RepeatFirstObserver<T> {
    downstream: Arc<dyn Observer<T>>,
    scheduler: SchedulerRef,
    batch_size: usize,
    got_first: AtomicBool,
}

struct EmitLoop<T> {
    downstream: Arc<dyn Observer<T>>,
    scheduler: SchedulerRef,
    execution_model: ExecutionModel,
    values: Vec<T>,
}

impl<T: Clone + Send + Sync + 'static> EmitLoop<T> {
    fn run(self: &Arc<Self>, mut sync_index: i64) {
        loop {
            let ack = self.downstream.on_next(Batch::from_vec(self.values.clone()));
            match ack {
                Ack::Stop => break,
                Ack::Continue => {
                    let next = self.execution_model.next_frame_index(sync_index);
                    if next > 0 {
                        sync_index = next;
                    } else if next == 0 {
                        let this = self.clone();
                        self.scheduler.schedule(Box::new(move || this.run(0)));
                        break;
                    } else {
                        break;
                    }
                }
                Ack::Pending(cell) => {
                    let this = self.clone();
                    cell.subscribe(move |kind| {
                        if kind == AckKind::Continue {
                            let again = this.clone();
                            this.scheduler.schedule(Box::new(move || again.run(0)));
                        }
                    });
                    break;
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observer<T> for RepeatFirstObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        if self.got_first.load(Ordering::Acquire) {
            return Ack::Stop;
        }
        let mut elements = match batch.try_materialize() {
            Ok(elements) => elements.into_iter(),
            Err(error) => {
                self.downstream.on_error(error);
                return Ack::Stop;
            }
        };
        let Some(first) = elements.next() else {
            // Empty batch: keep waiting for the first element.
            return Ack::Continue;
        };
        self.got_first.store(true, Ordering::Release);

        let emit = Arc::new(EmitLoop {
            downstream: self.downstream.clone(),
            scheduler: self.scheduler.clone(),
            execution_model: self.scheduler.execution_model(),
            values: vec![first; self.batch_size],
        });
        self.scheduler.schedule(Box::new(move || emit.run(0)));
        Ack::Stop
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        // Upstream completion does not end the repetition.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;
    use crate::testing::source::TestSource;
    use ackflow_ack::AckKind;

    #[test]
    fn test_repeats_first_element_in_fixed_batches() {
        let scheduler = TestScheduler::new();
        let source = TestSource::new();
        let repeat =
            RepeatFirstObservable::new(source.observable(), Arc::new(scheduler.clone()), 2);
        let sink = TestObserver::immediate_continue(3);
        let _sub = repeat.observe(ObserverInfo::new(sink.observer()));

        let ack = source.emit(vec![5, 6, 7]);
        assert_eq!(ack.value(), Some(AckKind::Stop));

        scheduler.tick();
        // Three immediate continues: four batches of two delivered before the
        // sink holds its ack.
        assert_eq!(sink.received(), vec![5, 5, 5, 5, 5, 5, 5, 5]);
        assert!(!sink.is_completed());

        assert!(sink.ack_continue());
        scheduler.tick();
        assert_eq!(sink.received().len(), 10);
    }
}
