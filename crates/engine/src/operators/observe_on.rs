// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Scheduler hop.
//!
//! Every incoming event is enqueued; a single consumer loop on the target
//! scheduler delivers strictly FIFO, waiting for each downstream ack before
//! dequeuing the next batch. The upstream ack of a batch resolves exactly
//! when that batch has been delivered downstream and its ack resolved, which
//! is what hands the back-pressure across the scheduler boundary.

use crate::batch::Batch;
use crate::disposable::{CompositeDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use crate::scheduler::{ExecutionModel, SchedulerRef};
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Reschedules downstream delivery onto a target scheduler.
pub struct ObserveOnObservable<T> {
    source: ObservableRef<T>,
    scheduler: SchedulerRef,
}

impl<T> ObserveOnObservable<T> {
    /// Creates the operator over `source`, delivering on `scheduler`.
    #[must_use]
    pub fn new(source: ObservableRef<T>, scheduler: SchedulerRef) -> Self {
        ObserveOnObservable { source, scheduler }
    }
}

impl<T: Send + 'static> Observable<T> for ObserveOnObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let shared = Arc::new(ObserveOnShared {
            downstream: info.observer.clone(),
            scheduler: self.scheduler.clone(),
            execution_model: self.scheduler.execution_model(),
            inner: Mutex::new(ObserveOnInner {
                queue: VecDeque::new(),
                draining: false,
                stopped: false,
            }),
        });

        let observer = ObserveOnObserver {
            shared: shared.clone(),
        };
        let composite = CompositeDisposable::new();
        composite.add(self.source.observe(info.with_observer(Arc::new(observer))));
        composite.add(Disposable::new(move || shared.stop()));
        composite.into_disposable()
    }
}

enum QueueItem<T> {
    Next(Batch<T>, AckCell),
    Error(FlowError),
    Completed,
}

struct ObserveOnInner<T> {
    queue: VecDeque<QueueItem<T>>,
    draining: bool,
    stopped: bool,
}

struct ObserveOnShared<T> {
    downstream: Arc<dyn Observer<T>>,
    scheduler: SchedulerRef,
    execution_model: ExecutionModel,
    inner: Mutex<ObserveOnInner<T>>,
}

impl<T: Send + 'static> ObserveOnShared<T> {
    fn enqueue(self: &Arc<Self>, item: QueueItem<T>) {
        let start = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                if let QueueItem::Next(_, cell) = item {
                    let _ = cell.resolve(AckKind::Stop);
                }
                return;
            }
            inner.queue.push_back(item);
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        if start {
            let shared = self.clone();
            self.scheduler.schedule(Box::new(move || shared.drain(0)));
        }
    }

    fn drain(self: &Arc<Self>, mut sync_index: i64) {
        loop {
            let item = {
                let mut inner = self.inner.lock();
                if inner.stopped {
                    inner.draining = false;
                    None
                } else {
                    let item = inner.queue.pop_front();
                    if item.is_none() {
                        inner.draining = false;
                    }
                    item
                }
            };

            let Some(item) = item else {
                break;
            };
            match item {
                QueueItem::Error(error) => {
                    self.mark_stopped();
                    self.downstream.on_error(error);
                    break;
                }
                QueueItem::Completed => {
                    self.mark_stopped();
                    self.downstream.on_completed();
                    break;
                }
                QueueItem::Next(batch, cell) => {
                    let ack = self.downstream.on_next(batch);
                    // Immediate resolutions keep the loop synchronous within
                    // the execution-model budget.
                    match ack.value() {
                        Some(AckKind::Continue) => {
                            let _ = cell.resolve(AckKind::Continue);
                            let next = self.execution_model.next_frame_index(sync_index);
                            if next > 0 {
                                sync_index = next;
                            } else if next == 0 {
                                let shared = self.clone();
                                self.scheduler.schedule(Box::new(move || shared.drain(0)));
                                break;
                            } else {
                                break;
                            }
                        }
                        Some(AckKind::Stop) => {
                            let _ = cell.resolve(AckKind::Stop);
                            self.stop();
                            break;
                        }
                        None => {
                            let shared = self.clone();
                            ack.subscribe(move |kind| {
                                let _ = cell.resolve(kind);
                                match kind {
                                    AckKind::Continue => {
                                        let again = shared.clone();
                                        shared
                                            .scheduler
                                            .schedule(Box::new(move || again.drain(0)));
                                    }
                                    AckKind::Stop => shared.stop(),
                                }
                            });
                            break;
                        }
                    }
                }
            }
        }
    }

    fn mark_stopped(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        inner.draining = false;
        inner.queue.clear();
    }

    fn stop(self: &Arc<Self>) {
        let pending: Vec<AckCell> = {
            let mut inner = self.inner.lock();
            inner.stopped = true;
            inner.draining = false;
            inner
                .queue
                .drain(..)
                .filter_map(|item| match item {
                    QueueItem::Next(_, cell) => Some(cell),
                    _ => None,
                })
                .collect()
        };
        for cell in pending {
            let _ = cell.resolve(AckKind::Stop);
        }
    }
}

struct ObserveOnObserver<T> {
    shared: Arc<ObserveOnShared<T>>,
}

impl<T: Send + 'static> Observer<T> for ObserveOnObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let cell = AckCell::new();
        if self.shared.inner.lock().stopped {
            return Ack::Stop;
        }
        self.shared.enqueue(QueueItem::Next(batch, cell.clone()));
        Ack::Pending(cell)
    }

    fn on_error(&self, error: FlowError) {
        self.shared.enqueue(QueueItem::Error(error));
    }

    fn on_completed(&self) {
        self.shared.enqueue(QueueItem::Completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;
    use crate::testing::source::TestSource;

    #[test]
    fn test_delivery_happens_on_the_target_scheduler() {
        let scheduler = TestScheduler::new();
        let source = TestSource::new();
        let observe_on =
            ObserveOnObservable::new(source.observable(), Arc::new(scheduler.clone()));
        let sink = TestObserver::immediate();
        let _sub = observe_on.observe(ObserverInfo::new(sink.observer()));

        let ack = source.emit(vec![1, 2]);
        assert_eq!(sink.received(), Vec::<i64>::new());
        assert_eq!(ack.value(), None);

        scheduler.tick();
        assert_eq!(sink.received(), vec![1, 2]);
        assert_eq!(ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_upstream_ack_waits_for_downstream_ack() {
        let scheduler = TestScheduler::new();
        let source = TestSource::new();
        let observe_on =
            ObserveOnObservable::new(source.observable(), Arc::new(scheduler.clone()));
        let sink = TestObserver::holding();
        let _sub = observe_on.observe(ObserverInfo::new(sink.observer()));

        let ack = source.emit(vec![1]);
        scheduler.tick();
        assert_eq!(sink.received(), vec![1]);
        assert_eq!(ack.value(), None);

        assert!(sink.ack_continue());
        assert_eq!(ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_terminal_events_flow_through_the_queue() {
        let scheduler = TestScheduler::new();
        let source = TestSource::new();
        let observe_on =
            ObserveOnObservable::new(source.observable(), Arc::new(scheduler.clone()));
        let sink = TestObserver::immediate();
        let _sub = observe_on.observe(ObserverInfo::new(sink.observer()));

        let _ = source.emit(vec![1]);
        source.complete();
        assert!(!sink.is_completed());

        scheduler.tick();
        assert_eq!(sink.received(), vec![1]);
        assert!(sink.is_completed());
    }
}
