// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Sequential flattening.
//!
//! Every outer element maps to an inner observable; inners run one at a time
//! and their outputs are concatenated downstream with back-pressure intact
//! (the downstream ack is handed to the inner upstream unchanged). The outer
//! batch is acknowledged only once all inners it produced have completed.
//! Subscribing the next inner goes through the scheduler, never re-entrantly,
//! so long chains of short inners cannot grow the stack.

use crate::batch::Batch;
use crate::disposable::{CompositeDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use crate::scheduler::SchedulerRef;
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Maps every element to an inner observable and flattens sequentially.
///
/// The mapping function may reject an element (a hot inner flowable); the
/// rejection is delivered as `on_error` and the upstream is stopped.
pub struct FlatMapObservable<T, U> {
    source: ObservableRef<T>,
    func: Arc<dyn Fn(T) -> Result<ObservableRef<U>, FlowError> + Send + Sync>,
    scheduler: SchedulerRef,
}

impl<T, U> FlatMapObservable<T, U> {
    /// Creates the operator over `source`, driving inner subscriptions
    /// through `scheduler`.
    pub fn new<F>(source: ObservableRef<T>, scheduler: SchedulerRef, func: F) -> Self
    where
        F: Fn(T) -> Result<ObservableRef<U>, FlowError> + Send + Sync + 'static,
    {
        FlatMapObservable {
            source,
            func: Arc::new(func),
            scheduler,
        }
    }
}

impl<T, U> Observable<U> for FlatMapObservable<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn observe(&self, info: ObserverInfo<U>) -> Disposable {
        let disposables = CompositeDisposable::new();
        let shared = Arc::new(FlatMapShared {
            downstream: info.observer.clone(),
            scheduler: self.scheduler.clone(),
            func: self.func.clone(),
            is_volatile: info.is_volatile,
            disposables: disposables.clone(),
            inner: Mutex::new(FlatMapInner {
                queue: VecDeque::new(),
                outer_cell: None,
                active: false,
                outer_completed: false,
                stopped: false,
            }),
        });

        let outer = OuterObserver {
            shared: shared.clone(),
        };
        disposables.add(self.source.observe(info.with_observer(Arc::new(outer))));
        disposables.add(Disposable::new(move || shared.stop()));
        disposables.into_disposable()
    }
}

struct FlatMapInner<U> {
    queue: VecDeque<ObservableRef<U>>,
    outer_cell: Option<AckCell>,
    active: bool,
    outer_completed: bool,
    stopped: bool,
}

struct FlatMapShared<T, U> {
    downstream: Arc<dyn Observer<U>>,
    scheduler: SchedulerRef,
    func: Arc<dyn Fn(T) -> Result<ObservableRef<U>, FlowError> + Send + Sync>,
    is_volatile: bool,
    disposables: CompositeDisposable,
    inner: Mutex<FlatMapInner<U>>,
}

impl<T, U> FlatMapShared<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn on_outer_next(self: &Arc<Self>, batch: Batch<T>) -> Ack {
        let elements = match batch.try_materialize() {
            Ok(elements) => elements,
            Err(error) => {
                self.fail(error);
                return Ack::Stop;
            }
        };
        let mut inners = Vec::with_capacity(elements.len());
        for element in elements {
            match (self.func)(element) {
                Ok(inner) => inners.push(inner),
                Err(error) => {
                    self.fail(error);
                    return Ack::Stop;
                }
            }
        }
        if inners.is_empty() {
            return Ack::Continue;
        }

        let cell = AckCell::new();
        let start = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return Ack::Stop;
            }
            inner.queue.extend(inners);
            inner.outer_cell = Some(cell.clone());
            if inner.active {
                false
            } else {
                inner.active = true;
                true
            }
        };
        if start {
            self.schedule_next_inner();
        }
        Ack::Pending(cell)
    }

    fn schedule_next_inner(self: &Arc<Self>) {
        let shared = self.clone();
        self.scheduler
            .schedule(Box::new(move || shared.subscribe_next_inner()));
    }

    fn subscribe_next_inner(self: &Arc<Self>) {
        let (next, drained_cell, complete) = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                (None, None, false)
            } else {
                match inner.queue.pop_front() {
                    Some(observable) => (Some(observable), None, false),
                    None => {
                        inner.active = false;
                        let cell = inner.outer_cell.take();
                        let complete = inner.outer_completed;
                        if complete {
                            inner.stopped = true;
                        }
                        (None, cell, complete)
                    }
                }
            }
        };

        if let Some(cell) = drained_cell {
            let _ = cell.resolve(AckKind::Continue);
        }
        if complete {
            self.downstream.on_completed();
        }
        if let Some(observable) = next {
            let observer = InnerObserver {
                shared: self.clone(),
            };
            let mut info = ObserverInfo::new(Arc::new(observer) as Arc<dyn Observer<U>>);
            info.is_volatile = self.is_volatile;
            self.disposables.add(observable.observe(info));
        }
    }

    fn on_outer_completed(self: &Arc<Self>) {
        let complete = {
            let mut inner = self.inner.lock();
            inner.outer_completed = true;
            let complete = !inner.active && inner.queue.is_empty() && !inner.stopped;
            if complete {
                inner.stopped = true;
            }
            complete
        };
        if complete {
            self.downstream.on_completed();
        }
    }

    fn fail(self: &Arc<Self>, error: FlowError) {
        let cell = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            inner.queue.clear();
            inner.outer_cell.take()
        };
        if let Some(cell) = cell {
            let _ = cell.resolve(AckKind::Stop);
        }
        self.downstream.on_error(error);
    }

    fn stop(self: &Arc<Self>) {
        let cell = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            inner.queue.clear();
            inner.outer_cell.take()
        };
        if let Some(cell) = cell {
            let _ = cell.resolve(AckKind::Stop);
        }
    }
}

struct OuterObserver<T, U> {
    shared: Arc<FlatMapShared<T, U>>,
}

impl<T, U> Observer<T> for OuterObserver<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn on_next(&self, batch: Batch<T>) -> Ack {
        self.shared.on_outer_next(batch)
    }

    fn on_error(&self, error: FlowError) {
        self.shared.fail(error);
    }

    fn on_completed(&self) {
        self.shared.on_outer_completed();
    }
}

struct InnerObserver<T, U> {
    shared: Arc<FlatMapShared<T, U>>,
}

impl<T, U> Observer<U> for InnerObserver<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn on_next(&self, batch: Batch<U>) -> Ack {
        let ack = self.shared.downstream.on_next(batch);
        let shared = self.shared.clone();
        ack.subscribe(move |kind| {
            if kind == AckKind::Stop {
                shared.stop();
            }
        });
        ack
    }

    fn on_error(&self, error: FlowError) {
        self.shared.fail(error);
    }

    fn on_completed(&self) {
        // Concatenate the next inner; scheduled to break the recursion chain.
        self.shared.schedule_next_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;
    use crate::testing::source::TestSource;

    struct FixedObservable {
        values: Vec<i64>,
    }

    impl Observable<i64> for FixedObservable {
        fn observe(&self, info: ObserverInfo<i64>) -> Disposable {
            let ack = info.observer.on_next(Batch::from_vec(self.values.clone()));
            // A single batch: complete as soon as it is released.
            let observer = info.observer;
            ack.subscribe(move |kind| {
                if kind == AckKind::Continue {
                    observer.on_completed();
                }
            });
            Disposable::empty()
        }
    }

    fn inner_of(values: Vec<i64>) -> ObservableRef<i64> {
        Arc::new(FixedObservable { values })
    }

    #[test]
    fn test_inner_streams_concatenate_in_order() {
        let scheduler = TestScheduler::new();
        let source = TestSource::new();
        let flat_map = FlatMapObservable::new(
            source.observable(),
            Arc::new(scheduler.clone()),
            |n: i64| Ok(inner_of(vec![n * 10, n * 10 + 1])),
        );
        let sink = TestObserver::immediate();
        let _sub = flat_map.observe(ObserverInfo::new(sink.observer()));

        let outer_ack = source.emit(vec![1, 2]);
        assert_eq!(outer_ack.value(), None);

        scheduler.tick();
        assert_eq!(sink.received(), vec![10, 11, 20, 21]);
        // All inners of the batch completed: the outer ack resolves.
        assert_eq!(outer_ack.value(), Some(AckKind::Continue));

        source.complete();
        assert!(sink.is_completed());
    }

    #[test]
    fn test_outer_completion_waits_for_active_inner() {
        let scheduler = TestScheduler::new();
        let source = TestSource::new();
        let inner_source: TestSource<i64> = TestSource::new();
        let inner_observable = inner_source.observable();
        let flat_map = FlatMapObservable::new(
            source.observable(),
            Arc::new(scheduler.clone()),
            move |_: i64| Ok(inner_observable.clone()),
        );
        let sink = TestObserver::immediate();
        let _sub = flat_map.observe(ObserverInfo::new(sink.observer()));

        let _ = source.emit(vec![1]);
        scheduler.tick();
        assert!(inner_source.is_subscribed());

        source.complete();
        assert!(!sink.is_completed());

        let _ = inner_source.emit(vec![5]);
        inner_source.complete();
        scheduler.tick();
        assert_eq!(sink.received(), vec![5]);
        assert!(sink.is_completed());
    }

    #[test]
    fn test_hot_inner_is_rejected() {
        let scheduler = TestScheduler::new();
        let source = TestSource::new();
        let flat_map = FlatMapObservable::new(
            source.observable(),
            Arc::new(scheduler.clone()),
            |_: i64| Err::<ObservableRef<i64>, _>(FlowError::HotFlatten),
        );
        let sink = TestObserver::<i64>::immediate();
        let _sub = flat_map.observe(ObserverInfo::new(sink.observer()));

        let ack = source.emit(vec![1]);
        assert_eq!(ack.value(), Some(AckKind::Stop));
        assert_eq!(sink.error(), Some(FlowError::HotFlatten));
    }
}
