// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Running fold.

use crate::batch::{Batch, BatchIter};
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use parking_lot::Mutex;
use std::sync::Arc;

/// Carries an accumulator across batches, emitting every intermediate value.
///
/// The fold is applied lazily while the downstream consumes the batch; the
/// downstream ack passes through untouched.
pub struct ScanObservable<T, A> {
    source: ObservableRef<T>,
    func: Arc<dyn Fn(&A, T) -> A + Send + Sync>,
    initial: A,
}

impl<T, A: Clone> ScanObservable<T, A> {
    /// Creates the operator over `source`.
    pub fn new<F>(source: ObservableRef<T>, func: F, initial: A) -> Self
    where
        F: Fn(&A, T) -> A + Send + Sync + 'static,
    {
        ScanObservable {
            source,
            func: Arc::new(func),
            initial,
        }
    }
}

impl<T, A> Observable<A> for ScanObservable<T, A>
where
    T: Send + 'static,
    A: Clone + Send + Sync + 'static,
{
    fn observe(&self, info: ObserverInfo<A>) -> Disposable {
        let observer = ScanObserver {
            downstream: info.observer.clone(),
            func: self.func.clone(),
            acc: Arc::new(Mutex::new(self.initial.clone())),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct ScanObserver<T, A> {
    downstream: Arc<dyn Observer<A>>,
    func: Arc<dyn Fn(&A, T) -> A + Send + Sync>,
    acc: Arc<Mutex<A>>,
}

impl<T, A> Observer<T> for ScanObserver<T, A>
where
    T: Send + 'static,
    A: Clone + Send + 'static,
{
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let func = self.func.clone();
        let acc = self.acc.clone();
        self.downstream.on_next(Batch::from_fn(move || {
            Box::new(batch.into_elements().map(move |elem| {
                let mut acc = acc.lock();
                let next = func(&acc, elem);
                *acc = next.clone();
                next
            })) as BatchIter<A>
        }))
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::source::TestSource;

    #[test]
    fn test_scan_emits_running_fold() {
        let source = TestSource::new();
        let scan = ScanObservable::new(source.observable(), |acc: &i64, x: i64| acc + x, 0);
        let sink = TestObserver::immediate();
        let _sub = scan.observe(ObserverInfo::new(sink.observer()));

        let _ = source.emit(vec![1, 2, 3]);
        let _ = source.emit(vec![4]);
        source.complete();

        assert_eq!(sink.received(), vec![1, 3, 6, 10]);
        assert!(sink.is_completed());
    }
}
