// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Terminal fold.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use parking_lot::Mutex;
use std::sync::Arc;

/// Folds the whole stream into one value, emitted as a single batch on
/// completion.
pub struct ReduceObservable<T, A> {
    source: ObservableRef<T>,
    func: Arc<dyn Fn(A, T) -> A + Send + Sync>,
    initial: A,
}

impl<T, A: Clone> ReduceObservable<T, A> {
    /// Creates the operator over `source`.
    pub fn new<F>(source: ObservableRef<T>, func: F, initial: A) -> Self
    where
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        ReduceObservable {
            source,
            func: Arc::new(func),
            initial,
        }
    }
}

impl<T, A> Observable<A> for ReduceObservable<T, A>
where
    T: Send + 'static,
    A: Clone + Send + Sync + 'static,
{
    fn observe(&self, info: ObserverInfo<A>) -> Disposable {
        let observer = ReduceObserver {
            downstream: info.observer.clone(),
            func: self.func.clone(),
            acc: Mutex::new(Some(self.initial.clone())),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct ReduceObserver<T, A> {
    downstream: Arc<dyn Observer<A>>,
    func: Arc<dyn Fn(A, T) -> A + Send + Sync>,
    acc: Mutex<Option<A>>,
}

impl<T, A> Observer<T> for ReduceObserver<T, A>
where
    T: Send + 'static,
    A: Clone + Send + 'static,
{
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let elements = match batch.try_materialize() {
            Ok(elements) => elements,
            Err(error) => {
                let _ = self.acc.lock().take();
                self.downstream.on_error(error);
                return Ack::Stop;
            }
        };
        let mut acc = self.acc.lock();
        match acc.take() {
            Some(folded) => {
                *acc = Some(elements.into_iter().fold(folded, |a, x| (self.func)(a, x)));
                Ack::Continue
            }
            None => Ack::Stop,
        }
    }

    fn on_error(&self, error: FlowError) {
        let _ = self.acc.lock().take();
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        if let Some(acc) = self.acc.lock().take() {
            let _ = self.downstream.on_next(Batch::single(acc));
            self.downstream.on_completed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::source::TestSource;

    #[test]
    fn test_reduce_emits_fold_on_completion() {
        let source = TestSource::new();
        let reduce = ReduceObservable::new(source.observable(), |acc: i64, x: i64| acc + x, 0);
        let sink = TestObserver::immediate();
        let _sub = reduce.observe(ObserverInfo::new(sink.observer()));

        let _ = source.emit(vec![1, 2, 3]);
        let _ = source.emit(vec![4]);
        assert_eq!(sink.received(), Vec::<i64>::new());

        source.complete();
        assert_eq!(sink.received(), vec![10]);
        assert!(sink.is_completed());
    }
}
