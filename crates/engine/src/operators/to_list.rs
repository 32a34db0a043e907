// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Collect into a single list.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use parking_lot::Mutex;
use std::sync::Arc;

/// Collects every element and emits exactly one batch holding one list on
/// completion.
pub struct ToListObservable<T> {
    source: ObservableRef<T>,
}

impl<T> ToListObservable<T> {
    /// Creates the operator over `source`.
    #[must_use]
    pub fn new(source: ObservableRef<T>) -> Self {
        ToListObservable { source }
    }
}

impl<T: Send + 'static> Observable<Vec<T>> for ToListObservable<T> {
    fn observe(&self, info: ObserverInfo<Vec<T>>) -> Disposable {
        let observer = ToListObserver {
            downstream: info.observer.clone(),
            collected: Mutex::new(Some(Vec::new())),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct ToListObserver<T> {
    downstream: Arc<dyn Observer<Vec<T>>>,
    collected: Mutex<Option<Vec<T>>>,
}

impl<T: Send + 'static> Observer<T> for ToListObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let elements = match batch.try_materialize() {
            Ok(elements) => elements,
            Err(error) => {
                let _ = self.collected.lock().take();
                self.downstream.on_error(error);
                return Ack::Stop;
            }
        };
        match &mut *self.collected.lock() {
            Some(collected) => {
                collected.extend(elements);
                Ack::Continue
            }
            None => Ack::Stop,
        }
    }

    fn on_error(&self, error: FlowError) {
        let _ = self.collected.lock().take();
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        if let Some(collected) = self.collected.lock().take() {
            let _ = self.downstream.on_next(Batch::single(collected));
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
    fn test_to_list_emits_one_batch_on_completion() {
        let source = TestSource::new();
        let to_list = ToListObservable::new(source.observable());
        let sink = TestObserver::immediate();
        let _sub = to_list.observe(ObserverInfo::new(sink.observer()));

        let _ = source.emit(vec![1, 2]);
        let _ = source.emit(vec![3]);
        assert_eq!(sink.received(), Vec::<Vec<i64>>::new());

        source.complete();
        assert_eq!(sink.received(), vec![vec![1, 2, 3]]);
        assert_eq!(sink.batch_sizes(), vec![1]);
        assert!(sink.is_completed());
    }
}
