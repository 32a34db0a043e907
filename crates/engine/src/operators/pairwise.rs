// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Consecutive pairs.

use crate::batch::{Batch, BatchIter};
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use parking_lot::Mutex;
use std::sync::Arc;

/// Emits `(previous, current)` for every element after the first, across
/// batch boundaries.
pub struct PairwiseObservable<T> {
    source: ObservableRef<T>,
}

impl<T> PairwiseObservable<T> {
    /// Creates the operator over `source`.
    #[must_use]
    pub fn new(source: ObservableRef<T>) -> Self {
        PairwiseObservable { source }
    }
}

impl<T: Clone + Send + 'static> Observable<(T, T)> for PairwiseObservable<T> {
    fn observe(&self, info: ObserverInfo<(T, T)>) -> Disposable {
        let observer = PairwiseObserver {
            downstream: info.observer.clone(),
            last: Arc::new(Mutex::new(None)),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct PairwiseObserver<T> {
    downstream: Arc<dyn Observer<(T, T)>>,
    last: Arc<Mutex<Option<T>>>,
}

impl<T: Clone + Send + 'static> Observer<T> for PairwiseObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let last = self.last.clone();
        self.downstream.on_next(Batch::from_fn(move || {
            Box::new(batch.into_elements().filter_map(move |elem| {
                let mut last = last.lock();
                match last.replace(elem.clone()) {
                    Some(prev) => Some((prev, elem)),
                    None => None,
                }
            })) as BatchIter<(T, T)>
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
    fn test_pairwise_spans_batches() {
        let source = TestSource::new();
        let pairwise = PairwiseObservable::new(source.observable());
        let sink = TestObserver::immediate();
        let _sub = pairwise.observe(ObserverInfo::new(sink.observer()));

        let _ = source.emit(vec![1, 2, 3]);
        let _ = source.emit(vec![4]);
        source.complete();

        assert_eq!(sink.received(), vec![(1, 2), (2, 3), (3, 4)]);
    }
}
