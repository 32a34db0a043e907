// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Element-wise filtering.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Keeps elements satisfying a predicate.
///
/// Filtering changes the index space of the stream, so the facade clears the
/// base of the subscription.
pub struct FilterObservable<T> {
    source: ObservableRef<T>,
    pred: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> FilterObservable<T> {
    /// Creates the operator over `source`.
    pub fn new<F>(source: ObservableRef<T>, pred: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        FilterObservable {
            source,
            pred: Arc::new(pred),
        }
    }
}

impl<T: Send + 'static> Observable<T> for FilterObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let observer = FilterObserver {
            downstream: info.observer.clone(),
            pred: self.pred.clone(),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct FilterObserver<T> {
    downstream: Arc<dyn Observer<T>>,
    pred: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> Observer<T> for FilterObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let pred = self.pred.clone();
        self.downstream.on_next(batch.filter(move |elem| pred(elem)))
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}

/// Keeps elements whose running index satisfies a predicate.
///
/// The index counts elements, not batches, and runs across batch boundaries.
pub struct FilterWithIndexObservable<T> {
    source: ObservableRef<T>,
    pred: Arc<dyn Fn(usize, &T) -> bool + Send + Sync>,
}

impl<T> FilterWithIndexObservable<T> {
    /// Creates the operator over `source`.
    pub fn new<F>(source: ObservableRef<T>, pred: F) -> Self
    where
        F: Fn(usize, &T) -> bool + Send + Sync + 'static,
    {
        FilterWithIndexObservable {
            source,
            pred: Arc::new(pred),
        }
    }
}

impl<T: Send + 'static> Observable<T> for FilterWithIndexObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let observer = FilterWithIndexObserver {
            downstream: info.observer.clone(),
            pred: self.pred.clone(),
            index: Arc::new(AtomicUsize::new(0)),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct FilterWithIndexObserver<T> {
    downstream: Arc<dyn Observer<T>>,
    pred: Arc<dyn Fn(usize, &T) -> bool + Send + Sync>,
    index: Arc<AtomicUsize>,
}

impl<T: Send + 'static> Observer<T> for FilterWithIndexObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let pred = self.pred.clone();
        let index = self.index.clone();
        self.downstream.on_next(batch.filter(move |elem| {
            let idx = index.fetch_add(1, Ordering::AcqRel);
            pred(idx, elem)
        }))
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}
