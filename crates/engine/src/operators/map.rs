// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Element-wise mapping.

use crate::batch::{Batch, BatchIter};
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use std::sync::Arc;

/// Applies a function to every element; batches stay lazy and the downstream
/// ack passes through untouched.
pub struct MapObservable<S, T> {
    source: ObservableRef<S>,
    func: Arc<dyn Fn(S) -> T + Send + Sync>,
}

impl<S, T> MapObservable<S, T> {
    /// Creates the operator over `source`.
    pub fn new<F>(source: ObservableRef<S>, func: F) -> Self
    where
        F: Fn(S) -> T + Send + Sync + 'static,
    {
        MapObservable {
            source,
            func: Arc::new(func),
        }
    }
}

impl<S: Send + 'static, T: Send + 'static> Observable<T> for MapObservable<S, T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let observer = MapObserver {
            downstream: info.observer.clone(),
            func: self.func.clone(),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct MapObserver<S, T> {
    downstream: Arc<dyn Observer<T>>,
    func: Arc<dyn Fn(S) -> T + Send + Sync>,
}

impl<S: Send + 'static, T: Send + 'static> Observer<S> for MapObserver<S, T> {
    fn on_next(&self, batch: Batch<S>) -> Ack {
        let func = self.func.clone();
        self.downstream.on_next(batch.map(move |elem| func(elem)))
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}

/// Maps every element to an iterator and flattens the result into the same
/// batch.
pub struct MapToIteratorObservable<S, T> {
    source: ObservableRef<S>,
    func: Arc<dyn Fn(S) -> BatchIter<T> + Send + Sync>,
}

impl<S, T> MapToIteratorObservable<S, T> {
    /// Creates the operator over `source`.
    pub fn new<F>(source: ObservableRef<S>, func: F) -> Self
    where
        F: Fn(S) -> BatchIter<T> + Send + Sync + 'static,
    {
        MapToIteratorObservable {
            source,
            func: Arc::new(func),
        }
    }
}

impl<S: Send + 'static, T: Send + 'static> Observable<T> for MapToIteratorObservable<S, T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let observer = MapToIteratorObserver {
            downstream: info.observer.clone(),
            func: self.func.clone(),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct MapToIteratorObserver<S, T> {
    downstream: Arc<dyn Observer<T>>,
    func: Arc<dyn Fn(S) -> BatchIter<T> + Send + Sync>,
}

impl<S: Send + 'static, T: Send + 'static> Observer<S> for MapToIteratorObserver<S, T> {
    fn on_next(&self, batch: Batch<S>) -> Ack {
        let func = self.func.clone();
        self.downstream.on_next(Batch::from_fn(move || {
            Box::new(batch.into_elements().flat_map(move |elem| func(elem))) as BatchIter<T>
        }))
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}
