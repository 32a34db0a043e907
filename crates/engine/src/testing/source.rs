// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! A root observable driven by explicit emissions.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{ObserverInfo, ObserverRef};
use ackflow_ack::Ack;
use parking_lot::Mutex;
use std::sync::Arc;

struct TestSourceInner<T> {
    observer: Mutex<Option<ObserverRef<T>>>,
}

/// Test source pushing batches on demand and exposing the returned acks.
pub struct TestSource<T> {
    inner: Arc<TestSourceInner<T>>,
}

impl<T> Clone for TestSource<T> {
    fn clone(&self) -> Self {
        TestSource {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for TestSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> TestSource<T> {
    /// Creates an unsubscribed source.
    #[must_use]
    pub fn new() -> Self {
        TestSource {
            inner: Arc::new(TestSourceInner {
                observer: Mutex::new(None),
            }),
        }
    }

    /// The observable side of the source.
    #[must_use]
    pub fn observable(&self) -> ObservableRef<T> {
        Arc::new(TestSourceObservable {
            inner: self.inner.clone(),
        })
    }

    /// Whether an observer is currently installed.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner.observer.lock().is_some()
    }

    /// Pushes one batch of values; returns `Stop` when unsubscribed.
    pub fn emit(&self, values: Vec<T>) -> Ack {
        let observer = self.inner.observer.lock().clone();
        match observer {
            Some(observer) => observer.on_next(Batch::from_vec(values)),
            None => Ack::Stop,
        }
    }

    /// Pushes a prepared batch.
    pub fn emit_batch(&self, batch: Batch<T>) -> Ack {
        let observer = self.inner.observer.lock().clone();
        match observer {
            Some(observer) => observer.on_next(batch),
            None => Ack::Stop,
        }
    }

    /// Completes the installed observer.
    pub fn complete(&self) {
        let observer = self.inner.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_completed();
        }
    }

    /// Fails the installed observer.
    pub fn error(&self, error: FlowError) {
        let observer = self.inner.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_error(error);
        }
    }
}

struct TestSourceObservable<T> {
    inner: Arc<TestSourceInner<T>>,
}

impl<T: Send + Sync + 'static> Observable<T> for TestSourceObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        *self.inner.observer.lock() = Some(info.observer);
        let inner = self.inner.clone();
        Disposable::new(move || {
            *inner.observer.lock() = None;
        })
    }
}
