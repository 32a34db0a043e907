// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Element indexing.

use crate::batch::{Batch, BatchIter};
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pairs every element with its running index.
pub struct ZipWithIndexObservable<T> {
    source: ObservableRef<T>,
}

impl<T> ZipWithIndexObservable<T> {
    /// Creates the operator over `source`.
    #[must_use]
    pub fn new(source: ObservableRef<T>) -> Self {
        ZipWithIndexObservable { source }
    }
}

impl<T: Send + 'static> Observable<(T, usize)> for ZipWithIndexObservable<T> {
    fn observe(&self, info: ObserverInfo<(T, usize)>) -> Disposable {
        let observer = ZipWithIndexObserver {
            downstream: info.observer.clone(),
            index: Arc::new(AtomicUsize::new(0)),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct ZipWithIndexObserver<T> {
    downstream: Arc<dyn Observer<(T, usize)>>,
    index: Arc<AtomicUsize>,
}

impl<T: Send + 'static> Observer<T> for ZipWithIndexObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let index = self.index.clone();
        self.downstream.on_next(Batch::from_fn(move || {
            Box::new(
                batch
                    .into_elements()
                    .map(move |elem| (elem, index.fetch_add(1, Ordering::AcqRel))),
            ) as BatchIter<(T, usize)>
        }))
    }

    fn on_error(&self, error: FlowError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}
