// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded decoupling buffer.

use crate::disposable::Disposable;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use crate::observers::buffered::BackpressureBufferedObserver;
use crate::scheduler::SchedulerRef;
use std::sync::Arc;

/// Decouples the producer from downstream readiness with a bounded queue:
/// the producer keeps an immediate `Continue` while a slot is free and is
/// suspended on a pending ack when the queue is full.
pub struct BufferObservable<T> {
    source: ObservableRef<T>,
    scheduler: SchedulerRef,
    capacity: usize,
}

impl<T> BufferObservable<T> {
    /// Creates the operator over `source`, draining on `scheduler`.
    #[must_use]
    pub fn new(source: ObservableRef<T>, scheduler: SchedulerRef, capacity: usize) -> Self {
        BufferObservable {
            source,
            scheduler,
            capacity,
        }
    }
}

impl<T: Send + 'static> Observable<T> for BufferObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let buffered = BackpressureBufferedObserver::new(
            info.observer.clone(),
            self.scheduler.clone(),
            self.capacity,
        );
        self.source
            .observe(info.with_observer(Arc::new(buffered) as Arc<dyn Observer<T>>))
    }
}
