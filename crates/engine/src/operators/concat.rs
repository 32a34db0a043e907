// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Source-by-source concatenation.
//!
//! Every source is subscribed up front behind a connectable observer, so
//! early emissions are buffered with their acks held and the producers stay
//! suspended. Sources are connected one after another as their predecessor
//! completes, preserving per-source order and back-pressure throughout.

use crate::batch::Batch;
use crate::disposable::{CompositeDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use crate::observers::connectable::ConnectableObserver;
use crate::scheduler::SchedulerRef;
use ackflow_ack::Ack;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Emits the elements of each source in turn, completing after the last.
pub struct ConcatObservable<T> {
    sources: Vec<ObservableRef<T>>,
    scheduler: SchedulerRef,
}

impl<T> ConcatObservable<T> {
    /// Creates the operator over `sources` in emission order.
    #[must_use]
    pub fn new(sources: Vec<ObservableRef<T>>, scheduler: SchedulerRef) -> Self {
        ConcatObservable { sources, scheduler }
    }
}

impl<T: Send + 'static> Observable<T> for ConcatObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let shared = Arc::new(ConcatShared {
            downstream: info.observer.clone(),
            pending: Mutex::new(VecDeque::new()),
            stopped: Mutex::new(false),
        });

        let composite = CompositeDisposable::new();
        {
            let mut pending = shared.pending.lock();
            for source in &self.sources {
                let section = SectionObserver {
                    shared: shared.clone(),
                };
                let connectable =
                    ConnectableObserver::new(Arc::new(section), self.scheduler.clone());
                composite.add(
                    source.observe(
                        info.with_observer(Arc::new(connectable.clone()) as Arc<dyn Observer<T>>),
                    ),
                );
                pending.push_back(connectable);
            }
        }

        shared.advance();
        composite.into_disposable()
    }
}

struct ConcatShared<T> {
    downstream: Arc<dyn Observer<T>>,
    pending: Mutex<VecDeque<ConnectableObserver<T>>>,
    stopped: Mutex<bool>,
}

impl<T: Send + 'static> ConcatShared<T> {
    /// Connects the next source, or completes downstream after the last one.
    fn advance(self: &Arc<Self>) {
        if *self.stopped.lock() {
            return;
        }
        let next = self.pending.lock().pop_front();
        match next {
            Some(connectable) => {
                if let Err(error) = connectable.connect() {
                    self.fail(error);
                }
            }
            None => self.downstream.on_completed(),
        }
    }

    fn fail(self: &Arc<Self>, error: FlowError) {
        {
            let mut stopped = self.stopped.lock();
            if *stopped {
                return;
            }
            *stopped = true;
            self.pending.lock().clear();
        }
        self.downstream.on_error(error);
    }
}

struct SectionObserver<T> {
    shared: Arc<ConcatShared<T>>,
}

impl<T: Send + 'static> Observer<T> for SectionObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        self.shared.downstream.on_next(batch)
    }

    fn on_error(&self, error: FlowError) {
        self.shared.fail(error);
    }

    fn on_completed(&self) {
        self.shared.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;
    use crate::testing::source::TestSource;
    use ackflow_ack::AckKind;

    #[test]
    fn test_sources_emit_in_sequence() {
        let scheduler = TestScheduler::new();
        let a = TestSource::new();
        let b = TestSource::new();
        let concat = ConcatObservable::new(
            vec![a.observable(), b.observable()],
            Arc::new(scheduler.clone()),
        );
        let sink = TestObserver::immediate();
        let _sub = concat.observe(ObserverInfo::new(sink.observer()));
        scheduler.tick();

        // The second source emits early; its batch is buffered and its ack
        // held until the first source completes.
        let b_ack = b.emit(vec![10]);
        assert_eq!(b_ack.value(), None);

        let _ = a.emit(vec![1, 2]);
        assert_eq!(sink.received(), vec![1, 2]);
        a.complete();
        scheduler.tick();

        assert_eq!(sink.received(), vec![1, 2, 10]);
        assert_eq!(b_ack.value(), Some(AckKind::Continue));
        assert!(!sink.is_completed());

        b.complete();
        scheduler.tick();
        assert!(sink.is_completed());
    }
}
