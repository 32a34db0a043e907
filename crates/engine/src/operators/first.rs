// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! First element.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::Ack;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hook intercepting the empty-sequence failure of [`FirstObservable`].
pub type RaiseExceptionHook = Arc<dyn Fn(FlowError) -> FlowError + Send + Sync>;

/// Forwards the first element, answers `Stop` upstream and completes
/// downstream.
///
/// An upstream completing without an element fails the subscription with
/// [`FlowError::EmptySequence`], optionally routed through a user hook.
pub struct FirstObservable<T> {
    source: ObservableRef<T>,
    raise_exception: Option<RaiseExceptionHook>,
}

impl<T> FirstObservable<T> {
    /// Creates the operator over `source`.
    #[must_use]
    pub fn new(source: ObservableRef<T>, raise_exception: Option<RaiseExceptionHook>) -> Self {
        FirstObservable {
            source,
            raise_exception,
        }
    }
}

impl<T: Send + 'static> Observable<T> for FirstObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let observer = FirstObserver {
            downstream: info.observer.clone(),
            raise_exception: self.raise_exception.clone(),
            done: AtomicBool::new(false),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct FirstObserver<T> {
    downstream: Arc<dyn Observer<T>>,
    raise_exception: Option<RaiseExceptionHook>,
    done: AtomicBool,
}

impl<T: Send + 'static> Observer<T> for FirstObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        if self.done.load(Ordering::Acquire) {
            return Ack::Stop;
        }
        let mut elements = match batch.try_materialize() {
            Ok(elements) => elements.into_iter(),
            Err(error) => {
                self.done.store(true, Ordering::Release);
                self.downstream.on_error(error);
                return Ack::Stop;
            }
        };
        match elements.next() {
            // An empty batch carries no element; keep waiting.
            None => Ack::Continue,
            Some(first) => {
                self.done.store(true, Ordering::Release);
                let _ = self.downstream.on_next(Batch::single(first));
                self.downstream.on_completed();
                Ack::Stop
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_error(error);
        }
    }

    fn on_completed(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let error = match &self.raise_exception {
            None => FlowError::EmptySequence,
            Some(hook) => {
                let hook = hook.clone();
                std::panic::catch_unwind(AssertUnwindSafe(move || hook(FlowError::EmptySequence)))
                    .unwrap_or_else(FlowError::from_panic)
            }
        };
        self.downstream.on_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::source::TestSource;
    use ackflow_ack::AckKind;

    #[test]
    fn test_first_forwards_one_element_and_stops_upstream() {
        let source = TestSource::new();
        let first = FirstObservable::new(source.observable(), None);
        let sink = TestObserver::immediate();
        let _sub = first.observe(ObserverInfo::new(sink.observer()));

        let ack = source.emit(vec![7, 8, 9]);

        assert_eq!(ack.value(), Some(AckKind::Stop));
        assert_eq!(sink.received(), vec![7]);
        assert!(sink.is_completed());
    }

    #[test]
    fn test_first_on_empty_upstream_errors() {
        let source = TestSource::new();
        let first = FirstObservable::new(source.observable(), None);
        let sink = TestObserver::<i64>::immediate();
        let _sub = first.observe(ObserverInfo::new(sink.observer()));

        source.complete();

        assert_eq!(sink.received(), Vec::<i64>::new());
        assert_eq!(sink.error(), Some(FlowError::EmptySequence));
        assert!(!sink.is_completed());
    }

    #[test]
    fn test_empty_batch_keeps_waiting() {
        let source = TestSource::new();
        let first = FirstObservable::new(source.observable(), None);
        let sink = TestObserver::immediate();
        let _sub = first.observe(ObserverInfo::new(sink.observer()));

        let ack = source.emit(vec![]);
        assert_eq!(ack.value(), Some(AckKind::Continue));

        let ack = source.emit(vec![1]);
        assert_eq!(ack.value(), Some(AckKind::Stop));
        assert_eq!(sink.received(), vec![1]);
    }

    #[test]
    fn test_raise_exception_hook_rewrites_error() {
        let source = TestSource::new();
        let hook: RaiseExceptionHook = Arc::new(|_| FlowError::User {
            message: "no rows".to_owned(),
        });
        let first = FirstObservable::new(source.observable(), Some(hook));
        let sink = TestObserver::<i64>::immediate();
        let _sub = first.observe(ObserverInfo::new(sink.observer()));

        source.complete();

        assert_eq!(
            sink.error(),
            Some(FlowError::User {
                message: "no rows".to_owned()
            })
        );
    }
}
