// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Buffer-until-connect observer.
//!
//! Events arriving before `connect()` are buffered; connecting drains the
//! buffered batches to the underlying observer in order, respecting its
//! acks, and only then delivers a buffered terminal event. A buffered error
//! is therefore always delivered after the buffered next events. After the
//! drain the observer is live and passes events straight through.

use crate::batch::Batch;
use crate::error::FlowError;
use crate::observer::{Observer, ObserverRef};
use crate::scheduler::SchedulerRef;
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct ConnectableInner<T> {
    buffered: VecDeque<(Batch<T>, AckCell)>,
    terminal: Option<Option<FlowError>>,
    connected: bool,
    live: bool,
    stopped: bool,
}

struct ConnectableShared<T> {
    underlying: ObserverRef<T>,
    scheduler: SchedulerRef,
    inner: Mutex<ConnectableInner<T>>,
}

/// Observer accepting events immediately but forwarding them only once
/// connected.
pub struct ConnectableObserver<T> {
    shared: Arc<ConnectableShared<T>>,
}

impl<T> Clone for ConnectableObserver<T> {
    fn clone(&self) -> Self {
        ConnectableObserver {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> ConnectableObserver<T> {
    /// Wraps `underlying`; the drain after `connect` runs on `scheduler`.
    #[must_use]
    pub fn new(underlying: ObserverRef<T>, scheduler: SchedulerRef) -> Self {
        ConnectableObserver {
            shared: Arc::new(ConnectableShared {
                underlying,
                scheduler,
                inner: Mutex::new(ConnectableInner {
                    buffered: VecDeque::new(),
                    terminal: None,
                    connected: false,
                    live: false,
                    stopped: false,
                }),
            }),
        }
    }

    /// Connects the observer: buffered events drain to the underlying
    /// observer, then events pass through live.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Protocol`] when called a second time.
    pub fn connect(&self) -> Result<(), FlowError> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.connected {
                tracing::warn!("connectable observer connected twice");
                return Err(FlowError::Protocol {
                    message: "connectable observer connected twice".to_owned(),
                });
            }
            inner.connected = true;
        }
        let shared = self.shared.clone();
        self.shared
            .scheduler
            .schedule(Box::new(move || shared.drain()));
        Ok(())
    }
}

impl<T: Send + 'static> ConnectableShared<T> {
    fn drain(self: &Arc<Self>) {
        loop {
            enum Step<T> {
                Deliver(Batch<T>, AckCell),
                Terminal(Option<FlowError>),
                Live,
            }

            let step = {
                let mut inner = self.inner.lock();
                if inner.stopped {
                    return;
                }
                if let Some(entry) = inner.buffered.pop_front() {
                    Step::Deliver(entry.0, entry.1)
                } else if let Some(terminal) = inner.terminal.take() {
                    inner.stopped = true;
                    Step::Terminal(terminal)
                } else {
                    inner.live = true;
                    Step::Live
                }
            };

            match step {
                Step::Live => break,
                Step::Terminal(error) => {
                    match error {
                        Some(error) => self.underlying.on_error(error),
                        None => self.underlying.on_completed(),
                    }
                    break;
                }
                Step::Deliver(batch, cell) => {
                    let ack = self.underlying.on_next(batch);
                    ack.connect(&cell);
                    match ack.value() {
                        Some(AckKind::Continue) => {}
                        Some(AckKind::Stop) => {
                            self.stop();
                            break;
                        }
                        None => {
                            let shared = self.clone();
                            ack.subscribe(move |kind| match kind {
                                AckKind::Continue => {
                                    let again = shared.clone();
                                    shared.scheduler.schedule(Box::new(move || again.drain()));
                                }
                                AckKind::Stop => shared.stop(),
                            });
                            break;
                        }
                    }
                }
            }
        }
    }

    fn stop(self: &Arc<Self>) {
        let pending: Vec<AckCell> = {
            let mut inner = self.inner.lock();
            inner.stopped = true;
            inner.terminal = None;
            inner.buffered.drain(..).map(|(_, cell)| cell).collect()
        };
        for cell in pending {
            let _ = cell.resolve(AckKind::Stop);
        }
    }
}

impl<T: Send + 'static> Observer<T> for ConnectableObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let mut inner = self.shared.inner.lock();
        if inner.stopped {
            return Ack::Stop;
        }
        if inner.live {
            drop(inner);
            return self.shared.underlying.on_next(batch);
        }
        let cell = AckCell::new();
        inner.buffered.push_back((batch, cell.clone()));
        Ack::Pending(cell)
    }

    fn on_error(&self, error: FlowError) {
        let mut inner = self.shared.inner.lock();
        if inner.stopped || inner.terminal.is_some() {
            return;
        }
        if inner.live {
            inner.stopped = true;
            drop(inner);
            self.shared.underlying.on_error(error);
            return;
        }
        inner.terminal = Some(Some(error));
    }

    fn on_completed(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.stopped || inner.terminal.is_some() {
            return;
        }
        if inner.live {
            inner.stopped = true;
            drop(inner);
            self.shared.underlying.on_completed();
            return;
        }
        inner.terminal = Some(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;

    fn setup() -> (TestScheduler, TestObserver<i64>, ConnectableObserver<i64>) {
        let scheduler = TestScheduler::new();
        let sink = TestObserver::immediate();
        let connectable = ConnectableObserver::new(sink.observer(), Arc::new(scheduler.clone()));
        (scheduler, sink, connectable)
    }

    #[test]
    fn test_connect_empty_forwards_nothing() {
        let (scheduler, sink, connectable) = setup();
        connectable.connect().expect("first connect");
        scheduler.tick();
        assert_eq!(sink.received(), Vec::<i64>::new());
        assert!(!sink.is_completed());
    }

    #[test]
    fn test_buffered_before_connect() {
        let (scheduler, sink, connectable) = setup();

        let ack = connectable.on_next(Batch::from_vec(vec![1]));
        assert_eq!(sink.received(), Vec::<i64>::new());
        assert_eq!(ack.value(), None);

        connectable.connect().expect("first connect");
        scheduler.tick();
        assert_eq!(sink.received(), vec![1]);
        assert_eq!(ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_buffered_error_is_delivered_after_buffered_nexts() {
        let (scheduler, sink, connectable) = setup();

        let ack = connectable.on_next(Batch::from_vec(vec![1]));
        connectable.on_error(FlowError::User {
            message: "boom".to_owned(),
        });

        connectable.connect().expect("first connect");
        scheduler.tick();

        assert_eq!(sink.received(), vec![1]);
        assert_eq!(
            sink.error(),
            Some(FlowError::User {
                message: "boom".to_owned()
            })
        );
        assert_eq!(ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_live_after_connect() {
        let (scheduler, sink, connectable) = setup();
        connectable.connect().expect("first connect");
        scheduler.tick();

        let ack = connectable.on_next(Batch::from_vec(vec![7]));
        assert!(matches!(ack, Ack::Continue));
        assert_eq!(sink.received(), vec![7]);
    }

    #[test]
    fn test_double_connect_is_a_protocol_violation() {
        let (_scheduler, _sink, connectable) = setup();
        connectable.connect().expect("first connect");
        assert!(matches!(
            connectable.connect(),
            Err(FlowError::Protocol { .. })
        ));
    }
}
