// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded buffering that drops the oldest entry.
//!
//! The producer is never suspended: a push into a full queue overwrites the
//! oldest undelivered batch and is acknowledged with an immediate `Continue`.
//! Built for telemetry-style streams where freshness beats completeness.

use crate::batch::Batch;
use crate::error::FlowError;
use crate::observer::{Observer, ObserverRef};
use crate::scheduler::{ExecutionModel, SchedulerRef};
use ackflow_ack::{Ack, AckKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct EvictingInner<T> {
    queue: VecDeque<Batch<T>>,
    error: Option<FlowError>,
    completed: bool,
    draining: bool,
    stopped: bool,
}

struct EvictingShared<T> {
    underlying: ObserverRef<T>,
    scheduler: SchedulerRef,
    execution_model: ExecutionModel,
    capacity: usize,
    inner: Mutex<EvictingInner<T>>,
}

/// Observer with a bounded queue evicting the oldest batch when full.
pub struct EvictingBufferedObserver<T> {
    shared: Arc<EvictingShared<T>>,
}

impl<T: Send + 'static> EvictingBufferedObserver<T> {
    /// Wraps `underlying`, draining on `scheduler`, keeping at most
    /// `capacity` undelivered batches.
    #[must_use]
    pub fn new(underlying: ObserverRef<T>, scheduler: SchedulerRef, capacity: usize) -> Self {
        let execution_model = scheduler.execution_model();
        EvictingBufferedObserver {
            shared: Arc::new(EvictingShared {
                underlying,
                scheduler,
                execution_model,
                capacity: capacity.max(1),
                inner: Mutex::new(EvictingInner {
                    queue: VecDeque::new(),
                    error: None,
                    completed: false,
                    draining: false,
                    stopped: false,
                }),
            }),
        }
    }
}

impl<T: Send + 'static> EvictingShared<T> {
    fn kick_if_needed(self: &Arc<Self>, start: bool) {
        if start {
            let shared = self.clone();
            self.scheduler.schedule(Box::new(move || shared.drain(0)));
        }
    }

    fn drain(self: &Arc<Self>, mut sync_index: i64) {
        loop {
            enum Step<T> {
                Deliver(Batch<T>),
                Terminal(Option<FlowError>),
                Done,
            }

            let step = {
                let mut inner = self.inner.lock();
                if inner.stopped {
                    inner.draining = false;
                    Step::Done
                } else if let Some(batch) = inner.queue.pop_front() {
                    Step::Deliver(batch)
                } else if inner.error.is_some() || inner.completed {
                    inner.stopped = true;
                    inner.draining = false;
                    Step::Terminal(inner.error.take())
                } else {
                    inner.draining = false;
                    Step::Done
                }
            };

            match step {
                Step::Done => break,
                Step::Terminal(error) => {
                    match error {
                        Some(error) => self.underlying.on_error(error),
                        None => self.underlying.on_completed(),
                    }
                    break;
                }
                Step::Deliver(batch) => {
                    let ack = self.underlying.on_next(batch);
                    match ack.value() {
                        Some(AckKind::Continue) => {
                            let next = self.execution_model.next_frame_index(sync_index);
                            if next > 0 {
                                sync_index = next;
                            } else if next == 0 {
                                let shared = self.clone();
                                self.scheduler.schedule(Box::new(move || shared.drain(0)));
                                break;
                            } else {
                                break;
                            }
                        }
                        Some(AckKind::Stop) => {
                            self.mark_stopped();
                            break;
                        }
                        None => {
                            let shared = self.clone();
                            ack.subscribe(move |kind| match kind {
                                AckKind::Continue => {
                                    let again = shared.clone();
                                    shared
                                        .scheduler
                                        .schedule(Box::new(move || again.drain(0)));
                                }
                                AckKind::Stop => shared.mark_stopped(),
                            });
                            break;
                        }
                    }
                }
            }
        }
    }

    fn mark_stopped(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        inner.draining = false;
        inner.queue.clear();
    }
}

impl<T: Send + 'static> Observer<T> for EvictingBufferedObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let start = {
            let mut inner = self.shared.inner.lock();
            if inner.stopped {
                return Ack::Stop;
            }
            if inner.queue.len() >= self.shared.capacity {
                // Oldest entry makes way; the producer never waits.
                let _ = inner.queue.pop_front();
            }
            inner.queue.push_back(batch);
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        self.shared.kick_if_needed(start);
        Ack::Continue
    }

    fn on_error(&self, error: FlowError) {
        let start = {
            let mut inner = self.shared.inner.lock();
            if inner.stopped || inner.error.is_some() || inner.completed {
                return;
            }
            inner.error = Some(error);
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        self.shared.kick_if_needed(start);
    }

    fn on_completed(&self) {
        let start = {
            let mut inner = self.shared.inner.lock();
            if inner.stopped || inner.error.is_some() || inner.completed {
                return;
            }
            inner.completed = true;
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        self.shared.kick_if_needed(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;

    #[test]
    fn test_oldest_batches_are_evicted() {
        let scheduler = TestScheduler::new();
        let sink = TestObserver::holding();
        let evicting =
            EvictingBufferedObserver::new(sink.observer(), Arc::new(scheduler.clone()), 4);

        for i in 1..=5 {
            let ack = evicting.on_next(Batch::from_vec(vec![i]));
            assert!(matches!(ack, Ack::Continue));
        }

        scheduler.tick();
        assert_eq!(sink.received(), vec![2]);

        assert!(sink.ack_continue());
        scheduler.tick();
        assert_eq!(sink.received(), vec![2, 3]);
    }

    #[test]
    fn test_completion_after_drain() {
        let scheduler = TestScheduler::new();
        let sink = TestObserver::immediate();
        let evicting =
            EvictingBufferedObserver::new(sink.observer(), Arc::new(scheduler.clone()), 4);

        let _ = evicting.on_next(Batch::from_vec(vec![1]));
        evicting.on_completed();
        scheduler.tick();

        assert_eq!(sink.received(), vec![1]);
        assert!(sink.is_completed());
    }
}
