// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded buffering with a blocking producer.
//!
//! Incoming batches are queued up to a capacity; the single drainer loop on
//! the configured scheduler delivers them to the underlying observer, waiting
//! for every downstream ack. While the queue is full the producer's ack is
//! held pending and released the moment a slot frees, which is how the
//! producer is suspended instead of dropped.

use crate::batch::Batch;
use crate::error::FlowError;
use crate::observer::{Observer, ObserverRef};
use crate::scheduler::{ExecutionModel, SchedulerRef};
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

enum QueueItem<T> {
    Next(Batch<T>),
    Error(FlowError),
    Completed,
}

struct BufferedInner<T> {
    queue: VecDeque<QueueItem<T>>,
    batches: usize,
    blocked: Option<AckCell>,
    draining: bool,
    stopped: bool,
}

struct BufferedShared<T> {
    underlying: ObserverRef<T>,
    scheduler: SchedulerRef,
    execution_model: ExecutionModel,
    capacity: usize,
    inner: Mutex<BufferedInner<T>>,
}

/// Observer decoupling a producer from a slower consumer with a bounded
/// queue; a full queue suspends the producer via a pending ack.
pub struct BackpressureBufferedObserver<T> {
    shared: Arc<BufferedShared<T>>,
}

impl<T: Send + 'static> BackpressureBufferedObserver<T> {
    /// Wraps `underlying`, draining on `scheduler`, holding at most
    /// `capacity` undelivered batches.
    #[must_use]
    pub fn new(underlying: ObserverRef<T>, scheduler: SchedulerRef, capacity: usize) -> Self {
        let execution_model = scheduler.execution_model();
        BackpressureBufferedObserver {
            shared: Arc::new(BufferedShared {
                underlying,
                scheduler,
                execution_model,
                capacity: capacity.max(1),
                inner: Mutex::new(BufferedInner {
                    queue: VecDeque::new(),
                    batches: 0,
                    blocked: None,
                    draining: false,
                    stopped: false,
                }),
            }),
        }
    }
}

impl<T: Send + 'static> BufferedShared<T> {
    fn kick(self: &Arc<Self>) {
        let shared = self.clone();
        self.scheduler.schedule(Box::new(move || shared.drain(0)));
    }

    fn drain(self: &Arc<Self>, mut sync_index: i64) {
        loop {
            let (item, unblock) = {
                let mut inner = self.inner.lock();
                if inner.stopped {
                    inner.draining = false;
                    (None, None)
                } else {
                    let item = inner.queue.pop_front();
                    match &item {
                        None => inner.draining = false,
                        Some(QueueItem::Next(_)) => inner.batches -= 1,
                        Some(_) => {}
                    }
                    let unblock = if inner.batches <= self.capacity {
                        inner.blocked.take()
                    } else {
                        None
                    };
                    (item, unblock)
                }
            };

            // Free the producer before delivering: the slot exists now.
            if let Some(cell) = unblock {
                let _ = cell.resolve(AckKind::Continue);
            }

            let Some(item) = item else {
                break;
            };
            match item {
                QueueItem::Error(error) => {
                    self.mark_stopped();
                    self.underlying.on_error(error);
                    break;
                }
                QueueItem::Completed => {
                    self.mark_stopped();
                    self.underlying.on_completed();
                    break;
                }
                QueueItem::Next(batch) => {
                    let ack = self.underlying.on_next(batch);
                    match ack.value() {
                        Some(AckKind::Continue) => {
                            let next = self.execution_model.next_frame_index(sync_index);
                            if next > 0 {
                                sync_index = next;
                            } else if next == 0 {
                                self.kick_resume();
                                break;
                            } else {
                                break;
                            }
                        }
                        Some(AckKind::Stop) => {
                            self.stop();
                            break;
                        }
                        None => {
                            let shared = self.clone();
                            ack.subscribe(move |kind| match kind {
                                AckKind::Continue => shared.kick_resume(),
                                AckKind::Stop => shared.stop(),
                            });
                            break;
                        }
                    }
                }
            }
        }
    }

    fn kick_resume(self: &Arc<Self>) {
        let shared = self.clone();
        self.scheduler.schedule(Box::new(move || shared.drain(0)));
    }

    fn mark_stopped(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        inner.draining = false;
        inner.queue.clear();
    }

    fn stop(self: &Arc<Self>) {
        let blocked = {
            let mut inner = self.inner.lock();
            inner.stopped = true;
            inner.draining = false;
            inner.queue.clear();
            inner.blocked.take()
        };
        if let Some(cell) = blocked {
            let _ = cell.resolve(AckKind::Stop);
        }
    }
}

impl<T: Send + 'static> Observer<T> for BackpressureBufferedObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let (ack, start) = {
            let mut inner = self.shared.inner.lock();
            if inner.stopped {
                return Ack::Stop;
            }
            let full = inner.batches >= self.shared.capacity;
            inner.queue.push_back(QueueItem::Next(batch));
            inner.batches += 1;
            let ack = if full {
                let cell = AckCell::new();
                inner.blocked = Some(cell.clone());
                Ack::Pending(cell)
            } else {
                Ack::Continue
            };
            let start = if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            };
            (ack, start)
        };
        if start {
            self.shared.kick();
        }
        ack
    }

    fn on_error(&self, error: FlowError) {
        let start = {
            let mut inner = self.shared.inner.lock();
            if inner.stopped {
                return;
            }
            inner.queue.push_back(QueueItem::Error(error));
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        if start {
            self.shared.kick();
        }
    }

    fn on_completed(&self) {
        let start = {
            let mut inner = self.shared.inner.lock();
            if inner.stopped {
                return;
            }
            inner.queue.push_back(QueueItem::Completed);
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        if start {
            self.shared.kick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;

    #[test]
    fn test_below_capacity_acks_immediately() {
        let scheduler = TestScheduler::new();
        let sink = TestObserver::immediate();
        let buffered =
            BackpressureBufferedObserver::new(sink.observer(), Arc::new(scheduler.clone()), 2);

        let ack = buffered.on_next(Batch::from_vec(vec![1]));
        assert!(matches!(ack, Ack::Continue));

        scheduler.tick();
        assert_eq!(sink.received(), vec![1]);
    }

    #[test]
    fn test_full_queue_blocks_producer_until_slot_frees() {
        let scheduler = TestScheduler::new();
        let sink = TestObserver::holding();
        let buffered =
            BackpressureBufferedObserver::new(sink.observer(), Arc::new(scheduler.clone()), 1);

        let first = buffered.on_next(Batch::from_vec(vec![1]));
        assert!(matches!(first, Ack::Continue));
        let second = buffered.on_next(Batch::from_vec(vec![2]));
        assert_eq!(second.value(), None);

        // Delivering the first batch frees its slot even though the sink
        // still holds the ack.
        scheduler.tick();
        assert_eq!(sink.received(), vec![1]);
        assert_eq!(second.value(), Some(AckKind::Continue));

        assert!(sink.ack_continue());
        scheduler.tick();
        assert_eq!(sink.received(), vec![1, 2]);
    }

    #[test]
    fn test_stop_from_underlying_releases_producer_with_stop() {
        let scheduler = TestScheduler::new();
        let sink = TestObserver::stopping();
        let buffered =
            BackpressureBufferedObserver::new(sink.observer(), Arc::new(scheduler.clone()), 1);

        let _ = buffered.on_next(Batch::from_vec(vec![1]));
        let blocked = buffered.on_next(Batch::from_vec(vec![2]));
        scheduler.tick();

        assert_eq!(blocked.value(), Some(AckKind::Stop));
        let after = buffered.on_next(Batch::from_vec(vec![3]));
        assert!(matches!(after, Ack::Stop));
    }
}
