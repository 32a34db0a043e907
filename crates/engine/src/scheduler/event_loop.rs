// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Cooperative single-threaded event-loop scheduler.
//!
//! One dedicated thread runs every submitted action in submission order, so
//! the loop is order-guaranteed and operator state reached only from this
//! loop needs no cross-thread coordination beyond the hand-off queue.

use super::{clock_now, Action, Scheduler};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Msg {
    Run(Action),
    RunAfter(Instant, u64, Action),
}

struct Delayed {
    at: Instant,
    seq: u64,
    action: Action,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

/// A cooperative single-threaded scheduler.
pub struct EventLoopScheduler {
    tx: flume::Sender<Msg>,
    pending: Arc<AtomicUsize>,
    disposed: Arc<AtomicBool>,
    seq: AtomicUsize,
}

impl Default for EventLoopScheduler {
    fn default() -> Self {
        Self::new("ackflow-loop")
    }
}

impl EventLoopScheduler {
    /// Starts the loop thread.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (tx, rx) = flume::unbounded::<Msg>();
        let pending = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicBool::new(false));

        let loop_pending = pending.clone();
        let loop_disposed = disposed.clone();
        let builder = std::thread::Builder::new().name(name.to_owned());
        let spawned = builder.spawn(move || {
            let mut delayed: BinaryHeap<Delayed> = BinaryHeap::new();
            loop {
                let now = Instant::now();
                while delayed.peek().is_some_and(|next| next.at <= now) {
                    if let Some(due) = delayed.pop() {
                        if !loop_disposed.load(Ordering::Acquire) {
                            (due.action)();
                        }
                        let _ = loop_pending.fetch_sub(1, Ordering::AcqRel);
                    }
                }

                let received = match delayed.peek() {
                    Some(next) => match rx.recv_deadline(next.at) {
                        Ok(msg) => Some(msg),
                        Err(flume::RecvTimeoutError::Timeout) => continue,
                        Err(flume::RecvTimeoutError::Disconnected) => break,
                    },
                    None => match rx.recv() {
                        Ok(msg) => Some(msg),
                        Err(_) => break,
                    },
                };

                match received {
                    Some(Msg::Run(action)) => {
                        if !loop_disposed.load(Ordering::Acquire) {
                            action();
                        }
                        let _ = loop_pending.fetch_sub(1, Ordering::AcqRel);
                    }
                    Some(Msg::RunAfter(at, seq, action)) => {
                        delayed.push(Delayed { at, seq, action });
                    }
                    None => {}
                }
            }
        });
        drop(spawned);

        EventLoopScheduler {
            tx,
            pending,
            disposed,
            seq: AtomicUsize::new(0),
        }
    }

    /// Stops executing: queued and future actions are drained, not run.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl Scheduler for EventLoopScheduler {
    fn schedule(&self, action: Action) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Msg::Run(action)).is_err() {
            let _ = self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn schedule_after(&self, delay: Duration, action: Action) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.pending.fetch_add(1, Ordering::AcqRel);
        let msg = Msg::RunAfter(
            Instant::now() + delay,
            self.seq.fetch_add(1, Ordering::AcqRel) as u64,
            action,
        );
        if self.tx.send(msg).is_err() {
            let _ = self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn now(&self) -> Duration {
        clock_now()
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    fn is_order_guaranteed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_run_in_submission_order() {
        let scheduler = EventLoopScheduler::new("test-loop");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..16 {
            let order = order.clone();
            scheduler.schedule(Box::new(move || order.lock().push(i)));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while !scheduler.is_idle() {
            assert!(Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert_eq!(*order.lock(), (0..16).collect::<Vec<_>>());
    }
}
