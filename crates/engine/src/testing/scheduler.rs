// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Virtual-time scheduler.
//!
//! Nothing runs until the test advances the clock; `now()` reflects the
//! virtual clock. All timed primitives in the runtime route through the
//! scheduler abstraction, so pipelines under test are fully deterministic.

use crate::scheduler::{Action, Scheduler};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Entry {
    at: Duration,
    seq: u64,
    action: Action,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

struct TestSchedulerInner {
    queue: Mutex<BinaryHeap<Entry>>,
    now: Mutex<Duration>,
    seq: AtomicU64,
}

/// A scheduler that advances only under explicit [`TestScheduler::advance_by`].
#[derive(Clone)]
pub struct TestScheduler {
    inner: Arc<TestSchedulerInner>,
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TestScheduler {
    /// Creates a scheduler at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        TestScheduler {
            inner: Arc::new(TestSchedulerInner {
                queue: Mutex::new(BinaryHeap::new()),
                now: Mutex::new(Duration::ZERO),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Advances the clock by `delta`, running every action due on the way in
    /// deadline order. Actions scheduled while advancing run too if they fall
    /// within the window.
    pub fn advance_by(&self, delta: Duration) {
        let target = *self.inner.now.lock() + delta;
        loop {
            let due = {
                let mut queue = self.inner.queue.lock();
                match queue.peek() {
                    Some(entry) if entry.at <= target => queue.pop(),
                    _ => None,
                }
            };
            match due {
                Some(entry) => {
                    *self.inner.now.lock() = entry.at;
                    (entry.action)();
                }
                None => break,
            }
        }
        *self.inner.now.lock() = target;
    }

    /// Runs everything due at the current virtual time.
    pub fn tick(&self) {
        self.advance_by(Duration::ZERO);
    }
}

impl Scheduler for TestScheduler {
    fn schedule(&self, action: Action) {
        let at = *self.inner.now.lock();
        self.inner.queue.lock().push(Entry {
            at,
            seq: self.inner.seq.fetch_add(1, Ordering::AcqRel),
            action,
        });
    }

    fn schedule_after(&self, delay: Duration, action: Action) {
        let at = *self.inner.now.lock() + delay;
        self.inner.queue.lock().push(Entry {
            at,
            seq: self.inner.seq.fetch_add(1, Ordering::AcqRel),
            action,
        });
    }

    fn now(&self) -> Duration {
        *self.inner.now.lock()
    }

    fn is_idle(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    fn is_order_guaranteed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_nothing_runs_before_advance() {
        let scheduler = TestScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        scheduler.schedule(Box::new(move || {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        scheduler.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timed_actions_run_in_deadline_order() {
        let scheduler = TestScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        scheduler.schedule_after(Duration::from_secs(2), Box::new(move || o.lock().push(2)));
        let o = order.clone();
        scheduler.schedule_after(Duration::from_secs(1), Box::new(move || o.lock().push(1)));

        scheduler.advance_by(Duration::from_secs(3));
        assert_eq!(*order.lock(), vec![1, 2]);
        assert_eq!(scheduler.now(), Duration::from_secs(3));
    }
}
