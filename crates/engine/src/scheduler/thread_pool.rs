// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Thread-pool scheduler.
//!
//! A fixed set of workers drains a shared run queue. Action order is
//! guaranteed only for a single-worker pool; operators relying on order must
//! be given such a pool. Once disposed, the pool drains its queue without
//! executing the remaining actions.

use super::{clock_now, Action, ExecutionModel, Scheduler};
use crate::config::ThreadPoolConfig;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct TimedAction {
    at: Instant,
    seq: u64,
    action: Action,
}

impl PartialEq for TimedAction {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimedAction {}

impl PartialOrd for TimedAction {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedAction {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Inverted so the binary heap pops the earliest deadline first.
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

/// A parallel worker-pool scheduler.
pub struct ThreadPoolScheduler {
    tx: flume::Sender<Action>,
    timer_tx: flume::Sender<TimedAction>,
    pending: Arc<AtomicUsize>,
    disposed: Arc<AtomicBool>,
    workers: usize,
    execution_model: ExecutionModel,
    timer_seq: AtomicUsize,
}

impl ThreadPoolScheduler {
    /// Starts the pool described by `config`.
    #[must_use]
    pub fn new(config: ThreadPoolConfig) -> Self {
        let workers = config.workers.max(1);
        let name = config.name.clone().unwrap_or_else(|| "ackflow-pool".to_owned());
        let (tx, rx) = flume::unbounded::<Action>();
        let (timer_tx, timer_rx) = flume::unbounded::<TimedAction>();
        let pending = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicBool::new(false));

        for index in 0..workers {
            let rx = rx.clone();
            let pending = pending.clone();
            let disposed = disposed.clone();
            let builder = std::thread::Builder::new().name(format!("{name}-{index}"));
            let spawned = builder.spawn(move || {
                while let Ok(action) = rx.recv() {
                    if !disposed.load(Ordering::Acquire) {
                        action();
                    }
                    let _ = pending.fetch_sub(1, Ordering::AcqRel);
                }
            });
            drop(spawned);
        }

        {
            let tx = tx.clone();
            let builder = std::thread::Builder::new().name(format!("{name}-timer"));
            let spawned = builder.spawn(move || {
                let mut heap: BinaryHeap<TimedAction> = BinaryHeap::new();
                loop {
                    let received = match heap.peek() {
                        Some(next) => match timer_rx.recv_deadline(next.at) {
                            Ok(timed) => Some(timed),
                            Err(flume::RecvTimeoutError::Timeout) => None,
                            Err(flume::RecvTimeoutError::Disconnected) => break,
                        },
                        None => match timer_rx.recv() {
                            Ok(timed) => Some(timed),
                            Err(_) => break,
                        },
                    };
                    if let Some(timed) = received {
                        heap.push(timed);
                    }
                    let now = Instant::now();
                    while heap.peek().is_some_and(|next| next.at <= now) {
                        if let Some(due) = heap.pop() {
                            let _ = tx.send(due.action);
                        }
                    }
                }
            });
            drop(spawned);
        }

        ThreadPoolScheduler {
            tx,
            timer_tx,
            pending,
            disposed,
            workers,
            execution_model: ExecutionModel::from_config(&config.execution_model),
            timer_seq: AtomicUsize::new(0),
        }
    }

    /// Stops executing: queued and future actions are drained, not run.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Returns `true` once the pool has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn schedule(&self, action: Action) {
        if self.is_disposed() {
            return;
        }
        let _ = self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(action).is_err() {
            let _ = self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn schedule_after(&self, delay: Duration, action: Action) {
        if self.is_disposed() {
            return;
        }
        let _ = self.pending.fetch_add(1, Ordering::AcqRel);
        let timed = TimedAction {
            at: Instant::now() + delay,
            seq: self.timer_seq.fetch_add(1, Ordering::AcqRel) as u64,
            action,
        };
        if self.timer_tx.send(timed).is_err() {
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
        self.workers == 1
    }

    fn execution_model(&self) -> ExecutionModel {
        self.execution_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_idle(pool: &ThreadPoolScheduler) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !pool.is_idle() {
            assert!(Instant::now() < deadline, "pool did not become idle");
            std::thread::yield_now();
        }
    }

    #[test]
    fn test_single_worker_preserves_order() {
        let pool = ThreadPoolScheduler::new(ThreadPoolConfig::single_worker());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..32 {
            let order = order.clone();
            pool.schedule(Box::new(move || order.lock().push(i)));
        }
        wait_idle(&pool);

        assert!(pool.is_order_guaranteed());
        assert_eq!(*order.lock(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_schedule_after_runs_later() {
        let pool = ThreadPoolScheduler::new(ThreadPoolConfig::single_worker());
        let hit = Arc::new(AtomicBool::new(false));

        let h = hit.clone();
        pool.schedule_after(
            Duration::from_millis(20),
            Box::new(move || h.store(true, Ordering::SeqCst)),
        );
        assert!(!hit.load(Ordering::SeqCst));
        wait_idle(&pool);
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_disposed_pool_drains_without_executing() {
        let pool = ThreadPoolScheduler::new(ThreadPoolConfig::single_worker());
        pool.dispose();

        let hit = Arc::new(AtomicBool::new(false));
        let h = hit.clone();
        pool.schedule(Box::new(move || h.store(true, Ordering::SeqCst)));

        std::thread::sleep(Duration::from_millis(20));
        assert!(!hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_multi_worker_pool_reports_unordered() {
        let config = ThreadPoolConfig {
            workers: 4,
            ..ThreadPoolConfig::default()
        };
        let pool = ThreadPoolScheduler::new(config);
        assert!(!pool.is_order_guaranteed());
    }
}
