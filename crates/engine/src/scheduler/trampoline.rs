// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Current-thread trampolined scheduler.
//!
//! Actions submitted while another action is running on the same thread are
//! queued and drained in FIFO order after the current action returns, so
//! re-entrant submission never grows the stack. The queue is per thread; all
//! trampoline instances on one thread share it.

use super::{clock_now, Action, Scheduler};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

struct TrampolineState {
    queue: VecDeque<Action>,
    running: bool,
}

thread_local! {
    static TRAMPOLINE: RefCell<TrampolineState> = RefCell::new(TrampolineState {
        queue: VecDeque::new(),
        running: false,
    });
}

/// The current-thread trampolined scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrampolineScheduler;

impl TrampolineScheduler {
    /// Creates a trampoline handle for the calling thread's queue.
    #[must_use]
    pub fn new() -> Self {
        TrampolineScheduler
    }
}

impl Scheduler for TrampolineScheduler {
    fn schedule(&self, action: Action) {
        let entered = TRAMPOLINE.with(|state| {
            let mut state = state.borrow_mut();
            if state.running {
                state.queue.push_back(action);
                None
            } else {
                state.running = true;
                Some(action)
            }
        });

        let Some(action) = entered else {
            return;
        };

        action();
        loop {
            let next = TRAMPOLINE.with(|state| {
                let mut state = state.borrow_mut();
                let next = state.queue.pop_front();
                if next.is_none() {
                    state.running = false;
                }
                next
            });
            match next {
                Some(action) => action(),
                None => break,
            }
        }
    }

    fn schedule_after(&self, delay: Duration, action: Action) {
        // The trampoline owns the calling thread; a timed submission blocks
        // it. Timed tests use the virtual-time scheduler instead.
        std::thread::sleep(delay);
        self.schedule(action);
    }

    fn now(&self) -> Duration {
        clock_now()
    }

    fn is_idle(&self) -> bool {
        TRAMPOLINE.with(|state| {
            let state = state.borrow();
            !state.running && state.queue.is_empty()
        })
    }

    fn is_order_guaranteed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_reentrant_submissions_run_fifo_after_current() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let scheduler = TrampolineScheduler::new();

        let o = order.clone();
        scheduler.schedule(Box::new(move || {
            o.lock().push(1);
            let inner = TrampolineScheduler::new();
            let o2 = o.clone();
            inner.schedule(Box::new(move || o2.lock().push(3)));
            // The re-entrant action must not have run yet.
            o.lock().push(2);
        }));

        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_deep_resubmission_does_not_grow_stack() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = TrampolineScheduler::new();

        fn submit(scheduler: TrampolineScheduler, count: Arc<AtomicUsize>, left: usize) {
            if left == 0 {
                return;
            }
            scheduler.schedule(Box::new(move || {
                let _ = count.fetch_add(1, Ordering::SeqCst);
                submit(scheduler, count, left - 1);
            }));
        }

        submit(scheduler, count.clone(), 100_000);
        assert_eq!(count.load(Ordering::SeqCst), 100_000);
    }
}
