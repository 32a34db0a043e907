// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Where work runs.
//!
//! Operators never recurse through the graph across scheduler boundaries:
//! any callback that could otherwise grow the stack is submitted through
//! [`Scheduler::schedule`]. The [`ExecutionModel`] is the budget policy that
//! caps synchronous hot loops (the multicast fast loop, the observe-on
//! drainer, repeat-first re-emission).

use crate::config::ExecutionModelConfig;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

pub mod event_loop;
pub mod thread_pool;
pub mod trampoline;

/// A unit of work submitted to a scheduler.
pub type Action = Box<dyn FnOnce() + Send>;

/// Executes actions, possibly deferred, possibly on other threads.
pub trait Scheduler: Send + Sync {
    /// Submits an action for execution.
    fn schedule(&self, action: Action);

    /// Submits an action to run after `delay`.
    fn schedule_after(&self, delay: Duration, action: Action);

    /// The scheduler's clock, as elapsed time on its own time base.
    fn now(&self) -> Duration;

    /// Returns `true` when no submitted action is queued or running.
    fn is_idle(&self) -> bool;

    /// Whether actions run in submission order.
    ///
    /// Operators relying on order (observe-on, the subject fast loop) must
    /// only be given schedulers answering `true`.
    fn is_order_guaranteed(&self) -> bool;

    /// The synchronous-loop budget for operators running on this scheduler.
    fn execution_model(&self) -> ExecutionModel {
        ExecutionModel::default()
    }
}

/// Shared handle to a scheduler.
pub type SchedulerRef = std::sync::Arc<dyn Scheduler>;

/// Budget policy governing synchronous loop length.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionModel {
    batch_size: usize,
}

impl Default for ExecutionModel {
    fn default() -> Self {
        ExecutionModel::from_config(&ExecutionModelConfig::default())
    }
}

impl ExecutionModel {
    /// A model allowing `batch_size` synchronous frames per slice.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        ExecutionModel {
            batch_size: batch_size.max(1),
        }
    }

    /// Builds the model from its config.
    #[must_use]
    pub fn from_config(config: &ExecutionModelConfig) -> Self {
        ExecutionModel::new(config.batch_size)
    }

    /// Advances the synchronous frame counter.
    ///
    /// Returns `> 0` (the next counter) while the loop may keep spinning
    /// synchronously, `0` when it must reschedule, and `< 0` when it must
    /// stop cooperatively (a negative input marks a stopped loop).
    #[must_use]
    pub fn next_frame_index(&self, sync_index: i64) -> i64 {
        if sync_index < 0 {
            return -1;
        }
        (sync_index + 1) % self.batch_size as i64
    }
}

/// Elapsed time since the first clock access of this process.
///
/// All wall-clock schedulers share this time base; the virtual-time test
/// scheduler keeps its own.
#[must_use]
pub fn clock_now() -> Duration {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_frame_index_spins_then_reschedules() {
        let em = ExecutionModel::new(3);
        assert_eq!(em.next_frame_index(0), 1);
        assert_eq!(em.next_frame_index(1), 2);
        assert_eq!(em.next_frame_index(2), 0);
    }

    #[test]
    fn test_next_frame_index_stays_stopped() {
        let em = ExecutionModel::new(3);
        assert_eq!(em.next_frame_index(-1), -1);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let em = ExecutionModel::new(0);
        assert_eq!(em.next_frame_index(0), 0);
    }
}
