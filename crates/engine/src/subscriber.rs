// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Subscription-time context.

use crate::scheduler::trampoline::TrampolineScheduler;
use crate::scheduler::SchedulerRef;
use std::sync::Arc;

/// The two schedulers a subscription runs with.
///
/// Subscription-time actions (source emission loops, connect calls) run on
/// `subscribe_scheduler`; operator callbacks that must hop off the producer
/// run on `scheduler`.
#[derive(Clone)]
pub struct Subscriber {
    /// The downstream scheduler.
    pub scheduler: SchedulerRef,
    /// The scheduler subscription-time actions are submitted to.
    pub subscribe_scheduler: SchedulerRef,
}

impl Subscriber {
    /// Creates a subscriber from both schedulers.
    #[must_use]
    pub fn new(scheduler: SchedulerRef, subscribe_scheduler: SchedulerRef) -> Self {
        Subscriber {
            scheduler,
            subscribe_scheduler,
        }
    }

    /// A subscriber running everything on the current-thread trampoline.
    #[must_use]
    pub fn trampoline() -> Self {
        let scheduler: SchedulerRef = Arc::new(TrampolineScheduler::new());
        Subscriber {
            scheduler: scheduler.clone(),
            subscribe_scheduler: scheduler,
        }
    }
}
