// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! A recording observer with scripted acknowledgements.

use crate::batch::Batch;
use crate::error::FlowError;
use crate::observer::{Observer, ObserverRef};
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

enum AckScript {
    /// Always answer `Continue`.
    Immediate,
    /// Answer `Continue` for the first `left` batches, then hold pending
    /// acks until the test releases them.
    ImmediateThenHold {
        /// Remaining immediate continues.
        left: usize,
    },
    /// Always answer `Stop`.
    Stopping,
}

struct TestObserverInner<T> {
    received: Mutex<Vec<T>>,
    batches: Mutex<Vec<usize>>,
    completed: AtomicBool,
    error: Mutex<Option<FlowError>>,
    script: Mutex<AckScript>,
    held: Mutex<VecDeque<AckCell>>,
}

/// Test observer recording elements, terminal events and ack traffic.
pub struct TestObserver<T> {
    inner: Arc<TestObserverInner<T>>,
}

impl<T> Clone for TestObserver<T> {
    fn clone(&self) -> Self {
        TestObserver {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TestObserver<T> {
    fn with_script(script: AckScript) -> Self {
        TestObserver {
            inner: Arc::new(TestObserverInner {
                received: Mutex::new(Vec::new()),
                batches: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
                error: Mutex::new(None),
                script: Mutex::new(script),
                held: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// An observer that always answers `Continue`.
    #[must_use]
    pub fn immediate() -> Self {
        Self::with_script(AckScript::Immediate)
    }

    /// An observer answering `Continue` for the first `n` batches and holding
    /// a pending ack for every batch after that.
    #[must_use]
    pub fn immediate_continue(n: usize) -> Self {
        Self::with_script(AckScript::ImmediateThenHold { left: n })
    }

    /// An observer that holds every ack until released.
    #[must_use]
    pub fn holding() -> Self {
        Self::immediate_continue(0)
    }

    /// An observer that answers `Stop` to every batch.
    #[must_use]
    pub fn stopping() -> Self {
        Self::with_script(AckScript::Stopping)
    }

    /// The observer handle to install in a pipeline.
    #[must_use]
    pub fn observer(&self) -> ObserverRef<T> {
        Arc::new(self.clone())
    }

    /// Every element received so far, flattened across batches.
    #[must_use]
    pub fn received(&self) -> Vec<T> {
        self.inner.received.lock().clone()
    }

    /// The sizes of the batches received so far.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.batches.lock().clone()
    }

    /// Whether `on_completed` has been observed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// The error observed through `on_error`, if any.
    #[must_use]
    pub fn error(&self) -> Option<FlowError> {
        self.inner.error.lock().clone()
    }

    /// Number of acks currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.inner.held.lock().len()
    }

    /// Releases the oldest held ack with `Continue`. Returns `false` when no
    /// ack is held.
    pub fn ack_continue(&self) -> bool {
        self.release(AckKind::Continue)
    }

    /// Releases the oldest held ack with `Stop`.
    pub fn ack_stop(&self) -> bool {
        self.release(AckKind::Stop)
    }

    fn release(&self, kind: AckKind) -> bool {
        let cell = self.inner.held.lock().pop_front();
        match cell {
            Some(cell) => {
                let _ = cell.resolve(kind);
                true
            }
            None => false,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observer<T> for TestObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let values = match batch.try_materialize() {
            Ok(values) => values,
            Err(error) => {
                *self.inner.error.lock() = Some(error);
                return Ack::Stop;
            }
        };
        self.inner.batches.lock().push(values.len());
        self.inner.received.lock().extend(values);

        let mut script = self.inner.script.lock();
        match &mut *script {
            AckScript::Immediate => Ack::Continue,
            AckScript::Stopping => Ack::Stop,
            AckScript::ImmediateThenHold { left } => {
                if *left > 0 {
                    *left -= 1;
                    Ack::Continue
                } else {
                    let (ack, cell) = Ack::pending();
                    self.inner.held.lock().push_back(cell);
                    ack
                }
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        *self.inner.error.lock() = Some(error);
    }

    fn on_completed(&self) {
        self.inner.completed.store(true, Ordering::Release);
    }
}
