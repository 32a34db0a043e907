// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Subscription teardown primitives.
//!
//! Disposal is idempotent and propagates through composites: disposing a node
//! disposes its descendants. A disposed observer drops further `on_next`
//! calls silently and answers `Stop`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type DisposeAction = Box<dyn FnOnce() + Send>;

struct DisposableInner {
    disposed: AtomicBool,
    action: Mutex<Option<DisposeAction>>,
}

/// An idempotent cancellation handle.
#[derive(Clone)]
pub struct Disposable {
    inner: Arc<DisposableInner>,
}

impl Disposable {
    /// A disposable with a teardown action, run at most once.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Disposable {
            inner: Arc::new(DisposableInner {
                disposed: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// A disposable with no teardown action.
    #[must_use]
    pub fn empty() -> Self {
        Disposable {
            inner: Arc::new(DisposableInner {
                disposed: AtomicBool::new(false),
                action: Mutex::new(None),
            }),
        }
    }

    /// Runs the teardown action if it has not run yet.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let action = self.inner.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Returns `true` once [`Disposable::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

struct CompositeInner {
    disposed: AtomicBool,
    children: Mutex<Vec<Disposable>>,
}

/// Aggregates child disposables; disposing the composite disposes them all.
#[derive(Clone)]
pub struct CompositeDisposable {
    inner: Arc<CompositeInner>,
}

impl Default for CompositeDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeDisposable {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        CompositeDisposable {
            inner: Arc::new(CompositeInner {
                disposed: AtomicBool::new(false),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Adds a child; if the composite is already disposed the child is
    /// disposed immediately.
    pub fn add(&self, child: Disposable) {
        if self.inner.disposed.load(Ordering::Acquire) {
            child.dispose();
            return;
        }
        let mut children = self.inner.children.lock();
        if self.inner.disposed.load(Ordering::Acquire) {
            drop(children);
            child.dispose();
        } else {
            children.push(child);
        }
    }

    /// Disposes every child, in insertion order.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.dispose();
        }
    }

    /// Returns `true` once the composite has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Converts the composite into a plain [`Disposable`].
    #[must_use]
    pub fn into_disposable(self) -> Disposable {
        Disposable::new(move || self.dispose())
    }
}

enum Slot {
    Empty,
    Set(Disposable),
    Disposed,
}

/// A disposable whose inner disposable is attached later, exactly once.
#[derive(Clone)]
pub struct SingleAssignmentDisposable {
    slot: Arc<Mutex<Slot>>,
}

impl Default for SingleAssignmentDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl SingleAssignmentDisposable {
    /// Creates an unassigned slot.
    #[must_use]
    pub fn new() -> Self {
        SingleAssignmentDisposable {
            slot: Arc::new(Mutex::new(Slot::Empty)),
        }
    }

    /// Attaches the inner disposable.
    ///
    /// Attaching to an already disposed slot disposes `child` immediately.
    /// Attaching twice is a contract violation and is reported on the debug
    /// channel; the second disposable is disposed, not stored.
    pub fn set(&self, child: Disposable) {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Empty => {
                *slot = Slot::Set(child);
            }
            Slot::Disposed => {
                drop(slot);
                child.dispose();
            }
            Slot::Set(_) => {
                drop(slot);
                tracing::warn!("single-assignment disposable assigned twice");
                child.dispose();
            }
        }
    }

    /// Disposes the inner disposable, now or as soon as it is attached.
    pub fn dispose(&self) {
        let previous = {
            let mut slot = self.slot.lock();
            std::mem::replace(&mut *slot, Slot::Disposed)
        };
        if let Slot::Set(child) = previous {
            child.dispose();
        }
    }

    /// Converts the slot into a plain [`Disposable`].
    #[must_use]
    pub fn into_disposable(self) -> Disposable {
        Disposable::new(move || self.dispose())
    }
}

/// A plain disposal flag with no action.
#[derive(Clone, Default)]
pub struct BooleanDisposable {
    flag: Arc<AtomicBool>,
}

impl BooleanDisposable {
    /// Creates an undisposed flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag.
    pub fn dispose(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Reads the flag.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispose_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let disposable = Disposable::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });

        disposable.dispose();
        disposable.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(disposable.is_disposed());
    }

    #[test]
    fn test_composite_disposes_children() {
        let count = Arc::new(AtomicUsize::new(0));
        let composite = CompositeDisposable::new();
        for _ in 0..3 {
            let c = count.clone();
            composite.add(Disposable::new(move || {
                let _ = c.fetch_add(1, Ordering::SeqCst);
            }));
        }

        composite.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_composite_add_after_dispose() {
        let composite = CompositeDisposable::new();
        composite.dispose();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        composite.add(Disposable::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_assignment_set_then_dispose() {
        let count = Arc::new(AtomicUsize::new(0));
        let slot = SingleAssignmentDisposable::new();
        let c = count.clone();
        slot.set(Disposable::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        }));

        slot.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_assignment_dispose_then_set() {
        let count = Arc::new(AtomicUsize::new(0));
        let slot = SingleAssignmentDisposable::new();
        slot.dispose();

        let c = count.clone();
        slot.set(Disposable::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
