// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Single-assignment acknowledgement cell.
//!
//! An [`AckCell`] is a one-shot, single-value channel: it is resolved at most
//! once with an [`AckKind`], and every callback subscribed to it observes that
//! resolution exactly once. Callbacks subscribed after resolution run
//! immediately on the subscribing thread; callbacks subscribed before run on
//! the resolving thread. Callbacks are always invoked outside the cell lock.

use crate::ack::AckKind;
use crate::error::AckError;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

type Callback = Box<dyn FnOnce(AckKind) + Send>;

#[allow(variant_size_differences)]
enum CellState {
    Unresolved(SmallVec<[Callback; 2]>),
    Resolved(AckKind),
}

/// A one-shot acknowledgement cell.
///
/// Clones share the same underlying cell.
#[derive(Clone)]
pub struct AckCell {
    state: Arc<Mutex<CellState>>,
}

impl Default for AckCell {
    fn default() -> Self {
        Self::new()
    }
}

impl AckCell {
    /// Creates a new, unresolved cell.
    #[must_use]
    pub fn new() -> Self {
        AckCell {
            state: Arc::new(Mutex::new(CellState::Unresolved(SmallVec::new()))),
        }
    }

    /// Resolves the cell, delivering `kind` to every subscribed callback.
    ///
    /// # Errors
    ///
    /// Returns [`AckError::AlreadyResolved`] if the cell carries a resolution
    /// already; the second resolution is not applied.
    pub fn resolve(&self, kind: AckKind) -> Result<(), AckError> {
        let callbacks = {
            let mut state = self.state.lock();
            match &mut *state {
                CellState::Resolved(existing) => {
                    return Err(AckError::AlreadyResolved {
                        existing: *existing,
                    });
                }
                CellState::Unresolved(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = CellState::Resolved(kind);
                    callbacks
                }
            }
        };

        for callback in callbacks {
            callback(kind);
        }
        Ok(())
    }

    /// Resolves the cell if it is still unresolved.
    ///
    /// Unlike [`AckCell::resolve`], losing a resolution race is not an error.
    /// Combinators that own the cell and feed it from several sources (e.g.
    /// [`crate::ops::race`]) use this entry point. Returns `true` if this call
    /// performed the resolution.
    pub fn offer(&self, kind: AckKind) -> bool {
        self.resolve(kind).is_ok()
    }

    /// Subscribes a callback to the resolution.
    ///
    /// If the cell is already resolved the callback runs immediately on the
    /// calling thread.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce(AckKind) + Send + 'static,
    {
        let resolved = {
            let mut state = self.state.lock();
            match &mut *state {
                CellState::Resolved(kind) => Some(*kind),
                CellState::Unresolved(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        if let Some(kind) = resolved {
            callback(kind);
        }
    }

    /// Returns the resolution, if any.
    #[must_use]
    pub fn value(&self) -> Option<AckKind> {
        match &*self.state.lock() {
            CellState::Resolved(kind) => Some(*kind),
            CellState::Unresolved(_) => None,
        }
    }

    /// Returns `true` once the cell carries a resolution.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.value().is_some()
    }
}

impl std::fmt::Debug for AckCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckCell").field("value", &self.value()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_before_resolve() {
        let cell = AckCell::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        cell.subscribe(move |kind| {
            assert_eq!(kind, AckKind::Continue);
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        cell.resolve(AckKind::Continue).expect("first resolution");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_after_resolve_runs_immediately() {
        let cell = AckCell::new();
        cell.resolve(AckKind::Stop).expect("first resolution");

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        cell.subscribe(move |kind| {
            assert_eq!(kind, AckKind::Stop);
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_resolve_is_rejected() {
        let cell = AckCell::new();
        cell.resolve(AckKind::Continue).expect("first resolution");

        let err = cell.resolve(AckKind::Stop).expect_err("second resolution");
        assert_eq!(
            err,
            AckError::AlreadyResolved {
                existing: AckKind::Continue
            }
        );
        assert_eq!(cell.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_offer_loses_race_silently() {
        let cell = AckCell::new();
        assert!(cell.offer(AckKind::Continue));
        assert!(!cell.offer(AckKind::Stop));
        assert_eq!(cell.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_resolution_crosses_threads() {
        let cell = AckCell::new();
        let clone = cell.clone();

        let handle = std::thread::spawn(move || {
            clone.resolve(AckKind::Continue).expect("resolution");
        });
        handle.join().expect("resolver thread");

        assert_eq!(cell.value(), Some(AckKind::Continue));
    }
}
