// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Element batches, the unit of `on_next`.
//!
//! A [`Batch`] is a lazy finite sequence of zero or more elements, produced on
//! demand at most once. One batch corresponds to exactly one acknowledgement.
//! Lazy batches keep user transformations (map, scan) deferred until a
//! downstream operator materializes the elements; panics inside those
//! transformations surface at the materialization boundary as
//! [`FlowError::User`].

use crate::error::FlowError;
use std::panic::AssertUnwindSafe;

/// Iterator over the elements of a batch.
pub type BatchIter<T> = Box<dyn Iterator<Item = T> + Send>;

enum Repr<T> {
    Values(Vec<T>),
    Thunk(Box<dyn FnOnce() -> BatchIter<T> + Send>),
}

/// A lazy finite sequence of elements delivered in a single `on_next` call.
pub struct Batch<T> {
    repr: Repr<T>,
}

impl<T: Send + 'static> Batch<T> {
    /// A batch with no elements.
    #[must_use]
    pub fn empty() -> Self {
        Batch {
            repr: Repr::Values(Vec::new()),
        }
    }

    /// A batch with a single element.
    #[must_use]
    pub fn single(value: T) -> Self {
        Batch {
            repr: Repr::Values(vec![value]),
        }
    }

    /// A batch over already materialized values.
    #[must_use]
    pub fn from_vec(values: Vec<T>) -> Self {
        Batch {
            repr: Repr::Values(values),
        }
    }

    /// A lazy batch; `thunk` runs at most once, when the batch is consumed.
    #[must_use]
    pub fn from_fn<F>(thunk: F) -> Self
    where
        F: FnOnce() -> BatchIter<T> + Send + 'static,
    {
        Batch {
            repr: Repr::Thunk(Box::new(thunk)),
        }
    }

    /// Consumes the batch, yielding its elements.
    #[must_use]
    pub fn into_elements(self) -> BatchIter<T> {
        match self.repr {
            Repr::Values(values) => Box::new(values.into_iter()),
            Repr::Thunk(thunk) => thunk(),
        }
    }

    /// Materializes the batch into a vector.
    ///
    /// Panics inside a lazy batch (i.e. inside a user transformation) are
    /// propagated; operators that must convert them into `on_error` use
    /// [`Batch::try_materialize`].
    #[must_use]
    pub fn materialize(self) -> Vec<T> {
        self.into_elements().collect()
    }

    /// Materializes the batch, converting a panic inside a user
    /// transformation into [`FlowError::User`].
    pub fn try_materialize(self) -> Result<Vec<T>, FlowError> {
        std::panic::catch_unwind(AssertUnwindSafe(|| self.materialize()))
            .map_err(FlowError::from_panic)
    }

    /// Lazily maps every element of the batch.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Batch<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        Batch::from_fn(move || Box::new(self.into_elements().map(f)) as BatchIter<U>)
    }

    /// Lazily filters the elements of the batch.
    #[must_use]
    pub fn filter<F>(self, pred: F) -> Batch<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Batch::from_fn(move || Box::new(self.into_elements().filter(pred)) as BatchIter<T>)
    }
}

impl<T: Send + 'static> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = BatchIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_elements()
    }
}

impl<T: Send + 'static> From<Vec<T>> for Batch<T> {
    fn from(values: Vec<T>) -> Self {
        Batch::from_vec(values)
    }
}

impl<T> std::fmt::Debug for Batch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::Values(values) => write!(f, "Batch::Values(len={})", values.len()),
            Repr::Thunk(_) => write!(f, "Batch::Thunk"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_batch_runs_once_on_demand() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let batch = Batch::from_fn(move || {
            let _ = r.fetch_add(1, Ordering::SeqCst);
            Box::new(0i64..3) as BatchIter<i64>
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(batch.materialize(), vec![0, 1, 2]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_map_is_deferred() {
        let batch = Batch::from_vec(vec![1, 2, 3]).map(|x| x * 10);
        assert_eq!(batch.materialize(), vec![10, 20, 30]);
    }

    #[test]
    fn test_panic_in_user_transformation_becomes_user_error() {
        let batch = Batch::from_vec(vec![1, 2]).map(|x: i64| {
            assert!(x < 2, "boom");
            x
        });

        let err = batch.try_materialize().expect_err("panic expected");
        assert!(matches!(err, FlowError::User { .. }));
    }
}
