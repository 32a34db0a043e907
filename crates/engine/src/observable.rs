// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The observable side of the push contract.

use crate::disposable::Disposable;
use crate::observer::ObserverInfo;
use std::sync::Arc;

/// A source of element batches.
///
/// `observe` installs an observer atop this source and starts the data flow.
/// Subscription flows leaf-to-root: each operator installs its own observer
/// on its immediate upstream while handling `observe`.
pub trait Observable<T>: Send + Sync {
    /// Installs `info.observer` and returns the disposable tearing the
    /// subscription down.
    fn observe(&self, info: ObserverInfo<T>) -> Disposable;
}

/// Shared handle to an observable.
pub type ObservableRef<T> = Arc<dyn Observable<T>>;
