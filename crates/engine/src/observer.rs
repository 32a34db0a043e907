// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The observer side of the push contract.
//!
//! Calls on an observer are serialized: after a terminal event (`on_error` or
//! `on_completed`) no further call is made, and after `on_next` returned a
//! pending ack the upstream must not call `on_next` again until that ack
//! resolves.

use crate::batch::Batch;
use crate::error::FlowError;
use ackflow_ack::Ack;
use std::sync::Arc;

/// A consumer of element batches.
pub trait Observer<T>: Send + Sync {
    /// Pushes one batch; the returned ack releases (or stops) the next push.
    fn on_next(&self, batch: Batch<T>) -> Ack;

    /// Terminal failure notification.
    fn on_error(&self, error: FlowError);

    /// Terminal completion notification.
    fn on_completed(&self);
}

/// Shared handle to an observer.
pub type ObserverRef<T> = Arc<dyn Observer<T>>;

/// The observer handle passed through the subscription handshake.
///
/// `is_volatile` marks observers that consume a snapshot of the stream (e.g.
/// selector consumers); volatile observers do not take part in the disposal
/// propagation of the observing parent.
pub struct ObserverInfo<T> {
    /// The observer to install.
    pub observer: ObserverRef<T>,
    /// Whether the observer is a volatile (snapshot) consumer.
    pub is_volatile: bool,
}

impl<T> Clone for ObserverInfo<T> {
    fn clone(&self) -> Self {
        ObserverInfo {
            observer: self.observer.clone(),
            is_volatile: self.is_volatile,
        }
    }
}

impl<T> ObserverInfo<T> {
    /// Wraps an observer with the default (non-volatile) flags.
    #[must_use]
    pub fn new(observer: ObserverRef<T>) -> Self {
        ObserverInfo {
            observer,
            is_volatile: false,
        }
    }

    /// Replaces the observer, keeping the flags.
    ///
    /// Operators installing their own observer atop the upstream use this so
    /// the volatility of the downstream subscription is preserved through the
    /// chain.
    #[must_use]
    pub fn with_observer<U>(&self, observer: ObserverRef<U>) -> ObserverInfo<U> {
        ObserverInfo {
            observer,
            is_volatile: self.is_volatile,
        }
    }

    /// Marks the observer as volatile.
    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.is_volatile = true;
        self
    }
}

/// An observer assembled from closures.
pub struct AnonymousObserver<T> {
    on_next: Box<dyn Fn(Batch<T>) -> Ack + Send + Sync>,
    on_error: Box<dyn Fn(FlowError) + Send + Sync>,
    on_completed: Box<dyn Fn() + Send + Sync>,
}

impl<T> AnonymousObserver<T> {
    /// Creates an observer from the three capability closures.
    pub fn new<N, E, C>(on_next: N, on_error: E, on_completed: C) -> Self
    where
        N: Fn(Batch<T>) -> Ack + Send + Sync + 'static,
        E: Fn(FlowError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        AnonymousObserver {
            on_next: Box::new(on_next),
            on_error: Box::new(on_error),
            on_completed: Box::new(on_completed),
        }
    }
}

impl<T: Send> Observer<T> for AnonymousObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        (self.on_next)(batch)
    }

    fn on_error(&self, error: FlowError) {
        (self.on_error)(error);
    }

    fn on_completed(&self) {
        (self.on_completed)();
    }
}
