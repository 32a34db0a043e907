// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic tap.
//!
//! Forwards everything unchanged while reporting subscription, batch and ack
//! traffic on the tracing debug channel, with optional user callbacks.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::{Ack, AckKind};
use std::sync::Arc;

/// Callback invoked with every batch passing the tap.
pub type OnNextHook<T> = Arc<dyn Fn(&[T]) + Send + Sync>;
/// Callback invoked when the tap is subscribed.
pub type OnSubscribeHook = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked with every ack resolution passing the tap.
pub type OnAckHook = Arc<dyn Fn(AckKind) + Send + Sync>;

/// Pass-through operator logging the traffic of one pipeline edge.
pub struct DebugObservable<T> {
    source: ObservableRef<T>,
    name: Arc<str>,
    on_next: Option<OnNextHook<T>>,
    on_subscribe: Option<OnSubscribeHook>,
    on_ack: Option<OnAckHook>,
}

impl<T> DebugObservable<T> {
    /// Creates the tap with a name and optional hooks.
    #[must_use]
    pub fn new(
        source: ObservableRef<T>,
        name: &str,
        on_next: Option<OnNextHook<T>>,
        on_subscribe: Option<OnSubscribeHook>,
        on_ack: Option<OnAckHook>,
    ) -> Self {
        DebugObservable {
            source,
            name: Arc::from(name),
            on_next,
            on_subscribe,
            on_ack,
        }
    }
}

impl<T: Send + Sync + 'static> Observable<T> for DebugObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        tracing::debug!(name = %self.name, "subscribe");
        if let Some(hook) = &self.on_subscribe {
            hook();
        }
        let observer = DebugObserver {
            downstream: info.observer.clone(),
            name: self.name.clone(),
            on_next: self.on_next.clone(),
            on_ack: self.on_ack.clone(),
        };
        self.source.observe(info.with_observer(Arc::new(observer)))
    }
}

struct DebugObserver<T> {
    downstream: Arc<dyn Observer<T>>,
    name: Arc<str>,
    on_next: Option<OnNextHook<T>>,
    on_ack: Option<OnAckHook>,
}

impl<T: Send + Sync + 'static> Observer<T> for DebugObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let values = match batch.try_materialize() {
            Ok(values) => values,
            Err(error) => {
                tracing::debug!(name = %self.name, %error, "on_next failed to materialize");
                self.downstream.on_error(error);
                return Ack::Stop;
            }
        };
        tracing::debug!(name = %self.name, len = values.len(), "on_next");
        if let Some(hook) = &self.on_next {
            hook(&values);
        }

        let ack = self.downstream.on_next(Batch::from_vec(values));
        let name = self.name.clone();
        let on_ack = self.on_ack.clone();
        ack.subscribe(move |kind| {
            tracing::debug!(name = %name, ?kind, "ack");
            if let Some(hook) = on_ack {
                hook(kind);
            }
        });
        ack
    }

    fn on_error(&self, error: FlowError) {
        tracing::debug!(name = %self.name, %error, "on_error");
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        tracing::debug!(name = %self.name, "on_completed");
        self.downstream.on_completed();
    }
}
