// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Push-based reactive streams runtime with explicit, asynchronous
//! back-pressure.
//!
//! A producer pushes discrete element [`batch::Batch`]es through a pipeline
//! of operators; the consumer controls flow by resolving an
//! [`ackflow_ack::Ack`] for every batch it receives. Unlike demand-based
//! reactive streams, flow control is an ack-reply per emission; unlike pull
//! iterators, suspension happens on the producer side whenever an ack is not
//! yet available.
//!
//! The crate is organized bottom-up:
//!
//! - [`batch`], [`observer`], [`observable`], [`disposable`]: the push
//!   contract and teardown primitives
//! - [`scheduler`]: where work runs (trampoline, thread pool, event loop)
//!   and the execution-model budget for synchronous hot loops
//! - [`operators`]: the operator state machines
//! - [`observers`]: buffered, evicting and connectable observers
//! - [`subject`]: multicast subjects, including the cached-serve-first
//!   subject
//! - [`flowable`]: the fluent composition surface and subscription
//!   handshake
//! - [`iterate`] and [`stream`]: blocking and `futures`-stream consumption
//! - [`testing`]: recording observers, scripted sources and virtual time

pub mod batch;
pub mod config;
pub mod disposable;
pub mod error;
pub mod flowable;
pub mod iterate;
pub mod observable;
pub mod observer;
pub mod observers;
pub mod operators;
pub mod scheduler;
pub mod sources;
pub mod stream;
pub mod subject;
pub mod subscriber;
pub mod subscription;
pub mod testing;

pub use ackflow_ack::{ops as ack_ops, Ack, AckCell, AckKind};
pub use batch::Batch;
pub use disposable::Disposable;
pub use error::{Error, FlowError};
pub use flowable::{range, Flowable, FlowableSource};
pub use observable::{Observable, ObservableRef};
pub use observer::{Observer, ObserverInfo, ObserverRef};
pub use scheduler::{Scheduler, SchedulerRef};
pub use subscriber::Subscriber;
pub use subscription::{Base, BaseAndSelectors, FlowSubscription};
