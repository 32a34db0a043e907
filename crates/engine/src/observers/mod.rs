// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Observers that decouple ingress from downstream readiness.
//!
//! - [`buffered::BackpressureBufferedObserver`]: bounded queue, blocking the
//!   producer with a pending ack when full
//! - [`evicting::EvictingBufferedObserver`]: bounded queue overwriting the
//!   oldest entry, never blocking the producer
//! - [`connectable::ConnectableObserver`]: buffers everything until
//!   `connect()`

pub mod buffered;
pub mod connectable;
pub mod evicting;
