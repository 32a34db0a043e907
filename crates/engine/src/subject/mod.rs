// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Subjects: observers that are simultaneously observables, used for
//! multicast fan-out.

use crate::error::FlowError;
use std::sync::Arc;

pub mod cached_serve_first;
pub mod dequeuable_buffer;
pub mod publish;

/// A buffered stream event.
#[derive(Debug, Clone)]
pub enum Notification<T> {
    /// A batch of elements, shared between subscribers.
    Next(Arc<Vec<T>>),
    /// Terminal failure.
    Error(FlowError),
    /// Terminal completion.
    Completed,
}
