// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the flowable runtime.
//!
//! Failures travel downstream only, through `on_error`; the upstream learns
//! about them via a `Stop` acknowledgement. [`FlowError`] is the generic
//! failure channel carried by `on_error`. [`Error`] covers subscribe-time
//! failures, which are returned from `unsafe_subscribe` instead of flowing
//! through the pipeline.
//!
//! Important note: It is important not to use `!Send` data types in errors to
//! ensure these errors can be emitted from any scheduler thread.

/// The failure value delivered through `on_error`.
///
/// These are kinds, not a typed hierarchy: every failure in a pipeline is one
/// of the variants below, with a human-readable payload where applicable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// A user-supplied callback (map, filter, selector, ...) failed. Caught at
    /// the operator boundary and converted to `on_error`; the upstream
    /// receives `Stop`.
    #[error("user callback failed: {message}")]
    User {
        /// Description of the callback failure.
        message: String,
    },

    /// The sequential observer contract was broken (`on_next` after a
    /// terminal event, double connect, ack resolved twice). Fatal for the
    /// affected subscription; also surfaced as a warning on the debug
    /// channel.
    #[error("protocol violation: {message}")]
    Protocol {
        /// Description of the violated rule.
        message: String,
    },

    /// `first()` was applied to an upstream that completed without emitting.
    #[error("sequence contains no elements")]
    EmptySequence,

    /// `flat_map` was applied to a hot flowable; ack semantics would be
    /// ambiguous.
    #[error("a hot flowable cannot be flattened")]
    HotFlatten,
}

impl FlowError {
    /// Builds a [`FlowError::User`] from a panic payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "user callback panicked".to_owned()
        };
        FlowError::User { message }
    }
}

impl From<Error> for FlowError {
    fn from(error: Error) -> Self {
        match error {
            Error::HotFlattenAttempt => FlowError::HotFlatten,
            Error::BaseMismatch { .. } => FlowError::User {
                message: error.to_string(),
            },
        }
    }
}

/// Errors raised while subscribing a pipeline.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `flat_map` was applied over a hot source; detected during the
    /// subscription handshake.
    #[error("a hot flowable cannot be flattened, multicast it instead")]
    HotFlattenAttempt,

    /// Two sources were matched without a common base or a registered
    /// selector bridging their index spaces.
    #[error("no common base between sources ({left} vs {right})")]
    BaseMismatch {
        /// Base of the left source.
        left: String,
        /// Base of the right source.
        right: String,
    },
}
