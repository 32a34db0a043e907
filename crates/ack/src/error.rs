// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the acknowledgement channel.
//!
//! Important note: It is important not to use `!Send` data types in errors to
//! ensure these errors can be emitted from any scheduler thread.

use crate::ack::AckKind;

/// Errors that can occur when resolving an acknowledgement cell.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckError {
    /// The cell was already resolved; an acknowledgement carries exactly one
    /// resolution, so the second resolution is rejected.
    #[error("acknowledgement already resolved as {existing:?}")]
    AlreadyResolved {
        /// The resolution the cell already carries.
        existing: AckKind,
    },
}
