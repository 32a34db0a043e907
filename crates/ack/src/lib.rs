// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! One-shot acknowledgement channel used for per-emission flow control.
//!
//! Every `on_next` call in the flowable runtime is answered by exactly one
//! acknowledgement: either an immediate `Continue`/`Stop`, or a pending cell
//! that is resolved exactly once at a later point. This crate provides that
//! cell ([`AckCell`]), the combined immediate-or-pending value ([`Ack`]), and
//! the combinators operators chain acks with ([`ops`]).

pub mod ack;
pub mod error;
pub mod oneshot;
pub mod ops;

pub use ack::{Ack, AckKind};
pub use oneshot::AckCell;
