// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Common testing utilities for the flowable runtime.
//!
//! This module provides the shared constructs used across operator and
//! scenario tests:
//!
//! - [`observer::TestObserver`]: records everything it receives and answers
//!   acks according to a script (immediate continues, held pending acks,
//!   stops), so tests can exercise back-pressure precisely
//! - [`source::TestSource`]: a root observable driven by explicit `emit`
//!   calls, exposing the acks the pipeline returns
//! - [`scheduler::TestScheduler`]: virtual time; actions run only under
//!   explicit `advance_by`

pub mod observer;
pub mod scheduler;
pub mod source;
