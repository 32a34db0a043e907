// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Operator observables.
//!
//! Each operator installs its own observer atop its upstream during
//! `observe`. Stateless operators
//! (map, filter, scan, ...) transform batches lazily and pass the downstream
//! ack through; the multi-source machines (merge, zip, flat-map, ...) hold
//! their pending work in operator state, never on the call stack.

pub mod buffer;
pub mod concat;
pub mod controlled_zip;
pub mod debug;
pub mod filter;
pub mod first;
pub mod flat_map;
pub mod map;
pub mod merge;
pub mod observe_on;
pub mod pairwise;
pub mod reduce;
pub mod ref_count;
pub mod repeat_first;
pub mod scan;
pub mod to_list;
pub mod window;
pub mod zip;
pub mod zip_with_index;
