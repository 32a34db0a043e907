// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Combinators over acknowledgements.
//!
//! Two merge disciplines exist in the runtime:
//!
//! - [`merge`] is conjunctive: the result is `Continue` iff both inputs
//!   resolve `Continue`, and `Stop` as soon as either resolves `Stop`.
//!   Operators that pair one element from each upstream (zip) use this.
//! - [`race`] resolves with the first resolution among its inputs. The
//!   cached-serve-first subject answers its producer this way: the first
//!   subscriber ready for more data releases the next emission while the
//!   buffer holds it for the slower ones.

use crate::ack::{Ack, AckKind};
use crate::oneshot::AckCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Merges two acks conjunctively.
///
/// `Continue` iff both resolve `Continue`; `Stop` as soon as either resolves
/// `Stop`.
#[must_use]
pub fn merge(left: Ack, right: Ack) -> Ack {
    match (left, right) {
        (Ack::Stop, _) | (_, Ack::Stop) => Ack::Stop,
        (Ack::Continue, other) | (other, Ack::Continue) => other,
        (Ack::Pending(left), Ack::Pending(right)) => {
            let cell = AckCell::new();
            let continues = Arc::new(AtomicUsize::new(0));
            for side in [left, right] {
                let cell = cell.clone();
                let continues = continues.clone();
                side.subscribe(move |kind| match kind {
                    AckKind::Stop => {
                        let _ = cell.offer(AckKind::Stop);
                    }
                    AckKind::Continue => {
                        if continues.fetch_add(1, Ordering::AcqRel) == 1 {
                            let _ = cell.offer(AckKind::Continue);
                        }
                    }
                });
            }
            Ack::Pending(cell)
        }
    }
}

/// Merges any number of acks conjunctively. An empty input is `Continue`.
#[must_use]
pub fn merge_all<I>(acks: I) -> Ack
where
    I: IntoIterator<Item = Ack>,
{
    acks.into_iter().fold(Ack::Continue, merge)
}

/// Resolves with the first resolution among `acks`.
///
/// An immediate ack in the input wins outright (the earliest one in input
/// order). The caller must supply at least one ack; racing an empty input
/// yields a pending ack that never resolves.
#[must_use]
pub fn race<I>(acks: I) -> Ack
where
    I: IntoIterator<Item = Ack>,
{
    let pending: Vec<AckCell> = {
        let mut cells = Vec::new();
        for ack in acks {
            match ack {
                Ack::Pending(cell) => cells.push(cell),
                immediate => return immediate,
            }
        }
        cells
    };

    let winner = AckCell::new();
    for cell in pending {
        let winner = winner.clone();
        cell.subscribe(move |kind| {
            let _ = winner.offer(kind);
        });
    }
    Ack::Pending(winner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_immediate_table() {
        assert!(matches!(merge(Ack::Continue, Ack::Continue), Ack::Continue));
        assert!(matches!(merge(Ack::Continue, Ack::Stop), Ack::Stop));
        assert!(matches!(merge(Ack::Stop, Ack::Continue), Ack::Stop));
        assert!(matches!(merge(Ack::Stop, Ack::Stop), Ack::Stop));
    }

    #[test]
    fn test_merge_waits_for_both_continues() {
        let (left, left_cell) = Ack::pending();
        let (right, right_cell) = Ack::pending();
        let merged = merge(left, right);

        assert_eq!(merged.value(), None);
        left_cell.resolve(AckKind::Continue).expect("resolution");
        assert_eq!(merged.value(), None);
        right_cell.resolve(AckKind::Continue).expect("resolution");
        assert_eq!(merged.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_merge_stops_early() {
        let (left, left_cell) = Ack::pending();
        let (right, _right_cell) = Ack::pending();
        let merged = merge(left, right);

        left_cell.resolve(AckKind::Stop).expect("resolution");
        assert_eq!(merged.value(), Some(AckKind::Stop));
    }

    #[test]
    fn test_merge_immediate_continue_passes_pending_through() {
        let (right, right_cell) = Ack::pending();
        let merged = merge(Ack::Continue, right);

        assert_eq!(merged.value(), None);
        right_cell.resolve(AckKind::Stop).expect("resolution");
        assert_eq!(merged.value(), Some(AckKind::Stop));
    }

    #[test]
    fn test_race_first_resolution_wins() {
        let (a, a_cell) = Ack::pending();
        let (b, b_cell) = Ack::pending();
        let raced = race([a, b]);

        assert_eq!(raced.value(), None);
        b_cell.resolve(AckKind::Continue).expect("resolution");
        assert_eq!(raced.value(), Some(AckKind::Continue));

        // The slower resolution is absorbed without effect.
        a_cell.resolve(AckKind::Stop).expect("resolution");
        assert_eq!(raced.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_race_immediate_short_circuits() {
        let (a, _a_cell) = Ack::pending();
        let raced = race([a, Ack::Continue]);
        assert_eq!(raced.value(), Some(AckKind::Continue));
    }
}
