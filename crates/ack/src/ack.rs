// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The acknowledgement value returned from `on_next`.

use crate::oneshot::AckCell;

/// The resolution carried by an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// The upstream may push the next batch.
    Continue,
    /// The upstream must cease pushing.
    Stop,
}

impl AckKind {
    /// Returns `true` for [`AckKind::Continue`].
    #[must_use]
    pub fn is_continue(self) -> bool {
        matches!(self, AckKind::Continue)
    }
}

/// An acknowledgement: either an immediate resolution or a pending cell.
///
/// A synchronously returned `Continue`/`Stop` is an *immediate ack*. A
/// [`Ack::Pending`] ack is resolved exactly once at a later point; the
/// upstream must not push another batch until it is.
#[derive(Debug, Clone)]
pub enum Ack {
    /// Immediate permission to push the next batch.
    Continue,
    /// Immediate demand to cease pushing.
    Stop,
    /// Resolution arrives later through the contained cell.
    Pending(AckCell),
}

impl From<AckKind> for Ack {
    fn from(kind: AckKind) -> Self {
        match kind {
            AckKind::Continue => Ack::Continue,
            AckKind::Stop => Ack::Stop,
        }
    }
}

impl From<AckCell> for Ack {
    fn from(cell: AckCell) -> Self {
        Ack::Pending(cell)
    }
}

impl Ack {
    /// Creates a pending ack together with the cell that resolves it.
    #[must_use]
    pub fn pending() -> (Ack, AckCell) {
        let cell = AckCell::new();
        (Ack::Pending(cell.clone()), cell)
    }

    /// Returns the resolution if it is already known.
    ///
    /// An immediate ack always has a value; a pending ack has one only once
    /// its cell has been resolved.
    #[must_use]
    pub fn value(&self) -> Option<AckKind> {
        match self {
            Ack::Continue => Some(AckKind::Continue),
            Ack::Stop => Some(AckKind::Stop),
            Ack::Pending(cell) => cell.value(),
        }
    }

    /// Returns `true` if this ack was returned synchronously.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Ack::Pending(_))
    }

    /// Delivers the resolution to `callback`, immediately for immediate acks.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce(AckKind) + Send + 'static,
    {
        match self {
            Ack::Continue => callback(AckKind::Continue),
            Ack::Stop => callback(AckKind::Stop),
            Ack::Pending(cell) => cell.subscribe(callback),
        }
    }

    /// Forwards this ack's resolution to `target`.
    ///
    /// The target loses any resolution race silently, so several acks may be
    /// connected to the same cell; the first resolution wins.
    pub fn connect(&self, target: &AckCell) {
        let target = target.clone();
        self.subscribe(move |kind| {
            let _ = target.offer(kind);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_value() {
        assert_eq!(Ack::Continue.value(), Some(AckKind::Continue));
        assert_eq!(Ack::Stop.value(), Some(AckKind::Stop));
        let (ack, cell) = Ack::pending();
        assert_eq!(ack.value(), None);
        cell.resolve(AckKind::Continue).expect("resolution");
        assert_eq!(ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_connect_forwards_resolution() {
        let (ack, cell) = Ack::pending();
        let target = AckCell::new();
        ack.connect(&target);
        assert!(!target.is_resolved());

        cell.resolve(AckKind::Stop).expect("resolution");
        assert_eq!(target.value(), Some(AckKind::Stop));
    }

    #[test]
    fn test_connect_immediate() {
        let target = AckCell::new();
        Ack::Continue.connect(&target);
        assert_eq!(target.value(), Some(AckKind::Continue));
    }
}
