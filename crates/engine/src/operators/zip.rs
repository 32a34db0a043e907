// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Strict pairing.

use crate::disposable::Disposable;
use crate::observable::{Observable, ObservableRef};
use crate::observer::ObserverInfo;
use crate::operators::controlled_zip::ControlledZipObservable;

/// Pairs one element from each source strictly in index order.
///
/// Zip is the controlled-zip state machine with every predicate fixed to
/// true: each output consumes one element from both sides and every pair is
/// emitted. The output length equals the shorter input.
pub struct ZipObservable<L, R> {
    inner: ControlledZipObservable<L, R>,
}

impl<L: 'static, R: 'static> ZipObservable<L, R> {
    /// Creates the operator over both sources.
    #[must_use]
    pub fn new(left: ObservableRef<L>, right: ObservableRef<R>) -> Self {
        ZipObservable {
            inner: ControlledZipObservable::strict(left, right),
        }
    }
}

impl<L, R> Observable<(L, R)> for ZipObservable<L, R>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn observe(&self, info: ObserverInfo<(L, R)>) -> Disposable {
        self.inner.observe(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::source::TestSource;

    #[test]
    fn test_zip_length_is_the_shorter_side() {
        let left = TestSource::new();
        let right = TestSource::new();
        let zip = ZipObservable::new(left.observable(), right.observable());
        let sink = TestObserver::immediate();
        let _sub = zip.observe(ObserverInfo::new(sink.observer()));

        let _ = left.emit(vec![1, 2, 3, 4, 5]);
        let _ = right.emit(vec![10, 20]);
        right.complete();
        left.complete();

        assert_eq!(sink.received(), vec![(1, 10), (2, 20)]);
        assert!(sink.is_completed());
    }
}
