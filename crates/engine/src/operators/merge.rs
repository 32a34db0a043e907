// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Arrival-order merge of two sources.
//!
//! Each side is either `Wait` (no element in flight) or `ElementReceived`
//! (an element was received and its upstream ack is unresolved). An element
//! arriving while the other side is `Wait` is emitted immediately; arriving
//! while the other side has an element in flight, its emission is chained
//! behind that side's ack so elements reach the downstream in arrival order.
//!
//! Completion is forwarded once both sides completed and no element is in
//! flight. The first error wins; a second error is swallowed.

use crate::batch::Batch;
use crate::disposable::{CompositeDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::sync::Arc;

/// Emits every element from either source in the order they arrive.
pub struct MergeObservable<T> {
    left: ObservableRef<T>,
    right: ObservableRef<T>,
}

impl<T> MergeObservable<T> {
    /// Creates the operator over both sources.
    #[must_use]
    pub fn new(left: ObservableRef<T>, right: ObservableRef<T>) -> Self {
        MergeObservable { left, right }
    }
}

impl<T: Send + 'static> Observable<T> for MergeObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let state = Arc::new(MergeState {
            downstream: info.observer.clone(),
            inner: Mutex::new(MergeInner {
                left: SideState::Wait,
                right: SideState::Wait,
                left_completed: false,
                right_completed: false,
                errored: false,
                completed_emitted: false,
                stopped: false,
            }),
        });

        let left_observer = MergeSideObserver {
            state: state.clone(),
            side: Side::Left,
        };
        let right_observer = MergeSideObserver {
            state,
            side: Side::Right,
        };

        let composite = CompositeDisposable::new();
        composite.add(self.left.observe(info.with_observer(Arc::new(left_observer))));
        composite.add(
            self.right
                .observe(info.with_observer(Arc::new(right_observer))),
        );
        composite.into_disposable()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

enum SideState {
    Wait,
    ElementReceived(AckCell),
}

struct MergeInner {
    left: SideState,
    right: SideState,
    left_completed: bool,
    right_completed: bool,
    errored: bool,
    completed_emitted: bool,
    stopped: bool,
}

impl MergeInner {
    fn side_mut(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn other(&self, side: Side) -> &SideState {
        match side {
            Side::Left => &self.right,
            Side::Right => &self.left,
        }
    }

    fn both_drained(&self) -> bool {
        matches!(self.left, SideState::Wait) && matches!(self.right, SideState::Wait)
    }
}

struct MergeState<T> {
    downstream: Arc<dyn Observer<T>>,
    inner: Mutex<MergeInner>,
}

impl<T: Send + 'static> MergeState<T> {
    fn on_next(self: &Arc<Self>, side: Side, batch: Batch<T>) -> Ack {
        let in_cell = AckCell::new();

        let chained_behind = {
            let mut inner = self.inner.lock();
            if inner.stopped || inner.errored {
                return Ack::Stop;
            }
            *inner.side_mut(side) = SideState::ElementReceived(in_cell.clone());
            match inner.other(side) {
                SideState::Wait => None,
                SideState::ElementReceived(cell) => Some(cell.clone()),
            }
        };

        match chained_behind {
            None => self.emit(side, batch, in_cell.clone()),
            Some(other_cell) => {
                // Emit only after the previously received element was
                // released downstream.
                let state = self.clone();
                let cell = in_cell.clone();
                other_cell.subscribe(move |kind| match kind {
                    AckKind::Continue => state.emit(side, batch, cell),
                    AckKind::Stop => {
                        let _ = cell.resolve(AckKind::Stop);
                    }
                });
            }
        }

        Ack::Pending(in_cell)
    }

    fn emit(self: &Arc<Self>, side: Side, batch: Batch<T>, in_cell: AckCell) {
        let out_ack = self.downstream.on_next(batch);
        let state = self.clone();
        out_ack.subscribe(move |kind| {
            let emit_completion = {
                let mut inner = state.inner.lock();
                *inner.side_mut(side) = SideState::Wait;
                if kind == AckKind::Stop {
                    inner.stopped = true;
                }
                state.completion_due(&mut inner)
            };
            let _ = in_cell.resolve(kind);
            if emit_completion {
                state.downstream.on_completed();
            }
        });
    }

    fn completion_due(&self, inner: &mut MergeInner) -> bool {
        if inner.left_completed
            && inner.right_completed
            && inner.both_drained()
            && !inner.errored
            && !inner.stopped
            && !inner.completed_emitted
        {
            inner.completed_emitted = true;
            true
        } else {
            false
        }
    }

    fn on_completed(self: &Arc<Self>, side: Side) {
        let emit_completion = {
            let mut inner = self.inner.lock();
            match side {
                Side::Left => inner.left_completed = true,
                Side::Right => inner.right_completed = true,
            }
            self.completion_due(&mut inner)
        };
        if emit_completion {
            self.downstream.on_completed();
        }
    }

    fn on_error(self: &Arc<Self>, error: FlowError) {
        let first = {
            let mut inner = self.inner.lock();
            let first = !inner.errored;
            inner.errored = true;
            first
        };
        if first {
            self.downstream.on_error(error);
        }
    }
}

struct MergeSideObserver<T> {
    state: Arc<MergeState<T>>,
    side: Side,
}

impl<T: Send + 'static> Observer<T> for MergeSideObserver<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        self.state.on_next(self.side, batch)
    }

    fn on_error(&self, error: FlowError) {
        self.state.on_error(error);
    }

    fn on_completed(&self) {
        self.state.on_completed(self.side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::source::TestSource;

    fn setup() -> (TestSource<i64>, TestSource<i64>, TestObserver<i64>) {
        let left = TestSource::new();
        let right = TestSource::new();
        let merge = MergeObservable::new(left.observable(), right.observable());
        let sink = TestObserver::immediate();
        let _sub = merge.observe(ObserverInfo::new(sink.observer()));
        (left, right, sink)
    }

    #[test]
    fn test_arrival_order_with_immediate_sink() {
        let (left, right, sink) = setup();

        assert_eq!(left.emit(vec![1]).value(), Some(AckKind::Continue));
        assert_eq!(right.emit(vec![10]).value(), Some(AckKind::Continue));
        assert_eq!(left.emit(vec![2]).value(), Some(AckKind::Continue));

        assert_eq!(sink.received(), vec![1, 10, 2]);
    }

    #[test]
    fn test_element_chained_behind_pending_ack() {
        let left = TestSource::new();
        let right = TestSource::new();
        let merge = MergeObservable::new(left.observable(), right.observable());
        let sink = TestObserver::holding();
        let _sub = merge.observe(ObserverInfo::new(sink.observer()));

        let left_ack = left.emit(vec![1]);
        let right_ack = right.emit(vec![10]);

        // The right element waits behind the left element's unresolved ack.
        assert_eq!(sink.received(), vec![1]);
        assert_eq!(left_ack.value(), None);
        assert_eq!(right_ack.value(), None);

        assert!(sink.ack_continue());
        assert_eq!(sink.received(), vec![1, 10]);
        assert_eq!(left_ack.value(), Some(AckKind::Continue));
        assert_eq!(right_ack.value(), None);

        assert!(sink.ack_continue());
        assert_eq!(right_ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_completion_requires_both_sides() {
        let (left, right, sink) = setup();

        let _ = left.emit(vec![1]);
        left.complete();
        assert!(!sink.is_completed());

        let _ = right.emit(vec![10]);
        right.complete();
        assert!(sink.is_completed());
        assert_eq!(sink.received(), vec![1, 10]);
    }

    #[test]
    fn test_second_error_is_swallowed() {
        let (left, right, sink) = setup();

        left.error(FlowError::User {
            message: "left".to_owned(),
        });
        right.error(FlowError::User {
            message: "right".to_owned(),
        });

        assert_eq!(
            sink.error(),
            Some(FlowError::User {
                message: "left".to_owned()
            })
        );
    }
}
