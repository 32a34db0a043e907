// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Controlled pairing of two sources.
//!
//! The state machine follows the zip contract:
//!
//! ```text
//! WaitOnLeftRight  →  WaitOnLeft | WaitOnRight | Stopped
//! WaitOnLeft       →  WaitOnLeftRight | Stopped
//! WaitOnRight      →  WaitOnLeftRight | Stopped
//! Stopped          (terminal)
//! ```
//!
//! `WaitOnLeft` holds the unconsumed tail of a right batch (the left buffer
//! is empty), and symmetrically for `WaitOnRight`. Three predicates control
//! the pairing: `match_func` decides whether the current heads are emitted as
//! a pair, `request_left`/`request_right` decide which side's head is
//! consumed afterwards. While the pairing loop runs outside the lock, both
//! upstreams are suspended on their unresolved acks; only terminal events can
//! arrive concurrently, and they only set flags the loop end re-checks.

use crate::batch::Batch;
use crate::disposable::{CompositeDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Predicate deciding whether the current left head is consumed.
pub type RequestFn<L, R> = Arc<dyn Fn(&L, &R) -> bool + Send + Sync>;
/// Predicate deciding whether the current heads form an output pair.
pub type MatchFn<L, R> = Arc<dyn Fn(&L, &R) -> bool + Send + Sync>;

/// Pairs one element from each source under user-controlled consumption.
pub struct ControlledZipObservable<L, R> {
    left: ObservableRef<L>,
    right: ObservableRef<R>,
    request_left: RequestFn<L, R>,
    request_right: RequestFn<L, R>,
    match_func: MatchFn<L, R>,
}

impl<L, R> ControlledZipObservable<L, R> {
    /// Creates the operator over both sources.
    #[must_use]
    pub fn new(
        left: ObservableRef<L>,
        right: ObservableRef<R>,
        request_left: RequestFn<L, R>,
        request_right: RequestFn<L, R>,
        match_func: MatchFn<L, R>,
    ) -> Self {
        ControlledZipObservable {
            left,
            right,
            request_left,
            request_right,
            match_func,
        }
    }

    /// Strict zip: every pair matches and both heads are always consumed.
    #[must_use]
    pub fn strict(left: ObservableRef<L>, right: ObservableRef<R>) -> Self
    where
        L: 'static,
        R: 'static,
    {
        ControlledZipObservable::new(
            left,
            right,
            Arc::new(|_, _| true),
            Arc::new(|_, _| true),
            Arc::new(|_, _| true),
        )
    }
}

impl<L, R> Observable<(L, R)> for ControlledZipObservable<L, R>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn observe(&self, info: ObserverInfo<(L, R)>) -> Disposable {
        let state = Arc::new(ZipShared {
            downstream: info.observer.clone(),
            request_left: self.request_left.clone(),
            request_right: self.request_right.clone(),
            match_func: self.match_func.clone(),
            inner: Mutex::new(ZipInner {
                state: ZipState::WaitOnLeftRight,
                left_completed: false,
                right_completed: false,
                errored: false,
            }),
        });

        let left_observer = LeftObserver {
            state: state.clone(),
        };
        let right_observer = RightObserver { state };

        let composite = CompositeDisposable::new();
        composite.add(self.left.observe(info.with_observer(Arc::new(left_observer))));
        composite.add(
            self.right
                .observe(info.with_observer(Arc::new(right_observer))),
        );
        composite.into_disposable()
    }
}

struct SideBuffer<T> {
    head: T,
    rest: std::vec::IntoIter<T>,
    in_cell: AckCell,
}

enum ZipState<L, R> {
    WaitOnLeftRight,
    WaitOnLeft { right: SideBuffer<R> },
    WaitOnRight { left: SideBuffer<L> },
    Zipping,
    Stopped,
}

struct ZipInner<L, R> {
    state: ZipState<L, R>,
    left_completed: bool,
    right_completed: bool,
    errored: bool,
}

struct ZipShared<L, R> {
    downstream: Arc<dyn Observer<(L, R)>>,
    request_left: RequestFn<L, R>,
    request_right: RequestFn<L, R>,
    match_func: MatchFn<L, R>,
    inner: Mutex<ZipInner<L, R>>,
}

enum Exhausted {
    Left,
    Right,
    Both,
}

impl<L, R> ZipShared<L, R>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn on_next_left(self: &Arc<Self>, batch: Batch<L>) -> Ack {
        let elements = match batch.try_materialize() {
            Ok(elements) => elements,
            Err(error) => {
                self.fail(error);
                return Ack::Stop;
            }
        };
        let mut rest = elements.into_iter();
        let Some(head) = rest.next() else {
            return Ack::Continue;
        };
        let in_cell = AckCell::new();

        let right = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.state, ZipState::Zipping) {
                ZipState::Stopped => {
                    inner.state = ZipState::Stopped;
                    return Ack::Stop;
                }
                ZipState::WaitOnLeftRight => {
                    inner.state = ZipState::WaitOnRight {
                        left: SideBuffer {
                            head,
                            rest,
                            in_cell: in_cell.clone(),
                        },
                    };
                    return Ack::Pending(in_cell);
                }
                ZipState::WaitOnLeft { right } => right,
                ZipState::WaitOnRight { left } => {
                    inner.state = ZipState::WaitOnRight { left };
                    self.protocol_violation("left pushed while its ack was unresolved");
                    return Ack::Stop;
                }
                ZipState::Zipping => {
                    self.protocol_violation("left pushed while zipping");
                    return Ack::Stop;
                }
            }
        };

        let left = SideBuffer {
            head,
            rest,
            in_cell: in_cell.clone(),
        };
        self.zip(left, right);
        Ack::Pending(in_cell)
    }

    fn on_next_right(self: &Arc<Self>, batch: Batch<R>) -> Ack {
        let elements = match batch.try_materialize() {
            Ok(elements) => elements,
            Err(error) => {
                self.fail(error);
                return Ack::Stop;
            }
        };
        let mut rest = elements.into_iter();
        let Some(head) = rest.next() else {
            return Ack::Continue;
        };
        let in_cell = AckCell::new();

        let left = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.state, ZipState::Zipping) {
                ZipState::Stopped => {
                    inner.state = ZipState::Stopped;
                    return Ack::Stop;
                }
                ZipState::WaitOnLeftRight => {
                    inner.state = ZipState::WaitOnLeft {
                        right: SideBuffer {
                            head,
                            rest,
                            in_cell: in_cell.clone(),
                        },
                    };
                    return Ack::Pending(in_cell);
                }
                ZipState::WaitOnRight { left } => left,
                ZipState::WaitOnLeft { right } => {
                    inner.state = ZipState::WaitOnLeft { right };
                    self.protocol_violation("right pushed while its ack was unresolved");
                    return Ack::Stop;
                }
                ZipState::Zipping => {
                    self.protocol_violation("right pushed while zipping");
                    return Ack::Stop;
                }
            }
        };

        let right = SideBuffer {
            head,
            rest,
            in_cell: in_cell.clone(),
        };
        self.zip(left, right);
        Ack::Pending(in_cell)
    }

    /// The pairing loop. Runs outside the lock; both upstreams are suspended
    /// on the unresolved cells inside `left` and `right`.
    fn zip(self: &Arc<Self>, mut left: SideBuffer<L>, mut right: SideBuffer<R>) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut pairs: Vec<(L, R)> = Vec::new();
            let exhausted;
            loop {
                if (self.match_func)(&left.head, &right.head) {
                    pairs.push((left.head.clone(), right.head.clone()));
                }
                let advance_left = (self.request_left)(&left.head, &right.head);
                let advance_right = (self.request_right)(&left.head, &right.head);
                if !advance_left && !advance_right {
                    return Err(FlowError::Protocol {
                        message: "controlled zip requested neither side".to_owned(),
                    });
                }

                let next_left = if advance_left { left.rest.next() } else { None };
                let next_right = if advance_right { right.rest.next() } else { None };
                match (advance_left, next_left, advance_right, next_right) {
                    (true, Some(l), true, Some(r)) => {
                        left.head = l;
                        right.head = r;
                    }
                    (true, Some(l), true, None) => {
                        left.head = l;
                        exhausted = Exhausted::Right;
                        break;
                    }
                    (true, None, true, Some(r)) => {
                        right.head = r;
                        exhausted = Exhausted::Left;
                        break;
                    }
                    (true, None, true, None) => {
                        exhausted = Exhausted::Both;
                        break;
                    }
                    (true, Some(l), false, _) => {
                        left.head = l;
                    }
                    (true, None, false, _) => {
                        exhausted = Exhausted::Left;
                        break;
                    }
                    (false, _, true, Some(r)) => {
                        right.head = r;
                    }
                    (false, _, true, None) => {
                        exhausted = Exhausted::Right;
                        break;
                    }
                    (false, _, false, _) => unreachable!("neither side requested"),
                }
            }
            Ok((pairs, exhausted))
        }));

        let (pairs, exhausted) = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                let _ = left.in_cell.resolve(AckKind::Stop);
                let _ = right.in_cell.resolve(AckKind::Stop);
                self.fail(error);
                return;
            }
            Err(payload) => {
                let _ = left.in_cell.resolve(AckKind::Stop);
                let _ = right.in_cell.resolve(AckKind::Stop);
                self.fail(FlowError::from_panic(payload));
                return;
            }
        };

        let out_ack = if pairs.is_empty() {
            Ack::Continue
        } else {
            self.downstream.on_next(Batch::from_vec(pairs))
        };

        // Wire the new state and decide completion under the lock, then
        // resolve cells outside it.
        let (resolve_left, resolve_right, complete) = {
            let mut inner = self.inner.lock();
            if inner.errored {
                return;
            }
            match exhausted {
                Exhausted::Both => {
                    if inner.left_completed || inner.right_completed {
                        inner.state = ZipState::Stopped;
                        (Some(Ack::Stop), Some(Ack::Stop), true)
                    } else {
                        inner.state = ZipState::WaitOnLeftRight;
                        (Some(out_ack.clone()), Some(out_ack.clone()), false)
                    }
                }
                Exhausted::Left => {
                    if inner.left_completed {
                        // No left element will ever match the leftovers.
                        inner.state = ZipState::Stopped;
                        (Some(Ack::Stop), Some(Ack::Stop), true)
                    } else {
                        let in_cell = right.in_cell.clone();
                        inner.state = ZipState::WaitOnLeft {
                            right: SideBuffer {
                                head: right.head.clone(),
                                rest: right.rest,
                                in_cell,
                            },
                        };
                        (Some(out_ack.clone()), None, false)
                    }
                }
                Exhausted::Right => {
                    if inner.right_completed {
                        inner.state = ZipState::Stopped;
                        (Some(Ack::Stop), Some(Ack::Stop), true)
                    } else {
                        let in_cell = left.in_cell.clone();
                        inner.state = ZipState::WaitOnRight {
                            left: SideBuffer {
                                head: left.head.clone(),
                                rest: left.rest,
                                in_cell,
                            },
                        };
                        (None, Some(out_ack.clone()), false)
                    }
                }
            }
        };

        if let Some(ack) = resolve_left {
            ack.connect(&left.in_cell);
        }
        if let Some(ack) = resolve_right {
            ack.connect(&right.in_cell);
        }
        if complete {
            self.downstream.on_completed();
        }
    }

    fn on_completed_side(self: &Arc<Self>, is_left: bool) {
        let (complete, stop_cell) = {
            let mut inner = self.inner.lock();
            if is_left {
                inner.left_completed = true;
            } else {
                inner.right_completed = true;
            }
            match std::mem::replace(&mut inner.state, ZipState::Zipping) {
                ZipState::Stopped => {
                    inner.state = ZipState::Stopped;
                    (false, None)
                }
                ZipState::Zipping => (false, None),
                ZipState::WaitOnLeftRight => {
                    inner.state = ZipState::Stopped;
                    (true, None)
                }
                ZipState::WaitOnLeft { right } => {
                    // Buffered right elements can only ever match if the left
                    // side still feeds the pairing.
                    if is_left {
                        inner.state = ZipState::Stopped;
                        (true, Some(right.in_cell))
                    } else {
                        inner.state = ZipState::WaitOnLeft { right };
                        (false, None)
                    }
                }
                ZipState::WaitOnRight { left } => {
                    if is_left {
                        inner.state = ZipState::WaitOnRight { left };
                        (false, None)
                    } else {
                        inner.state = ZipState::Stopped;
                        (true, Some(left.in_cell))
                    }
                }
            }
        };
        if let Some(cell) = stop_cell {
            let _ = cell.resolve(AckKind::Stop);
        }
        if complete {
            self.downstream.on_completed();
        }
    }

    fn fail(self: &Arc<Self>, error: FlowError) {
        let cells = {
            let mut inner = self.inner.lock();
            if inner.errored {
                return;
            }
            inner.errored = true;
            match std::mem::replace(&mut inner.state, ZipState::Stopped) {
                ZipState::WaitOnLeft { right } => vec![right.in_cell],
                ZipState::WaitOnRight { left } => vec![left.in_cell],
                _ => Vec::new(),
            }
        };
        for cell in cells {
            let _ = cell.resolve(AckKind::Stop);
        }
        self.downstream.on_error(error);
    }

    fn protocol_violation(self: &Arc<Self>, message: &str) {
        tracing::warn!(message, "controlled zip protocol violation");
        self.fail(FlowError::Protocol {
            message: message.to_owned(),
        });
    }
}

struct LeftObserver<L, R> {
    state: Arc<ZipShared<L, R>>,
}

impl<L, R> Observer<L> for LeftObserver<L, R>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn on_next(&self, batch: Batch<L>) -> Ack {
        self.state.on_next_left(batch)
    }

    fn on_error(&self, error: FlowError) {
        self.state.fail(error);
    }

    fn on_completed(&self) {
        self.state.on_completed_side(true);
    }
}

struct RightObserver<L, R> {
    state: Arc<ZipShared<L, R>>,
}

impl<L, R> Observer<R> for RightObserver<L, R>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn on_next(&self, batch: Batch<R>) -> Ack {
        self.state.on_next_right(batch)
    }

    fn on_error(&self, error: FlowError) {
        self.state.fail(error);
    }

    fn on_completed(&self) {
        self.state.on_completed_side(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::source::TestSource;

    fn strict_setup() -> (
        TestSource<i64>,
        TestSource<i64>,
        TestObserver<(i64, i64)>,
    ) {
        let left = TestSource::new();
        let right = TestSource::new();
        let zip = ControlledZipObservable::strict(left.observable(), right.observable());
        let sink = TestObserver::immediate();
        let _sub = zip.observe(ObserverInfo::new(sink.observer()));
        (left, right, sink)
    }

    #[test]
    fn test_strict_zip_pairs_in_index_order() {
        let (left, right, sink) = strict_setup();

        let left_ack = left.emit(vec![1, 2, 3]);
        assert_eq!(left_ack.value(), None);
        assert_eq!(sink.received(), Vec::<(i64, i64)>::new());

        let right_ack = right.emit(vec![10, 20, 30]);
        assert_eq!(sink.received(), vec![(1, 10), (2, 20), (3, 30)]);
        assert_eq!(left_ack.value(), Some(AckKind::Continue));
        assert_eq!(right_ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_leftovers_are_kept_for_the_next_batch() {
        let (left, right, sink) = strict_setup();

        let left_ack = left.emit(vec![1, 2, 3]);
        let right_ack = right.emit(vec![10]);

        assert_eq!(sink.received(), vec![(1, 10)]);
        // The right batch is exhausted, the left keeps its tail buffered.
        assert_eq!(right_ack.value(), Some(AckKind::Continue));
        assert_eq!(left_ack.value(), None);

        let _ = right.emit(vec![20, 30, 40]);
        assert_eq!(sink.received(), vec![(1, 10), (2, 20), (3, 30)]);
        assert_eq!(left_ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_completion_after_leftovers_drained() {
        let (left, right, sink) = strict_setup();

        let _ = left.emit(vec![1, 2]);
        left.complete();
        assert!(!sink.is_completed());

        let right_ack = right.emit(vec![10, 20]);
        assert_eq!(sink.received(), vec![(1, 10), (2, 20)]);
        assert!(sink.is_completed());
        assert_eq!(right_ack.value(), Some(AckKind::Stop));
    }

    #[test]
    fn test_completion_of_empty_side_stops_immediately() {
        let (left, _right, sink) = strict_setup();

        left.complete();
        assert!(sink.is_completed());
    }

    #[test]
    fn test_match_func_filters_pairs() {
        let left = TestSource::new();
        let right = TestSource::new();
        let zip = ControlledZipObservable::new(
            left.observable(),
            right.observable(),
            Arc::new(|_, _| true),
            Arc::new(|_, _| true),
            Arc::new(|l: &i64, r: &i64| (l + r) % 2 == 0),
        );
        let sink = TestObserver::immediate();
        let _sub = zip.observe(ObserverInfo::new(sink.observer()));

        let _ = left.emit(vec![1, 2, 3]);
        let _ = right.emit(vec![1, 1, 1]);

        assert_eq!(sink.received(), vec![(1, 1), (3, 1)]);
    }

    #[test]
    fn test_keep_left_head_while_requesting_right() {
        // Pair every right element with the current left head.
        let left = TestSource::new();
        let right = TestSource::new();
        let zip = ControlledZipObservable::new(
            left.observable(),
            right.observable(),
            Arc::new(|_l: &i64, r: &i64| *r >= 100),
            Arc::new(|_, _| true),
            Arc::new(|_, _| true),
        );
        let sink = TestObserver::immediate();
        let _sub = zip.observe(ObserverInfo::new(sink.observer()));

        let _ = left.emit(vec![1, 2]);
        let _ = right.emit(vec![10, 20, 100, 30]);

        assert_eq!(sink.received(), vec![(1, 10), (1, 20), (1, 100), (2, 30)]);
    }
}
