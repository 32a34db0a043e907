// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-left-element windows of right elements.
//!
//! Every left element opens a window, emitted downstream as a
//! `(left, PublishSubject)` pair; the consumer must subscribe the subject
//! synchronously on receipt. Right elements are classified against the
//! current left head:
//!
//! - `is_lower(l, r)`: the right precedes the window and is skipped;
//! - `is_higher(l, r)`: the right is past the window; the window closes, the
//!   next left is taken and the right is retried against it;
//! - otherwise the right belongs to the window and is pushed into its
//!   subject, with the subject's ack pacing the right upstream.
//!
//! When both sides complete while a window is mid-drain, the window subject
//! is completed first and downstream completion follows on the same tick; a
//! window never sees an element after downstream completion.

use crate::batch::Batch;
use crate::disposable::{CompositeDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::{Observable, ObservableRef};
use crate::observer::{Observer, ObserverInfo};
use crate::subject::publish::PublishSubject;
use ackflow_ack::{Ack, AckCell, AckKind};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Ordering predicate between a left element and a right element.
pub type WindowPredicate<L, R> = Arc<dyn Fn(&L, &R) -> bool + Send + Sync>;

/// Groups right elements into one window per left element.
pub struct WindowObservable<L, R> {
    left: ObservableRef<L>,
    right: ObservableRef<R>,
    is_lower: WindowPredicate<L, R>,
    is_higher: WindowPredicate<L, R>,
}

impl<L, R> WindowObservable<L, R> {
    /// Creates the operator over both sources.
    #[must_use]
    pub fn new(
        left: ObservableRef<L>,
        right: ObservableRef<R>,
        is_lower: WindowPredicate<L, R>,
        is_higher: WindowPredicate<L, R>,
    ) -> Self {
        WindowObservable {
            left,
            right,
            is_lower,
            is_higher,
        }
    }
}

impl<L, R> Observable<(L, PublishSubject<R>)> for WindowObservable<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn observe(&self, info: ObserverInfo<(L, PublishSubject<R>)>) -> Disposable {
        let shared = Arc::new(WindowShared {
            downstream: info.observer.clone(),
            is_lower: self.is_lower.clone(),
            is_higher: self.is_higher.clone(),
            inner: Mutex::new(WindowInner {
                left: None,
                right: None,
                subject: None,
                left_completed: false,
                right_completed: false,
                stopped: false,
                processing: false,
            }),
        });

        let left_observer = WindowLeftObserver {
            shared: shared.clone(),
        };
        let right_observer = WindowRightObserver {
            shared: shared.clone(),
        };

        let composite = CompositeDisposable::new();
        composite.add(
            self.left
                .observe(info.with_observer(Arc::new(left_observer))),
        );
        composite.add(
            self.right
                .observe(info.with_observer(Arc::new(right_observer))),
        );
        composite.add(Disposable::new(move || shared.stop()));
        composite.into_disposable()
    }
}

struct SideBuffer<T> {
    head: T,
    rest: std::vec::IntoIter<T>,
    in_cell: AckCell,
}

struct WindowInner<L, R> {
    left: Option<SideBuffer<L>>,
    right: Option<SideBuffer<R>>,
    subject: Option<PublishSubject<R>>,
    left_completed: bool,
    right_completed: bool,
    stopped: bool,
    processing: bool,
}

struct WindowShared<L, R> {
    downstream: Arc<dyn Observer<(L, PublishSubject<R>)>>,
    is_lower: WindowPredicate<L, R>,
    is_higher: WindowPredicate<L, R>,
    inner: Mutex<WindowInner<L, R>>,
}

enum Step<L, R> {
    /// A buffer advanced in place; classify again.
    Loop,
    /// Nothing to do until more input arrives.
    Idle,
    /// Push a right element into the open window; the optional cell is the
    /// exhausted right batch's ack, released before the push.
    Emit(PublishSubject<R>, R, Option<AckCell>),
    /// Close the finished window (if any), then open the next one.
    Rollover {
        close: Option<PublishSubject<R>>,
        open: Option<(L, PublishSubject<R>)>,
        resolve: Option<(AckCell, AckKind)>,
    },
    /// Terminal: close the open window, settle the cells, complete.
    Finish(Option<PublishSubject<R>>, Vec<(AckCell, AckKind)>),
}

enum Classified {
    Lower,
    Within,
    Higher,
}

impl<L, R> WindowShared<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
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

        let open = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return Ack::Stop;
            }
            if inner.left.is_some() {
                drop(inner);
                self.protocol_violation("left pushed while its ack was unresolved");
                return Ack::Stop;
            }
            inner.left = Some(SideBuffer {
                head: head.clone(),
                rest,
                in_cell: in_cell.clone(),
            });
            let subject = PublishSubject::new();
            inner.subject = Some(subject.clone());
            (head, subject)
        };

        let _ = self
            .downstream
            .on_next(Batch::single((open.0, open.1)));
        self.pump();
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

        {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return Ack::Stop;
            }
            if inner.right.is_some() {
                drop(inner);
                self.protocol_violation("right pushed while its ack was unresolved");
                return Ack::Stop;
            }
            inner.right = Some(SideBuffer {
                head,
                rest,
                in_cell: in_cell.clone(),
            });
        }

        self.pump();
        Ack::Pending(in_cell)
    }

    /// Starts the classification loop unless one is already running (it may
    /// be parked on a window subject's pending ack).
    fn pump(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.processing || inner.stopped {
                return;
            }
            inner.processing = true;
        }
        self.pump_loop();
    }

    fn pump_loop(self: &Arc<Self>) {
        loop {
            let step = match self.next_step() {
                Ok(step) => step,
                Err(error) => {
                    self.fail(error);
                    return;
                }
            };
            match step {
                Step::Loop => {}
                Step::Idle => break,
                Step::Rollover {
                    close,
                    open,
                    resolve,
                } => {
                    if let Some(subject) = close {
                        subject.on_completed();
                    }
                    if let Some((left_val, subject)) = open {
                        let _ = self.downstream.on_next(Batch::single((left_val, subject)));
                    }
                    if let Some((cell, kind)) = resolve {
                        let _ = cell.resolve(kind);
                    }
                }
                Step::Finish(subject, cells) => {
                    // The mid-drain window completes before downstream does.
                    if let Some(subject) = subject {
                        subject.on_completed();
                    }
                    for (cell, kind) in cells {
                        let _ = cell.resolve(kind);
                    }
                    self.downstream.on_completed();
                    return;
                }
                Step::Emit(subject, value, exhausted_cell) => {
                    if let Some(cell) = exhausted_cell {
                        let _ = cell.resolve(AckKind::Continue);
                    }
                    let ack = subject.on_next(Batch::single(value));
                    match ack.value() {
                        Some(AckKind::Continue) => {}
                        Some(AckKind::Stop) => {
                            self.stop();
                            return;
                        }
                        None => {
                            let shared = self.clone();
                            ack.subscribe(move |kind| match kind {
                                AckKind::Continue => shared.pump_loop(),
                                AckKind::Stop => shared.stop(),
                            });
                            return;
                        }
                    }
                }
            }
        }
        self.inner.lock().processing = false;
    }

    /// Computes the next effect under the lock.
    fn next_step(self: &Arc<Self>) -> Result<Step<L, R>, FlowError> {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Ok(Step::Idle);
        }

        if inner.right.is_none() {
            if inner.right_completed {
                let subject = inner.subject.take();
                let mut cells = Vec::new();
                if let Some(left) = inner.left.take() {
                    cells.push((left.in_cell, AckKind::Stop));
                }
                inner.stopped = true;
                return Ok(Step::Finish(subject, cells));
            }
            return Ok(Step::Idle);
        }

        if inner.left.is_none() {
            if inner.left_completed {
                // No window can open anymore; drop pending rights.
                let subject = inner.subject.take();
                let mut cells = Vec::new();
                if let Some(right) = inner.right.take() {
                    cells.push((right.in_cell, AckKind::Stop));
                }
                inner.stopped = true;
                return Ok(Step::Finish(subject, cells));
            }
            return Ok(Step::Idle);
        }

        let left_head = inner.left.as_ref().map(|buffer| buffer.head.clone());
        let right_head = inner.right.as_ref().map(|buffer| buffer.head.clone());
        let (Some(left_head), Some(right_head)) = (left_head, right_head) else {
            return Ok(Step::Idle);
        };

        let class = std::panic::catch_unwind(AssertUnwindSafe(|| {
            if (self.is_lower)(&left_head, &right_head) {
                Classified::Lower
            } else if (self.is_higher)(&left_head, &right_head) {
                Classified::Higher
            } else {
                Classified::Within
            }
        }))
        .map_err(FlowError::from_panic)?;

        match class {
            Classified::Lower => Ok(match Self::advance_right(&mut inner) {
                Some(cell) => Step::Rollover {
                    close: None,
                    open: None,
                    resolve: Some((cell, AckKind::Continue)),
                },
                None => Step::Loop,
            }),
            Classified::Within => {
                let Some(subject) = inner.subject.clone() else {
                    return Err(FlowError::Protocol {
                        message: "window element with no open window".to_owned(),
                    });
                };
                let exhausted = Self::advance_right(&mut inner);
                Ok(Step::Emit(subject, right_head, exhausted))
            }
            Classified::Higher => {
                let closing = inner.subject.take();
                let next_left = inner
                    .left
                    .as_mut()
                    .and_then(|buffer| match buffer.rest.next() {
                        Some(next) => {
                            buffer.head = next.clone();
                            Some(next)
                        }
                        None => None,
                    });
                match next_left {
                    Some(next_left) => {
                        let subject = PublishSubject::new();
                        inner.subject = Some(subject.clone());
                        Ok(Step::Rollover {
                            close: closing,
                            open: Some((next_left, subject)),
                            resolve: None,
                        })
                    }
                    None => {
                        let left_cell = inner.left.take().map(|buffer| buffer.in_cell);
                        if inner.left_completed {
                            let mut cells = Vec::new();
                            if let Some(cell) = left_cell {
                                cells.push((cell, AckKind::Stop));
                            }
                            if let Some(right) = inner.right.take() {
                                cells.push((right.in_cell, AckKind::Stop));
                            }
                            inner.stopped = true;
                            Ok(Step::Finish(closing, cells))
                        } else {
                            Ok(Step::Rollover {
                                close: closing,
                                open: None,
                                resolve: left_cell.map(|cell| (cell, AckKind::Continue)),
                            })
                        }
                    }
                }
            }
        }
    }

    /// Moves the right buffer forward; returns the exhausted batch's ack
    /// cell when it ran dry.
    fn advance_right(inner: &mut WindowInner<L, R>) -> Option<AckCell> {
        let right = inner.right.as_mut()?;
        match right.rest.next() {
            Some(next) => {
                right.head = next;
                None
            }
            None => inner.right.take().map(|buffer| buffer.in_cell),
        }
    }

    fn on_completed_left(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            inner.left_completed = true;
        }
        self.pump();
    }

    fn on_completed_right(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            inner.right_completed = true;
        }
        self.pump();
    }

    fn fail(self: &Arc<Self>, error: FlowError) {
        let (subject, cells) = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            let mut cells = Vec::new();
            if let Some(left) = inner.left.take() {
                cells.push(left.in_cell);
            }
            if let Some(right) = inner.right.take() {
                cells.push(right.in_cell);
            }
            (inner.subject.take(), cells)
        };
        if let Some(subject) = subject {
            subject.on_error(error.clone());
        }
        for cell in cells {
            let _ = cell.resolve(AckKind::Stop);
        }
        self.downstream.on_error(error);
    }

    fn protocol_violation(self: &Arc<Self>, message: &str) {
        tracing::warn!(message, "window protocol violation");
        self.fail(FlowError::Protocol {
            message: message.to_owned(),
        });
    }

    fn stop(self: &Arc<Self>) {
        let cells = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            let mut cells = Vec::new();
            if let Some(left) = inner.left.take() {
                cells.push(left.in_cell);
            }
            if let Some(right) = inner.right.take() {
                cells.push(right.in_cell);
            }
            cells
        };
        for cell in cells {
            let _ = cell.resolve(AckKind::Stop);
        }
    }
}

struct WindowLeftObserver<L, R> {
    shared: Arc<WindowShared<L, R>>,
}

impl<L, R> Observer<L> for WindowLeftObserver<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn on_next(&self, batch: Batch<L>) -> Ack {
        self.shared.on_next_left(batch)
    }

    fn on_error(&self, error: FlowError) {
        self.shared.fail(error);
    }

    fn on_completed(&self) {
        self.shared.on_completed_left();
    }
}

struct WindowRightObserver<L, R> {
    shared: Arc<WindowShared<L, R>>,
}

impl<L, R> Observer<R> for WindowRightObserver<L, R>
where
    L: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn on_next(&self, batch: Batch<R>) -> Ack {
        self.shared.on_next_right(batch)
    }

    fn on_error(&self, error: FlowError) {
        self.shared.fail(error);
    }

    fn on_completed(&self) {
        self.shared.on_completed_right();
    }
}
