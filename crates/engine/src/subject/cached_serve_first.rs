// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Buffered multicast with per-subscriber cursors.
//!
//! The subject fans one producer out to any number of subscribers running at
//! different speeds, buffering only what the slowest active subscriber still
//! needs. Subscribers that are caught up sit in the inactive list and are
//! notified synchronously on the next emission; a subscriber whose pending
//! ack resolves after the buffer moved on catches up in the *fast loop*,
//! dequeuing the consumed prefix whenever it is the slowest reader.
//!
//! The producer's ack is the serve-first part: an emission is released as
//! soon as any subscriber is ready for more (an immediate `Continue` from an
//! inactive subscriber, or a race over the pending replies and the subject's
//! `current_ack`, which a subscriber resolves when it catches up to the
//! head). Slower subscribers read the remainder from the buffer.

use crate::batch::Batch;
use crate::disposable::{BooleanDisposable, Disposable};
use crate::error::FlowError;
use crate::observable::Observable;
use crate::observer::{Observer, ObserverInfo, ObserverRef};
use crate::scheduler::{ExecutionModel, SchedulerRef};
use crate::subject::dequeuable_buffer::DequeuableBuffer;
use crate::subject::Notification;
use ackflow_ack::{ops, Ack, AckCell, AckKind};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

struct SubscriberEntry<T> {
    observer: ObserverRef<T>,
    cursor: usize,
}

struct SubjectState<T> {
    buffer: DequeuableBuffer<Notification<T>>,
    subscribers: HashMap<u64, SubscriberEntry<T>>,
    next_id: u64,
    inactive: Vec<u64>,
    current_ack: Option<AckCell>,
    stopped: bool,
    error: Option<FlowError>,
    disposed: bool,
}

impl<T> SubjectState<T> {
    fn min_cursor(&self) -> Option<usize> {
        self.subscribers.values().map(|entry| entry.cursor).min()
    }

    /// Drops the prefix every remaining subscriber has consumed.
    fn dequeue_consumed(&mut self) {
        if let Some(min) = self.min_cursor() {
            if min > self.buffer.first_idx() {
                self.buffer.dequeue_through(min - 1);
            }
        }
    }
}

struct SubjectShared<T> {
    scheduler: SchedulerRef,
    execution_model: ExecutionModel,
    state: Mutex<SubjectState<T>>,
}

/// Multicast subject buffering for the slowest active subscriber.
pub struct CachedServeFirstSubject<T> {
    shared: Arc<SubjectShared<T>>,
}

impl<T> Clone for CachedServeFirstSubject<T> {
    fn clone(&self) -> Self {
        CachedServeFirstSubject {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> CachedServeFirstSubject<T> {
    /// Creates the subject; catch-up loops and deferred ack observations run
    /// on `scheduler`.
    #[must_use]
    pub fn new(scheduler: SchedulerRef) -> Self {
        let execution_model = scheduler.execution_model();
        CachedServeFirstSubject {
            shared: Arc::new(SubjectShared {
                scheduler,
                execution_model,
                state: Mutex::new(SubjectState {
                    buffer: DequeuableBuffer::new(),
                    subscribers: HashMap::new(),
                    next_id: 0,
                    inactive: Vec::new(),
                    current_ack: None,
                    stopped: false,
                    error: None,
                    disposed: false,
                }),
            }),
        }
    }

    /// The retained buffer window as `(first_idx, last_idx)`.
    #[must_use]
    pub fn buffer_range(&self) -> (usize, usize) {
        let state = self.shared.state.lock();
        (state.buffer.first_idx(), state.buffer.last_idx())
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Unsubscribes every observer and drops the buffer.
    pub fn dispose(&self) {
        let mut state = self.shared.state.lock();
        state.disposed = true;
        state.subscribers.clear();
        state.inactive.clear();
        let last = state.buffer.last_idx();
        state.buffer.dequeue_through(last.saturating_sub(1));
    }
}

impl<T: Clone + Send + Sync + 'static> SubjectShared<T> {
    fn batch_from(values: &Arc<Vec<T>>) -> Batch<T> {
        Batch::from_vec(values.as_ref().clone())
    }

    /// Synchronous notification of a caught-up subscriber.
    fn notify_on_next(self: &Arc<Self>, id: u64, values: &Arc<Vec<T>>) -> Ack {
        let (observer, current_index) = {
            let mut state = self.state.lock();
            let Some(entry) = state.subscribers.get_mut(&id) else {
                return Ack::Stop;
            };
            entry.cursor += 1;
            (entry.observer.clone(), entry.cursor)
        };

        let ack = observer.on_next(Self::batch_from(values));
        match ack.value() {
            Some(AckKind::Continue) => {
                let mut state = self.state.lock();
                state.inactive.push(id);
                state.dequeue_consumed();
                Ack::Continue
            }
            Some(AckKind::Stop) => {
                self.remove_subscriber(id);
                Ack::Stop
            }
            None => {
                let inner = AckCell::new();
                let shared = self.clone();
                let inner_cell = inner.clone();
                ack.subscribe(move |kind| {
                    // Hop off the resolving thread before touching the state
                    // machine again.
                    let shared = shared.clone();
                    let inner_cell = inner_cell.clone();
                    let scheduler = shared.scheduler.clone();
                    scheduler.schedule(Box::new(move || {
                        match kind {
                            AckKind::Continue => {
                                let catch_up = {
                                    let mut state = shared.state.lock();
                                    if !state.subscribers.contains_key(&id) {
                                        false
                                    } else if current_index < state.buffer.last_idx() {
                                        true
                                    } else {
                                        state.inactive.push(id);
                                        false
                                    }
                                };
                                if catch_up {
                                    shared.fast_loop(id, current_index, 0, BooleanDisposable::new());
                                }
                            }
                            AckKind::Stop => shared.remove_subscriber(id),
                        }
                        let _ = inner_cell.resolve(kind);
                    }));
                });
                Ack::Pending(inner)
            }
        }
    }

    /// Synchronous catch-up drain, owned by one subscriber.
    fn fast_loop(
        self: &Arc<Self>,
        id: u64,
        mut current_idx: usize,
        mut sync_index: i64,
        disposable: BooleanDisposable,
    ) {
        loop {
            let (notification, observer) = {
                let state = self.state.lock();
                let Some(entry) = state.subscribers.get(&id) else {
                    return;
                };
                match state.buffer.get(current_idx) {
                    Some(notification) => (notification.clone(), entry.observer.clone()),
                    None => return,
                }
            };
            current_idx += 1;
            {
                let mut state = self.state.lock();
                match state.subscribers.get_mut(&id) {
                    Some(entry) => entry.cursor = current_idx,
                    None => return,
                }
                state.dequeue_consumed();
            }

            match notification {
                Notification::Completed => {
                    observer.on_completed();
                    self.remove_subscriber(id);
                    break;
                }
                Notification::Error(error) => {
                    observer.on_error(error);
                    self.remove_subscriber(id);
                    break;
                }
                Notification::Next(values) => {
                    let ack = observer.on_next(Self::batch_from(&values));
                    // One consistent reading; a resolution racing past this
                    // point is handled by the subscribe path below.
                    let resolved = ack.value();

                    let (has_next, current_cell) = {
                        let mut state = self.state.lock();
                        if current_idx < state.buffer.last_idx() {
                            (true, None)
                        } else {
                            match resolved {
                                Some(AckKind::Continue) => {
                                    state.inactive.push(id);
                                    (false, state.current_ack.clone())
                                }
                                Some(AckKind::Stop) => {
                                    drop(state);
                                    self.remove_subscriber(id);
                                    return;
                                }
                                None => (false, None),
                            }
                        }
                    };

                    if !has_next {
                        match resolved {
                            Some(AckKind::Continue) => {
                                // Caught up to the head: release the producer.
                                if let Some(cell) = current_cell {
                                    let _ = cell.offer(AckKind::Continue);
                                }
                            }
                            None => self.resume_when_resolved(id, current_idx, &ack, disposable),
                            Some(AckKind::Stop) => {}
                        }
                        break;
                    }

                    match resolved {
                        Some(AckKind::Continue) => {
                            let next = self.execution_model.next_frame_index(sync_index);
                            if next > 0 {
                                sync_index = next;
                            } else if next == 0 && !disposable.is_disposed() {
                                let shared = self.clone();
                                let disposable = disposable.clone();
                                self.scheduler.schedule(Box::new(move || {
                                    shared.fast_loop(id, current_idx, 0, disposable);
                                }));
                                break;
                            } else {
                                break;
                            }
                        }
                        Some(AckKind::Stop) => {
                            self.remove_subscriber(id);
                            break;
                        }
                        None => {
                            self.resume_when_resolved(id, current_idx, &ack, disposable);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Re-enters the fast loop (or re-parks the subscriber) once its pending
    /// ack resolves.
    fn resume_when_resolved(
        self: &Arc<Self>,
        id: u64,
        current_idx: usize,
        ack: &Ack,
        disposable: BooleanDisposable,
    ) {
        let shared = self.clone();
        ack.subscribe(move |kind| {
            let shared = shared.clone();
            let disposable = disposable.clone();
            let scheduler = shared.scheduler.clone();
            scheduler.schedule(Box::new(move || match kind {
                AckKind::Continue => {
                    let (has_elem, current_cell) = {
                        let mut state = shared.state.lock();
                        if !state.subscribers.contains_key(&id) {
                            return;
                        }
                        if current_idx < state.buffer.last_idx() {
                            (true, None)
                        } else {
                            state.inactive.push(id);
                            (false, state.current_ack.clone())
                        }
                    };
                    if has_elem {
                        shared.fast_loop(id, current_idx, 0, disposable);
                    } else if let Some(cell) = current_cell {
                        let _ = cell.offer(AckKind::Continue);
                    }
                }
                AckKind::Stop => shared.remove_subscriber(id),
            }));
        });
    }

    fn remove_subscriber(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        let _ = state.subscribers.remove(&id);
        state.inactive.retain(|other| *other != id);
        state.dequeue_consumed();
    }
}

impl<T: Clone + Send + Sync + 'static> Observer<T> for CachedServeFirstSubject<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let values = match batch.try_materialize() {
            Ok(values) => Arc::new(values),
            Err(error) => {
                self.on_error(error);
                return Ack::Stop;
            }
        };

        let (snapshot, current_cell) = {
            let mut state = self.shared.state.lock();
            if state.stopped || state.disposed {
                return Ack::Stop;
            }
            let snapshot = std::mem::take(&mut state.inactive);
            state.buffer.append(Notification::Next(values.clone()));
            let cell = AckCell::new();
            state.current_ack = Some(cell.clone());
            (snapshot, cell)
        };

        let mut replies: SmallVec<[Ack; 4]> = SmallVec::new();
        for id in snapshot {
            replies.push(self.shared.notify_on_next(id, &values));
        }

        if replies.iter().any(|ack| matches!(ack, Ack::Continue)) {
            return Ack::Continue;
        }

        let mut race_inputs: Vec<Ack> = Vec::with_capacity(replies.len() + 1);
        race_inputs.push(Ack::Pending(current_cell));
        race_inputs.extend(replies);
        ops::race(race_inputs)
    }

    fn on_error(&self, error: FlowError) {
        let snapshot = {
            let mut state = self.shared.state.lock();
            if state.stopped || state.disposed {
                return;
            }
            state.stopped = true;
            state.error = Some(error.clone());
            state.buffer.append(Notification::Error(error.clone()));
            std::mem::take(&mut state.inactive)
        };
        for id in snapshot {
            let observer = {
                let mut state = self.shared.state.lock();
                state.subscribers.remove(&id).map(|entry| entry.observer)
            };
            if let Some(observer) = observer {
                observer.on_error(error.clone());
            }
        }
    }

    fn on_completed(&self) {
        let snapshot = {
            let mut state = self.shared.state.lock();
            if state.stopped || state.disposed {
                return;
            }
            state.stopped = true;
            state.buffer.append(Notification::Completed);
            std::mem::take(&mut state.inactive)
        };
        for id in snapshot {
            let observer = {
                let mut state = self.shared.state.lock();
                state.subscribers.remove(&id).map(|entry| entry.observer)
            };
            if let Some(observer) = observer {
                observer.on_completed();
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for CachedServeFirstSubject<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let (id, catch_up, terminal) = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return Disposable::empty();
            }
            if state.stopped && state.buffer.is_empty() {
                (0, false, Some(state.error.clone()))
            } else {
                let id = state.next_id;
                state.next_id += 1;
                let cursor = state.buffer.first_idx();
                let _ = state.subscribers.insert(
                    id,
                    SubscriberEntry {
                        observer: info.observer.clone(),
                        cursor,
                    },
                );
                if state.buffer.last_idx() > cursor {
                    (id, true, None)
                } else {
                    state.inactive.push(id);
                    (id, false, None)
                }
            }
        };

        if let Some(terminal) = terminal {
            match terminal {
                Some(error) => info.observer.on_error(error),
                None => info.observer.on_completed(),
            }
            return Disposable::empty();
        }

        if catch_up {
            let shared = self.shared.clone();
            let cursor = {
                let state = self.shared.state.lock();
                state.buffer.first_idx()
            };
            self.shared.scheduler.schedule(Box::new(move || {
                shared.fast_loop(id, cursor, 0, BooleanDisposable::new());
            }));
        }

        let shared = self.shared.clone();
        Disposable::new(move || shared.remove_subscriber(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;
    use crate::testing::scheduler::TestScheduler;

    fn subject_on(scheduler: &TestScheduler) -> CachedServeFirstSubject<i64> {
        CachedServeFirstSubject::new(Arc::new(scheduler.clone()))
    }

    #[test]
    fn test_single_fast_subscriber_passes_through() {
        let scheduler = TestScheduler::new();
        let subject = subject_on(&scheduler);
        let sink = TestObserver::immediate();
        let _sub = subject.observe(ObserverInfo::new(sink.observer()));

        assert!(matches!(
            subject.on_next(Batch::from_vec(vec![1])),
            Ack::Continue
        ));
        assert!(matches!(
            subject.on_next(Batch::from_vec(vec![2])),
            Ack::Continue
        ));
        subject.on_completed();

        assert_eq!(sink.received(), vec![1, 2]);
        assert!(sink.is_completed());
    }

    #[test]
    fn test_fast_subscriber_releases_producer_while_slow_one_buffers() {
        let scheduler = TestScheduler::new();
        let subject = subject_on(&scheduler);
        let fast = TestObserver::immediate();
        let slow = TestObserver::holding();
        let _fast_sub = subject.observe(ObserverInfo::new(fast.observer()));
        let _slow_sub = subject.observe(ObserverInfo::new(slow.observer()));

        // The fast subscriber answers Continue: the producer is released even
        // though the slow one holds its ack.
        let ack = subject.on_next(Batch::from_vec(vec![1]));
        assert!(matches!(ack, Ack::Continue));
        let ack = subject.on_next(Batch::from_vec(vec![2]));
        assert!(matches!(ack, Ack::Continue));
        let ack = subject.on_next(Batch::from_vec(vec![3]));
        assert!(matches!(ack, Ack::Continue));

        assert_eq!(fast.received(), vec![1, 2, 3]);
        assert_eq!(slow.received(), vec![1]);

        // The slow subscriber catches up through the fast loop.
        assert!(slow.ack_continue());
        scheduler.tick();
        // Its scripted acks keep holding, one release per element.
        assert_eq!(slow.received(), vec![1, 2]);
        assert!(slow.ack_continue());
        scheduler.tick();
        assert_eq!(slow.received(), vec![1, 2, 3]);
    }

    #[test]
    fn test_buffer_dequeues_when_slowest_catches_up() {
        let scheduler = TestScheduler::new();
        let subject = subject_on(&scheduler);
        let fast = TestObserver::immediate();
        let slow = TestObserver::holding();
        let _fast_sub = subject.observe(ObserverInfo::new(fast.observer()));
        let _slow_sub = subject.observe(ObserverInfo::new(slow.observer()));

        let _ = subject.on_next(Batch::from_vec(vec![1]));
        let _ = subject.on_next(Batch::from_vec(vec![2]));
        let _ = subject.on_next(Batch::from_vec(vec![3]));

        let (first, last) = subject.buffer_range();
        assert_eq!((first, last), (0, 3));

        while slow.ack_continue() {
            scheduler.tick();
        }
        scheduler.tick();
        assert_eq!(slow.received(), vec![1, 2, 3]);

        let (first, last) = subject.buffer_range();
        assert_eq!(first, 3);
        assert_eq!(last, 3);
    }

    #[test]
    fn test_producer_blocked_until_any_subscriber_continues() {
        let scheduler = TestScheduler::new();
        let subject = subject_on(&scheduler);
        let slow = TestObserver::holding();
        let _sub = subject.observe(ObserverInfo::new(slow.observer()));

        let ack = subject.on_next(Batch::from_vec(vec![1]));
        assert_eq!(ack.value(), None);

        assert!(slow.ack_continue());
        scheduler.tick();
        assert_eq!(ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_late_subscriber_after_completion_gets_completed() {
        let scheduler = TestScheduler::new();
        let subject = subject_on(&scheduler);
        let early = TestObserver::immediate();
        let _early_sub = subject.observe(ObserverInfo::new(early.observer()));

        let _ = subject.on_next(Batch::from_vec(vec![1]));
        subject.on_completed();

        let late = TestObserver::<i64>::immediate();
        let _late_sub = subject.observe(ObserverInfo::new(late.observer()));
        scheduler.tick();
        assert!(late.is_completed());
    }
}
