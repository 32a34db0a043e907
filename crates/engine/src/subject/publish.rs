// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Non-caching multicast.
//!
//! Forwards each batch to the subscribers registered at that moment; late
//! subscribers miss earlier elements. The producer is back-pressured by the
//! conjunctive merge of all subscriber acks, so it runs at the pace of the
//! slowest subscriber. A subscriber answering `Stop` is removed; the
//! producer sees `Stop` only once no subscriber remains.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::FlowError;
use crate::observable::Observable;
use crate::observer::{Observer, ObserverInfo, ObserverRef};
use ackflow_ack::{ops, Ack, AckKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct PublishState<T> {
    subscribers: HashMap<u64, ObserverRef<T>>,
    next_id: u64,
    stopped: bool,
}

/// Plain fan-out subject.
pub struct PublishSubject<T> {
    state: Arc<Mutex<PublishState<T>>>,
}

impl<T> Clone for PublishSubject<T> {
    fn clone(&self) -> Self {
        PublishSubject {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for PublishSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> PublishSubject<T> {
    /// Creates a subject with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        PublishSubject {
            state: Arc::new(Mutex::new(PublishState {
                subscribers: HashMap::new(),
                next_id: 0,
                stopped: false,
            })),
        }
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    fn snapshot(&self) -> Vec<(u64, ObserverRef<T>)> {
        self.state
            .lock()
            .subscribers
            .iter()
            .map(|(id, observer)| (*id, observer.clone()))
            .collect()
    }
}

impl<T: Clone + Send + Sync + 'static> Observer<T> for PublishSubject<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let values = match batch.try_materialize() {
            Ok(values) => values,
            Err(error) => {
                self.on_error(error);
                return Ack::Stop;
            }
        };
        let subscribers = self.snapshot();
        if self.state.lock().stopped {
            return Ack::Stop;
        }
        if subscribers.is_empty() {
            // No audience: drop the batch, ask for more.
            return Ack::Continue;
        }

        let mut acks = Vec::with_capacity(subscribers.len());
        for (id, observer) in subscribers {
            let ack = observer.on_next(Batch::from_vec(values.clone()));
            let state = self.state.clone();
            ack.subscribe(move |kind| {
                if kind == AckKind::Stop {
                    let _ = state.lock().subscribers.remove(&id);
                }
            });
            acks.push(ack);
        }

        let live = acks
            .iter()
            .filter(|ack| !matches!(ack.value(), Some(AckKind::Stop)))
            .cloned()
            .collect::<Vec<_>>();
        if live.is_empty() {
            return Ack::Stop;
        }
        ops::merge_all(live)
    }

    fn on_error(&self, error: FlowError) {
        let subscribers = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.subscribers.drain().collect::<Vec<_>>()
        };
        for (_, observer) in subscribers {
            observer.on_error(error.clone());
        }
    }

    fn on_completed(&self) {
        let subscribers = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.subscribers.drain().collect::<Vec<_>>()
        };
        for (_, observer) in subscribers {
            observer.on_completed();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for PublishSubject<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let id = {
            let mut state = self.state.lock();
            if state.stopped {
                drop(state);
                info.observer.on_completed();
                return Disposable::empty();
            }
            let id = state.next_id;
            state.next_id += 1;
            let _ = state.subscribers.insert(id, info.observer.clone());
            id
        };
        let state = self.state.clone();
        Disposable::new(move || {
            let _ = state.lock().subscribers.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;

    #[test]
    fn test_fan_out_and_merged_ack() {
        let subject = PublishSubject::new();
        let a = TestObserver::immediate();
        let b = TestObserver::holding();
        let _sa = subject.observe(ObserverInfo::new(a.observer()));
        let _sb = subject.observe(ObserverInfo::new(b.observer()));

        let ack = subject.on_next(Batch::from_vec(vec![1]));
        assert_eq!(a.received(), vec![1]);
        assert_eq!(b.received(), vec![1]);
        // Conjunctive: the producer waits for the slow subscriber.
        assert_eq!(ack.value(), None);

        assert!(b.ack_continue());
        assert_eq!(ack.value(), Some(AckKind::Continue));
    }

    #[test]
    fn test_late_subscriber_misses_earlier_elements() {
        let subject = PublishSubject::new();
        let early = TestObserver::immediate();
        let _se = subject.observe(ObserverInfo::new(early.observer()));
        let _ = subject.on_next(Batch::from_vec(vec![1]));

        let late = TestObserver::immediate();
        let _sl = subject.observe(ObserverInfo::new(late.observer()));
        let _ = subject.on_next(Batch::from_vec(vec![2]));

        assert_eq!(early.received(), vec![1, 2]);
        assert_eq!(late.received(), vec![2]);
    }

    #[test]
    fn test_stopping_subscriber_is_removed() {
        let subject = PublishSubject::new();
        let stopper = TestObserver::stopping();
        let keeper = TestObserver::immediate();
        let _ss = subject.observe(ObserverInfo::new(stopper.observer()));
        let _sk = subject.observe(ObserverInfo::new(keeper.observer()));

        let ack = subject.on_next(Batch::from_vec(vec![1]));
        assert!(matches!(ack, Ack::Continue));
        assert_eq!(subject.subscriber_count(), 1);
    }
}
