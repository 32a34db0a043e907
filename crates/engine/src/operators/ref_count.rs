// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Shared (hot) multicast with reference counting.
//!
//! The first subscription connects the upstream into a cached-serve-first
//! subject; later subscriptions attach to the same running execution. When
//! the last subscriber disposes, the upstream subscription is torn down and
//! the subject dropped, so an unused shared flowable holds no buffers.

use crate::disposable::{Disposable, SingleAssignmentDisposable};
use crate::error::Error;
use crate::flowable::FlowableSource;
use crate::observable::Observable;
use crate::observer::{Observer, ObserverInfo};
use crate::subject::cached_serve_first::CachedServeFirstSubject;
use crate::subscriber::Subscriber;
use crate::subscription::{BaseAndSelectors, FlowSubscription};
use parking_lot::Mutex;
use std::sync::Arc;

struct RefCountState<T> {
    subject: Option<CachedServeFirstSubject<T>>,
    info: BaseAndSelectors,
    upstream: Option<Disposable>,
    count: usize,
}

/// Hot flowable sharing one upstream execution between subscribers.
pub struct RefCountFlowable<T> {
    source: Arc<dyn FlowableSource<T>>,
    state: Arc<Mutex<RefCountState<T>>>,
}

impl<T> RefCountFlowable<T> {
    /// Wraps `source`; nothing is subscribed until the first subscriber
    /// arrives.
    #[must_use]
    pub fn new(source: Arc<dyn FlowableSource<T>>) -> Self {
        RefCountFlowable {
            source,
            state: Arc::new(Mutex::new(RefCountState {
                subject: None,
                info: BaseAndSelectors::none(),
                upstream: None,
                count: 0,
            })),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FlowableSource<T> for RefCountFlowable<T> {
    fn is_hot(&self) -> bool {
        true
    }

    fn unsafe_subscribe(&self, subscriber: &Subscriber) -> Result<FlowSubscription<T>, Error> {
        let (subject, info) = {
            let mut state = self.state.lock();
            if state.subject.is_none() {
                let subject = CachedServeFirstSubject::new(subscriber.scheduler.clone());
                let subscription = self.source.unsafe_subscribe(subscriber)?;
                state.info = subscription.info.clone();

                let producer = Arc::new(subject.clone()) as Arc<dyn Observer<T>>;
                let slot = SingleAssignmentDisposable::new();
                let deferred = slot.clone();
                let observable = subscription.observable;
                subscriber.subscribe_scheduler.schedule(Box::new(move || {
                    deferred.set(observable.observe(ObserverInfo::new(producer)));
                }));
                state.upstream = Some(slot.into_disposable());
                state.subject = Some(subject);
            }
            state.count += 1;
            match &state.subject {
                Some(subject) => (subject.clone(), state.info.clone()),
                None => unreachable!("subject assigned above"),
            }
        };

        let observable = Arc::new(RefCountObservable {
            subject,
            state: self.state.clone(),
        });
        Ok(FlowSubscription::with_info(observable, info))
    }
}

struct RefCountObservable<T> {
    subject: CachedServeFirstSubject<T>,
    state: Arc<Mutex<RefCountState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for RefCountObservable<T> {
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let inner = self.subject.observe(info);
        let state = self.state.clone();
        Disposable::new(move || {
            inner.dispose();
            let (upstream, subject) = {
                let mut state = state.lock();
                state.count = state.count.saturating_sub(1);
                if state.count == 0 {
                    (state.upstream.take(), state.subject.take())
                } else {
                    (None, None)
                }
            };
            if let Some(upstream) = upstream {
                upstream.dispose();
            }
            if let Some(subject) = subject {
                subject.dispose();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowable::Flowable;
    use crate::testing::observer::TestObserver;

    #[test]
    fn test_share_multicasts_one_execution() {
        let shared = Flowable::from_iterable(vec![1, 2, 3]).share();
        assert!(shared.is_hot());

        let a = TestObserver::immediate();
        let sub_a = shared.subscribe(a.observer()).expect("subscribe a");
        // The cold upstream drains into the subject on the trampoline; the
        // first subscriber sees everything.
        assert_eq!(a.received(), vec![1, 2, 3]);
        assert!(a.is_completed());
        sub_a.dispose();
    }

    #[test]
    fn test_last_disposal_tears_down() {
        let shared = crate::flowable::range(0..1000).share();
        let a = TestObserver::holding();
        let sub_a = shared.subscribe(a.observer()).expect("subscribe a");
        assert_eq!(a.received(), vec![0]);

        sub_a.dispose();
        // A new subscription restarts the upstream from scratch.
        let b = TestObserver::holding();
        let _sub_b = shared.subscribe(b.observer()).expect("subscribe b");
        assert_eq!(b.received(), vec![0]);
    }
}
