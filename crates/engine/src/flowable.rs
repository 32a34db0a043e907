// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! The fluent composition surface.
//!
//! A [`Flowable`] is a recipe: composing operators builds the graph eagerly,
//! subscribing builds the observer chains. `unsafe_subscribe` is the
//! recursive entry of the handshake — each operator subscribes its upstream,
//! wraps the returned observable, and negotiates base/selector metadata.
//! Cold flowables build fresh state per subscription; hot ones (see
//! [`Flowable::share`]) multicast one running execution and are rejected by
//! `flat_map`.

use crate::batch::BatchIter;
use crate::disposable::{Disposable, SingleAssignmentDisposable};
use crate::error::{Error, FlowError};
use crate::observable::ObservableRef;
use crate::observer::{ObserverInfo, ObserverRef};
use crate::operators::buffer::BufferObservable;
use crate::operators::concat::ConcatObservable;
use crate::operators::controlled_zip::ControlledZipObservable;
use crate::operators::debug::{DebugObservable, OnAckHook, OnNextHook, OnSubscribeHook};
use crate::operators::filter::{FilterObservable, FilterWithIndexObservable};
use crate::operators::first::{FirstObservable, RaiseExceptionHook};
use crate::operators::flat_map::FlatMapObservable;
use crate::operators::map::{MapObservable, MapToIteratorObservable};
use crate::operators::merge::MergeObservable;
use crate::operators::observe_on::ObserveOnObservable;
use crate::operators::pairwise::PairwiseObservable;
use crate::operators::reduce::ReduceObservable;
use crate::operators::ref_count::RefCountFlowable;
use crate::operators::repeat_first::RepeatFirstObservable;
use crate::operators::scan::ScanObservable;
use crate::operators::to_list::ToListObservable;
use crate::operators::window::{WindowObservable, WindowPredicate};
use crate::operators::zip::ZipObservable;
use crate::operators::zip_with_index::ZipWithIndexObservable;
use crate::scheduler::SchedulerRef;
use crate::sources::{EmptyObservable, IteratorSourceObservable};
use crate::subscriber::Subscriber;
use crate::subscription::{Base, BaseAndSelectors, FlowSubscription};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A subscribable recipe producing a stream of `T` batches.
pub trait FlowableSource<T>: Send + Sync {
    /// The recursive subscription entry: builds this node's observable atop
    /// its upstream's.
    fn unsafe_subscribe(&self, subscriber: &Subscriber) -> Result<FlowSubscription<T>, Error>;

    /// Whether subscriptions share one running execution.
    fn is_hot(&self) -> bool {
        false
    }
}

struct AnonymousFlowable<T> {
    subscribe_fn: Box<dyn Fn(&Subscriber) -> Result<FlowSubscription<T>, Error> + Send + Sync>,
    hot: bool,
}

impl<T> FlowableSource<T> for AnonymousFlowable<T> {
    fn unsafe_subscribe(&self, subscriber: &Subscriber) -> Result<FlowSubscription<T>, Error> {
        (self.subscribe_fn)(subscriber)
    }

    fn is_hot(&self) -> bool {
        self.hot
    }
}

/// Handle to a composable flowable.
pub struct Flowable<T> {
    source: Arc<dyn FlowableSource<T>>,
}

impl<T> Clone for Flowable<T> {
    fn clone(&self) -> Self {
        Flowable {
            source: self.source.clone(),
        }
    }
}

fn numerical_min(left: &BaseAndSelectors, right: &BaseAndSelectors) -> Option<Base> {
    match (&left.base, &right.base) {
        (Some(Base::Numerical(a)), Some(Base::Numerical(b))) => {
            Some(Base::Numerical((*a).min(*b)))
        }
        _ => None,
    }
}

impl<T: Clone + Send + Sync + 'static> Flowable<T> {
    /// Wraps an existing source.
    #[must_use]
    pub fn from_source(source: Arc<dyn FlowableSource<T>>) -> Self {
        Flowable { source }
    }

    fn from_fn<F>(subscribe_fn: F) -> Self
    where
        F: Fn(&Subscriber) -> Result<FlowSubscription<T>, Error> + Send + Sync + 'static,
    {
        Flowable {
            source: Arc::new(AnonymousFlowable {
                subscribe_fn: Box::new(subscribe_fn),
                hot: false,
            }),
        }
    }

    /// Wraps an already running observable (a subject); the result is hot.
    #[must_use]
    pub fn from_hot_observable(observable: ObservableRef<T>) -> Self {
        Flowable {
            source: Arc::new(AnonymousFlowable {
                subscribe_fn: Box::new(move |_subscriber| {
                    Ok(FlowSubscription::new(observable.clone()))
                }),
                hot: true,
            }),
        }
    }

    // ---- sources -------------------------------------------------------

    /// Emits every element of `values`, one batch per element.
    #[must_use]
    pub fn from_iterable(values: Vec<T>) -> Self {
        let count = values.len();
        Flowable::from_fn(move |subscriber| {
            let values = values.clone();
            let observable = IteratorSourceObservable::new(
                move || Box::new(values.clone().into_iter()) as BatchIter<T>,
                subscriber.subscribe_scheduler.clone(),
                1,
            );
            Ok(FlowSubscription::with_info(
                Arc::new(observable),
                BaseAndSelectors::with_base(Base::Numerical(count)),
            ))
        })
    }

    /// Emits a single element.
    #[must_use]
    pub fn return_value(value: T) -> Self {
        Flowable::from_iterable(vec![value])
    }

    /// Completes immediately with no elements.
    #[must_use]
    pub fn empty() -> Self {
        Flowable::from_fn(|subscriber| {
            Ok(FlowSubscription::with_info(
                Arc::new(EmptyObservable::new(subscriber.subscribe_scheduler.clone())),
                BaseAndSelectors::with_base(Base::Numerical(0)),
            ))
        })
    }

    // ---- subscription --------------------------------------------------

    /// The recursive subscription entry.
    pub fn unsafe_subscribe(
        &self,
        subscriber: &Subscriber,
    ) -> Result<FlowSubscription<T>, Error> {
        self.source.unsafe_subscribe(subscriber)
    }

    /// Whether this flowable multicasts one running execution.
    #[must_use]
    pub fn is_hot(&self) -> bool {
        self.source.is_hot()
    }

    /// Subscribes on the current-thread trampoline.
    pub fn subscribe(&self, observer: ObserverRef<T>) -> Result<Disposable, Error> {
        self.subscribe_with(observer, &Subscriber::trampoline())
    }

    /// Subscribes with an explicit subscriber context.
    pub fn subscribe_with(
        &self,
        observer: ObserverRef<T>,
        subscriber: &Subscriber,
    ) -> Result<Disposable, Error> {
        let subscription = self.unsafe_subscribe(subscriber)?;
        let slot = SingleAssignmentDisposable::new();
        let deferred = slot.clone();
        let observable = subscription.observable;
        subscriber.subscribe_scheduler.schedule(Box::new(move || {
            deferred.set(observable.observe(ObserverInfo::new(observer)));
        }));
        Ok(slot.into_disposable())
    }

    // ---- element-wise operators ---------------------------------------

    /// Applies `func` to every element.
    #[must_use]
    pub fn map<U, F>(&self, func: F) -> Flowable<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + Clone + 'static,
    {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(MapObservable::new(subscription.observable, func.clone())),
                subscription.info,
            ))
        })
    }

    /// Maps every element to an iterator, flattened into the batch.
    #[must_use]
    pub fn map_to_iterator<U, F>(&self, func: F) -> Flowable<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> BatchIter<U> + Send + Sync + Clone + 'static,
    {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::new(Arc::new(
                MapToIteratorObservable::new(subscription.observable, func.clone()),
            )))
        })
    }

    /// Keeps elements satisfying `pred`. The base is cleared: the element
    /// count is no longer known.
    #[must_use]
    pub fn filter<F>(&self, pred: F) -> Flowable<T>
    where
        F: Fn(&T) -> bool + Send + Sync + Clone + 'static,
    {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::new(Arc::new(FilterObservable::new(
                subscription.observable,
                pred.clone(),
            ))))
        })
    }

    /// Keeps elements whose running index satisfies `pred`.
    #[must_use]
    pub fn filter_with_index<F>(&self, pred: F) -> Flowable<T>
    where
        F: Fn(usize, &T) -> bool + Send + Sync + Clone + 'static,
    {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::new(Arc::new(
                FilterWithIndexObservable::new(subscription.observable, pred.clone()),
            )))
        })
    }

    /// Running fold emitting every intermediate accumulator.
    #[must_use]
    pub fn scan<A, F>(&self, func: F, initial: A) -> Flowable<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(&A, T) -> A + Send + Sync + Clone + 'static,
    {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(ScanObservable::new(
                    subscription.observable,
                    func.clone(),
                    initial.clone(),
                )),
                subscription.info,
            ))
        })
    }

    /// Consecutive pairs.
    #[must_use]
    pub fn pairwise(&self) -> Flowable<(T, T)> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::new(Arc::new(PairwiseObservable::new(
                subscription.observable,
            ))))
        })
    }

    /// Pairs every element with its running index.
    #[must_use]
    pub fn zip_with_index(&self) -> Flowable<(T, usize)> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(ZipWithIndexObservable::new(subscription.observable)),
                subscription.info,
            ))
        })
    }

    // ---- terminal-ish operators ---------------------------------------

    /// Forwards the first element, completes, stops the upstream.
    #[must_use]
    pub fn first(&self) -> Flowable<T> {
        self.first_inner(None)
    }

    /// Like [`Flowable::first`], routing the empty-sequence failure through
    /// `hook`.
    #[must_use]
    pub fn first_or_raise(&self, hook: RaiseExceptionHook) -> Flowable<T> {
        self.first_inner(Some(hook))
    }

    fn first_inner(&self, hook: Option<RaiseExceptionHook>) -> Flowable<T> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            let mut info = subscription.info;
            info.base = Some(Base::Numerical(1));
            Ok(FlowSubscription::with_info(
                Arc::new(FirstObservable::new(subscription.observable, hook.clone())),
                info,
            ))
        })
    }

    /// Collects everything into one list.
    #[must_use]
    pub fn to_list(&self) -> Flowable<Vec<T>> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(ToListObservable::new(subscription.observable)),
                BaseAndSelectors::with_base(Base::Numerical(1)),
            ))
        })
    }

    /// Folds the whole stream into one value.
    #[must_use]
    pub fn reduce<A, F>(&self, func: F, initial: A) -> Flowable<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + Clone + 'static,
    {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(ReduceObservable::new(
                    subscription.observable,
                    func.clone(),
                    initial.clone(),
                )),
                BaseAndSelectors::with_base(Base::Numerical(1)),
            ))
        })
    }

    /// Re-emits the first element in fixed-size batches forever.
    #[must_use]
    pub fn repeat_first(&self, batch_size: usize) -> Flowable<T> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::new(Arc::new(RepeatFirstObservable::new(
                subscription.observable,
                subscriber.scheduler.clone(),
                batch_size,
            ))))
        })
    }

    // ---- flow-control operators ---------------------------------------

    /// Bounded decoupling queue between this flowable and the consumer.
    #[must_use]
    pub fn buffer(&self, capacity: usize) -> Flowable<T> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(BufferObservable::new(
                    subscription.observable,
                    subscriber.subscribe_scheduler.clone(),
                    capacity,
                )),
                subscription.info,
            ))
        })
    }

    /// Delivers downstream events on `scheduler`.
    #[must_use]
    pub fn observe_on(&self, scheduler: SchedulerRef) -> Flowable<T> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(ObserveOnObservable::new(
                    subscription.observable,
                    scheduler.clone(),
                )),
                subscription.info,
            ))
        })
    }

    /// Runs subscription-time actions (source emission loops) on
    /// `scheduler`.
    #[must_use]
    pub fn execute_on(&self, scheduler: SchedulerRef) -> Flowable<T> {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            let rerouted =
                Subscriber::new(subscriber.scheduler.clone(), scheduler.clone());
            source.unsafe_subscribe(&rerouted)
        })
    }

    /// Logging tap; see [`DebugObservable`].
    #[must_use]
    pub fn debug(
        &self,
        name: &str,
        on_next: Option<OnNextHook<T>>,
        on_subscribe: Option<OnSubscribeHook>,
        on_ack: Option<OnAckHook>,
    ) -> Flowable<T> {
        let source = self.clone();
        let name = name.to_owned();
        Flowable::from_fn(move |subscriber| {
            let subscription = source.unsafe_subscribe(subscriber)?;
            Ok(FlowSubscription::with_info(
                Arc::new(DebugObservable::new(
                    subscription.observable,
                    &name,
                    on_next.clone(),
                    on_subscribe.clone(),
                    on_ack.clone(),
                )),
                subscription.info,
            ))
        })
    }

    // ---- multi-source operators ---------------------------------------

    /// Emits elements from both flowables in arrival order.
    #[must_use]
    pub fn merge(&self, other: &Flowable<T>) -> Flowable<T> {
        let left = self.clone();
        let right = other.clone();
        Flowable::from_fn(move |subscriber| {
            let left_sub = left.unsafe_subscribe(subscriber)?;
            let right_sub = right.unsafe_subscribe(subscriber)?;
            let info = left_sub.info.merge(right_sub.info);
            Ok(FlowSubscription::with_info(
                Arc::new(MergeObservable::new(
                    left_sub.observable,
                    right_sub.observable,
                )),
                BaseAndSelectors {
                    base: None,
                    selectors: info.selectors,
                },
            ))
        })
    }

    /// Emits this flowable's elements, then each of `others` in turn.
    #[must_use]
    pub fn concat(&self, others: &[Flowable<T>]) -> Flowable<T> {
        let mut sources = vec![self.clone()];
        sources.extend(others.iter().cloned());
        Flowable::from_fn(move |subscriber| {
            let mut observables = Vec::with_capacity(sources.len());
            let mut total = Some(0usize);
            for source in &sources {
                let subscription = source.unsafe_subscribe(subscriber)?;
                total = match (total, &subscription.info.base) {
                    (Some(sum), Some(Base::Numerical(n))) => Some(sum + n),
                    _ => None,
                };
                observables.push(subscription.observable);
            }
            let info = match total {
                Some(n) => BaseAndSelectors::with_base(Base::Numerical(n)),
                None => BaseAndSelectors::none(),
            };
            Ok(FlowSubscription::with_info(
                Arc::new(ConcatObservable::new(
                    observables,
                    subscriber.subscribe_scheduler.clone(),
                )),
                info,
            ))
        })
    }

    /// Pairs elements strictly in index order.
    #[must_use]
    pub fn zip<U>(&self, other: &Flowable<U>) -> Flowable<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        Flowable::from_fn(move |subscriber| {
            let left_sub = left.unsafe_subscribe(subscriber)?;
            let right_sub = right.unsafe_subscribe(subscriber)?;
            let base = numerical_min(&left_sub.info, &right_sub.info);
            let info = left_sub.info.merge(right_sub.info);
            Ok(FlowSubscription::with_info(
                Arc::new(ZipObservable::new(
                    left_sub.observable,
                    right_sub.observable,
                )),
                BaseAndSelectors {
                    base,
                    selectors: info.selectors,
                },
            ))
        })
    }

    /// Pairs elements under user-controlled consumption; see
    /// [`ControlledZipObservable`].
    #[must_use]
    pub fn controlled_zip<U, FL, FR, FM>(
        &self,
        other: &Flowable<U>,
        request_left: FL,
        request_right: FR,
        match_func: FM,
    ) -> Flowable<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
        FL: Fn(&T, &U) -> bool + Send + Sync + 'static,
        FR: Fn(&T, &U) -> bool + Send + Sync + 'static,
        FM: Fn(&T, &U) -> bool + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        let request_left: Arc<dyn Fn(&T, &U) -> bool + Send + Sync> = Arc::new(request_left);
        let request_right: Arc<dyn Fn(&T, &U) -> bool + Send + Sync> = Arc::new(request_right);
        let match_func: Arc<dyn Fn(&T, &U) -> bool + Send + Sync> = Arc::new(match_func);
        Flowable::from_fn(move |subscriber| {
            let left_sub = left.unsafe_subscribe(subscriber)?;
            let right_sub = right.unsafe_subscribe(subscriber)?;
            let info = left_sub.info.merge(right_sub.info);
            Ok(FlowSubscription::with_info(
                Arc::new(ControlledZipObservable::new(
                    left_sub.observable,
                    right_sub.observable,
                    request_left.clone(),
                    request_right.clone(),
                    match_func.clone(),
                )),
                BaseAndSelectors {
                    base: None,
                    selectors: info.selectors,
                },
            ))
        })
    }

    /// Zips element-wise using base metadata instead of runtime comparison.
    ///
    /// Subscription fails with [`Error::BaseMismatch`] when neither equal
    /// bases nor a registered selector align the two sides.
    #[must_use]
    pub fn match_with<U>(&self, other: &Flowable<U>) -> Flowable<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        Flowable::from_fn(move |subscriber| {
            let left_sub = left.unsafe_subscribe(subscriber)?;
            let right_sub = right.unsafe_subscribe(subscriber)?;
            if !left_sub.info.matches(&right_sub.info) {
                return Err(Error::BaseMismatch {
                    left: left_sub
                        .info
                        .base
                        .as_ref()
                        .map_or_else(|| "<none>".to_owned(), ToString::to_string),
                    right: right_sub
                        .info
                        .base
                        .as_ref()
                        .map_or_else(|| "<none>".to_owned(), ToString::to_string),
                });
            }
            let base = numerical_min(&left_sub.info, &right_sub.info);
            let info = left_sub.info.merge(right_sub.info);
            Ok(FlowSubscription::with_info(
                Arc::new(ZipObservable::new(
                    left_sub.observable,
                    right_sub.observable,
                )),
                BaseAndSelectors {
                    base,
                    selectors: info.selectors,
                },
            ))
        })
    }

    /// Maps every element to a flowable and concatenates their outputs.
    ///
    /// Hot flowables cannot be flattened: a hot outer source fails at
    /// subscribe time, a hot inner is rejected when produced.
    #[must_use]
    pub fn flat_map<U, F>(&self, func: F) -> Flowable<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Flowable<U> + Send + Sync + Clone + 'static,
    {
        let source = self.clone();
        Flowable::from_fn(move |subscriber| {
            if source.is_hot() {
                return Err(Error::HotFlattenAttempt);
            }
            let subscription = source.unsafe_subscribe(subscriber)?;
            let func = func.clone();
            let inner_subscriber = subscriber.clone();
            let selector = move |element: T| -> Result<ObservableRef<U>, FlowError> {
                let inner = std::panic::catch_unwind(AssertUnwindSafe(|| func(element)))
                    .map_err(FlowError::from_panic)?;
                if inner.is_hot() {
                    return Err(FlowError::HotFlatten);
                }
                match inner.unsafe_subscribe(&inner_subscriber) {
                    Ok(subscription) => Ok(subscription.observable),
                    Err(Error::HotFlattenAttempt) => Err(FlowError::HotFlatten),
                    Err(error) => Err(FlowError::User {
                        message: error.to_string(),
                    }),
                }
            };
            Ok(FlowSubscription::new(Arc::new(FlatMapObservable::new(
                subscription.observable,
                subscriber.subscribe_scheduler.clone(),
                selector,
            ))))
        })
    }

    /// Multicasts one execution of this flowable to every subscriber.
    #[must_use]
    pub fn share(&self) -> Flowable<T> {
        Flowable {
            source: Arc::new(RefCountFlowable::new(self.source.clone())),
        }
    }

    /// Groups `other`'s elements into one window per element of `self`.
    #[must_use]
    pub fn window<R>(
        &self,
        other: &Flowable<R>,
        is_lower: WindowPredicate<T, R>,
        is_higher: WindowPredicate<T, R>,
    ) -> Flowable<(T, Flowable<R>)>
    where
        R: Clone + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        Flowable::from_fn(move |subscriber| {
            let left_sub = left.unsafe_subscribe(subscriber)?;
            let right_sub = right.unsafe_subscribe(subscriber)?;
            let windows = WindowObservable::new(
                left_sub.observable,
                right_sub.observable,
                is_lower.clone(),
                is_higher.clone(),
            );
            let as_flowables = MapObservable::new(
                Arc::new(windows) as ObservableRef<(T, crate::subject::publish::PublishSubject<R>)>,
                |(left_val, subject)| {
                    (left_val, Flowable::from_hot_observable(Arc::new(subject)))
                },
            );
            Ok(FlowSubscription::new(Arc::new(as_flowables)))
        })
    }
}

/// Flowable over `i64` ranges, one batch per element.
#[must_use]
pub fn range(range: std::ops::Range<i64>) -> Flowable<i64> {
    let count = usize::try_from(range.end.saturating_sub(range.start).max(0)).unwrap_or(0);
    Flowable::from_fn(move |subscriber| {
        let range = range.clone();
        let observable = IteratorSourceObservable::new(
            move || Box::new(range.clone()) as BatchIter<i64>,
            subscriber.subscribe_scheduler.clone(),
            1,
        );
        Ok(FlowSubscription::with_info(
            Arc::new(observable),
            BaseAndSelectors::with_base(Base::Numerical(count)),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::observer::TestObserver;

    #[test]
    fn test_range_subscribe_collects_everything() {
        let sink = TestObserver::immediate();
        let _sub = range(0..5).subscribe(sink.observer()).expect("subscribe");

        assert_eq!(sink.received(), vec![0, 1, 2, 3, 4]);
        assert!(sink.is_completed());
    }

    #[test]
    fn test_map_filter_chain() {
        let sink = TestObserver::immediate();
        let _sub = range(0..10)
            .map(|x| x * 2)
            .filter(|x| x % 3 == 0)
            .subscribe(sink.observer())
            .expect("subscribe");

        assert_eq!(sink.received(), vec![0, 6, 12, 18]);
    }

    #[test]
    fn test_match_with_equal_bases() {
        let sink = TestObserver::immediate();
        let left = Flowable::from_iterable(vec![1, 2, 3]);
        let right = Flowable::from_iterable(vec![10, 20, 30]);
        let _sub = left
            .match_with(&right)
            .subscribe(sink.observer())
            .expect("subscribe");

        assert_eq!(sink.received(), vec![(1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    fn test_match_with_differing_bases_fails() {
        let sink = TestObserver::<(i64, i64)>::immediate();
        let left = Flowable::from_iterable(vec![1, 2, 3]);
        let right = Flowable::from_iterable(vec![10, 20]);
        let result = left.match_with(&right).subscribe(sink.observer());

        assert!(matches!(result, Err(Error::BaseMismatch { .. })));
    }

    #[test]
    fn test_flat_map_on_hot_source_fails_at_subscribe() {
        let sink = TestObserver::<i64>::immediate();
        let hot = range(0..3).share();
        let result = hot
            .flat_map(|x| Flowable::return_value(x))
            .subscribe(sink.observer());

        assert!(matches!(result, Err(Error::HotFlattenAttempt)));
    }
}
