// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Bridge to and from `futures` streams.
//!
//! [`Flowable::into_stream`] exposes a pipeline as a [`futures::Stream`] and
//! discards back-pressure: every batch is acknowledged with an immediate
//! `Continue` and parked in an unbounded queue until the stream is polled.
//! [`Flowable::from_stream`] lifts a stream into a flowable by pulling it on
//! a dedicated thread behind a [`BackpressureBufferedObserver`], which
//! reintroduces a bounded buffer between the uncontrolled stream and the
//! ack-driven pipeline.

use crate::batch::Batch;
use crate::disposable::Disposable;
use crate::error::{Error, FlowError};
use crate::flowable::Flowable;
use crate::observable::Observable;
use crate::observer::{Observer, ObserverInfo};
use crate::observers::buffered::BackpressureBufferedObserver;
use crate::subscription::FlowSubscription;
use ackflow_ack::{Ack, AckKind};
use futures::stream::StreamExt;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct StreamShared<T> {
    queue: Mutex<VecDeque<Result<T, FlowError>>>,
    done: Mutex<bool>,
    waker: Mutex<Option<Waker>>,
}

impl<T> StreamShared<T> {
    fn wake(&self) {
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

struct StreamSink<T> {
    shared: Arc<StreamShared<T>>,
}

impl<T: Send + 'static> Observer<T> for StreamSink<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        match batch.try_materialize() {
            Ok(values) => {
                let mut queue = self.shared.queue.lock();
                queue.extend(values.into_iter().map(Ok));
            }
            Err(error) => {
                self.shared.queue.lock().push_back(Err(error));
                *self.shared.done.lock() = true;
                self.shared.wake();
                return Ack::Stop;
            }
        }
        self.shared.wake();
        Ack::Continue
    }

    fn on_error(&self, error: FlowError) {
        self.shared.queue.lock().push_back(Err(error));
        *self.shared.done.lock() = true;
        self.shared.wake();
    }

    fn on_completed(&self) {
        *self.shared.done.lock() = true;
        self.shared.wake();
    }
}

/// A flowable exposed as a [`futures::Stream`]; see
/// [`Flowable::into_stream`].
pub struct FlowStream<T> {
    shared: Arc<StreamShared<T>>,
    subscription: Disposable,
}

impl<T> Drop for FlowStream<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl<T> Stream for FlowStream<T> {
    type Item = Result<T, FlowError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.shared.queue.lock().pop_front() {
            return Poll::Ready(Some(item));
        }
        if *self.shared.done.lock() {
            return Poll::Ready(None);
        }
        *self.shared.waker.lock() = Some(cx.waker().clone());
        // Re-check: the producer may have raced the waker registration.
        if let Some(item) = self.shared.queue.lock().pop_front() {
            return Poll::Ready(Some(item));
        }
        if *self.shared.done.lock() {
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

impl<T: Clone + Send + Sync + 'static> Flowable<T> {
    /// Exposes the pipeline as a stream, discarding back-pressure.
    pub fn into_stream(&self) -> Result<FlowStream<T>, Error> {
        let shared = Arc::new(StreamShared {
            queue: Mutex::new(VecDeque::new()),
            done: Mutex::new(false),
            waker: Mutex::new(None),
        });
        let subscription = self.subscribe(Arc::new(StreamSink {
            shared: shared.clone(),
        }))?;
        Ok(FlowStream {
            shared,
            subscription,
        })
    }

    /// Lifts a stream into a flowable behind a bounded buffer of `capacity`
    /// batches.
    #[must_use]
    pub fn from_stream<S>(stream: S, capacity: usize) -> Flowable<T>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let stream = Arc::new(Mutex::new(Some(stream)));
        Flowable::from_source(Arc::new(FromStreamFlowable { stream, capacity }))
    }
}

struct FromStreamFlowable<S> {
    stream: Arc<Mutex<Option<S>>>,
    capacity: usize,
}

impl<T, S> crate::flowable::FlowableSource<T> for FromStreamFlowable<S>
where
    T: Clone + Send + Sync + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    fn unsafe_subscribe(
        &self,
        subscriber: &crate::subscriber::Subscriber,
    ) -> Result<FlowSubscription<T>, Error> {
        Ok(FlowSubscription::new(Arc::new(FromStreamObservable {
            stream: self.stream.clone(),
            scheduler: subscriber.subscribe_scheduler.clone(),
            capacity: self.capacity,
        })))
    }
}

struct FromStreamObservable<S> {
    stream: Arc<Mutex<Option<S>>>,
    scheduler: crate::scheduler::SchedulerRef,
    capacity: usize,
}

impl<T, S> Observable<T> for FromStreamObservable<S>
where
    T: Clone + Send + Sync + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    fn observe(&self, info: ObserverInfo<T>) -> Disposable {
        let Some(stream) = self.stream.lock().take() else {
            // A stream is a one-shot input; a second subscription sees an
            // empty flowable.
            info.observer.on_completed();
            return Disposable::empty();
        };
        let buffered = Arc::new(BackpressureBufferedObserver::new(
            info.observer,
            self.scheduler.clone(),
            self.capacity,
        ));
        let stop = crate::disposable::BooleanDisposable::new();
        let stop_flag = stop.clone();

        let spawned = std::thread::Builder::new()
            .name("ackflow-from-stream".to_owned())
            .spawn(move || {
                let mut stream = Box::pin(stream);
                loop {
                    if stop_flag.is_disposed() {
                        return;
                    }
                    let Some(item) = futures::executor::block_on(stream.next()) else {
                        buffered.on_completed();
                        return;
                    };
                    let ack = buffered.on_next(Batch::single(item));
                    match ack.value() {
                        Some(AckKind::Continue) => {}
                        Some(AckKind::Stop) => return,
                        None => {
                            // Wait out the buffer: hand the resolution back
                            // over a rendezvous channel.
                            let (tx, rx) = flume::bounded(1);
                            ack.subscribe(move |kind| {
                                let _ = tx.send(kind);
                            });
                            match rx.recv() {
                                Ok(AckKind::Continue) => {}
                                _ => return,
                            }
                        }
                    }
                }
            });
        drop(spawned);

        Disposable::new(move || stop.dispose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowable::range;

    #[test]
    fn test_into_stream_yields_everything() {
        let stream = range(0..5).into_stream().expect("stream");
        let items: Vec<i64> = futures::executor::block_on(
            stream.map(|item| item.expect("element")).collect::<Vec<_>>(),
        );
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_from_stream_round_trip() {
        let stream = futures::stream::iter(vec![1, 2, 3]);
        let flowable = Flowable::from_stream(stream, 2);
        let collected = flowable.run().expect("run");
        assert_eq!(collected, vec![1, 2, 3]);
    }
}
