// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

//! Blocking consumption.
//!
//! [`Flowable::run`] materializes a pipeline into a vector, blocking the
//! calling thread until the terminal event. [`Flowable::to_iter`] pumps the
//! pipeline on a dedicated event loop and yields elements lazily through a
//! bounded hand-off channel, so an infinite flowable can be consumed
//! incrementally; dropping the iterator disposes the subscription.

use crate::batch::Batch;
use crate::error::{Error, FlowError};
use crate::flowable::Flowable;
use crate::observer::Observer;
use crate::scheduler::event_loop::EventLoopScheduler;
use crate::scheduler::SchedulerRef;
use crate::subscriber::Subscriber;
use ackflow_ack::Ack;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct RunState<T> {
    collected: Vec<T>,
    outcome: Option<Result<(), FlowError>>,
}

struct RunSink<T> {
    state: Mutex<RunState<T>>,
    condvar: Condvar,
}

impl<T: Send + 'static> Observer<T> for RunSink<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        match batch.try_materialize() {
            Ok(values) => {
                self.state.lock().collected.extend(values);
                Ack::Continue
            }
            Err(error) => {
                let mut state = self.state.lock();
                state.outcome = Some(Err(error));
                let _ = self.condvar.notify_all();
                Ack::Stop
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        let mut state = self.state.lock();
        state.outcome = Some(Err(error));
        let _ = self.condvar.notify_all();
    }

    fn on_completed(&self) {
        let mut state = self.state.lock();
        state.outcome = Some(Ok(()));
        let _ = self.condvar.notify_all();
    }
}

enum IterMsg<T> {
    Value(T),
    Failed(FlowError),
    Completed,
}

struct IterSink<T> {
    tx: flume::Sender<IterMsg<T>>,
}

impl<T: Send + 'static> Observer<T> for IterSink<T> {
    fn on_next(&self, batch: Batch<T>) -> Ack {
        let values = match batch.try_materialize() {
            Ok(values) => values,
            Err(error) => {
                let _ = self.tx.send(IterMsg::Failed(error));
                return Ack::Stop;
            }
        };
        for value in values {
            // Blocking send: the pipeline runs on its own event loop, so
            // this is the back-pressure hand-off to the consuming thread.
            if self.tx.send(IterMsg::Value(value)).is_err() {
                return Ack::Stop;
            }
        }
        Ack::Continue
    }

    fn on_error(&self, error: FlowError) {
        let _ = self.tx.send(IterMsg::Failed(error));
    }

    fn on_completed(&self) {
        let _ = self.tx.send(IterMsg::Completed);
    }
}

/// Lazy blocking iterator over a flowable; see [`Flowable::to_iter`].
pub struct FlowIterator<T> {
    rx: flume::Receiver<IterMsg<T>>,
    subscription: crate::disposable::Disposable,
    finished: bool,
}

impl<T> Iterator for FlowIterator<T> {
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(IterMsg::Value(value)) => Some(Ok(value)),
            Ok(IterMsg::Failed(error)) => {
                self.finished = true;
                Some(Err(error))
            }
            Ok(IterMsg::Completed) | Err(_) => {
                self.finished = true;
                None
            }
        }
    }
}

impl<T> Drop for FlowIterator<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl<T: Clone + Send + Sync + 'static> Flowable<T> {
    /// Materializes the pipeline into a vector, blocking until completion.
    pub fn run(&self) -> Result<Vec<T>, FlowError> {
        let sink = Arc::new(RunSink {
            state: Mutex::new(RunState {
                collected: Vec::new(),
                outcome: None,
            }),
            condvar: Condvar::new(),
        });

        let _subscription = self
            .subscribe(sink.clone())
            .map_err(FlowError::from)?;

        let mut state = sink.state.lock();
        while state.outcome.is_none() {
            sink.condvar.wait(&mut state);
        }
        match state.outcome.take() {
            Some(Ok(())) => Ok(std::mem::take(&mut state.collected)),
            Some(Err(error)) => Err(error),
            None => unreachable!("condvar returned without an outcome"),
        }
    }

    /// Pumps the pipeline on a dedicated event loop, yielding elements
    /// lazily.
    pub fn to_iter(&self) -> Result<FlowIterator<T>, Error> {
        let scheduler: SchedulerRef = Arc::new(EventLoopScheduler::new("ackflow-iter"));
        let subscriber = Subscriber::new(scheduler.clone(), scheduler);
        let (tx, rx) = flume::bounded(1);

        let subscription = self.subscribe_with(Arc::new(IterSink { tx }), &subscriber)?;
        Ok(FlowIterator {
            rx,
            subscription,
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::flowable::{range, Flowable};
    use crate::error::FlowError;

    #[test]
    fn test_run_materializes_the_pipeline() {
        let result = range(0..5).map(|x| x * x).run().expect("run");
        assert_eq!(result, vec![0, 1, 4, 9, 16]);
    }

    #[test]
    fn test_run_surfaces_errors() {
        let result = Flowable::<i64>::empty().first().run();
        assert_eq!(result, Err(FlowError::EmptySequence));
    }

    #[test]
    fn test_to_iter_is_lazy_over_an_infinite_source() {
        let naturals = range(0..i64::MAX);
        let mut iter = naturals.to_iter().expect("to_iter");

        let first: Vec<i64> = iter
            .by_ref()
            .take(5)
            .collect::<Result<_, _>>()
            .expect("elements");
        assert_eq!(first, vec![0, 1, 2, 3, 4]);
    }
}
