//! Awaiting a promise.
//!
//! The `Settled` future keeps one waker per waiting task on the pending
//! promise and is woken once the promise is fulfilled or rejected.
use std::{
    future::{Future, IntoFuture},
    pin::Pin,
    task::{Context, Poll},
};

use crate::{promise::State, Promise, Value};

/// Resolves to `Ok(value)` once the promise fulfills or `Err(reason)` once it
/// rejects. Any number of `Settled` futures may wait on one promise.
///
/// # Examples
///
/// ```
/// use promise_core::{Runtime, ThreadScheduler, Value};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let runtime = Runtime::new(ThreadScheduler::new().unwrap());
/// let deferred = runtime.pending();
/// let first = deferred.promise().settled();
/// let second = deferred.promise().settled();
///
/// let task1 = thread::spawn(move || block_on(first));
/// let task2 = thread::spawn(move || block_on(second));
/// deferred.reject(Value::new("💥"));
///
/// assert!(task1.join().expect("The task1 thread has panicked").is_err());
/// assert!(task2.join().expect("The task2 thread has panicked").is_err());
/// ```
#[derive(Debug)]
pub struct Settled {
    promise: Promise,
}

impl Promise {
    pub fn settled(&self) -> Settled {
        Settled {
            promise: self.clone(),
        }
    }
}

impl Future for Settled {
    type Output = Result<Value, Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.promise.lock();
        match &mut *state {
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            State::Pending(registry)
            | State::Following { registry, .. }
            | State::Settling { registry, .. } => {
                if !registry.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    registry.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl IntoFuture for Promise {
    type Output = Result<Value, Value>;
    type IntoFuture = Settled;

    fn into_future(self) -> Self::IntoFuture {
        Settled { promise: self }
    }
}
