//! A promise core that settles exactly once, follows other promises and
//! forwards progress notifications.
//!
//! Every promise belongs to a [`Runtime`], which carries the [`Scheduler`]
//! used to defer handler invocation. Handlers never run inside the call that
//! settles a promise; they run on a later scheduler turn.
//!
//! # Examples
//!
//! ```
//! use promise_core::{Handlers, QueueScheduler, Runtime, Value};
//!
//! let scheduler = QueueScheduler::new();
//! let runtime = Runtime::new(scheduler.clone());
//!
//! let deferred = runtime.pending();
//! let doubled = deferred.promise().then(Handlers::new().on_fulfilled(|v| {
//!     let n = v.downcast_ref::<i32>().copied().unwrap_or_default();
//!     Ok(Value::new(n * 2))
//! }));
//!
//! let followee = runtime.pending();
//! deferred.resolve(followee.promise());
//! followee.resolve(Value::new(21));
//!
//! assert!(doubled.is_pending());
//! scheduler.run_until_idle();
//! assert_eq!(doubled.value().downcast_ref::<i32>(), Some(&42));
//! ```
use std::fmt;

use thiserror::Error;

pub mod deferred;
pub mod promise;
mod resolve;
pub mod runtime;
pub mod scheduler;
pub mod settled;
pub mod subscriber;
pub mod value;

pub use deferred::Deferred;
pub use promise::{Promise, PromiseId};
pub use runtime::Runtime;
pub use scheduler::{Job, QueueScheduler, Scheduler, ThreadScheduler, ThreadSchedulerBuilder};
pub use settled::Settled;
pub use subscriber::{HandlerResult, Handlers};
pub use value::{Thenable, Value};

#[derive(Debug, Error)]
pub enum Error {
    #[error("promise {0} cannot follow a chain that leads back to itself")]
    CyclicResolution(PromiseId),
    #[error("promise is {0}, not fulfilled")]
    NotFulfilled(Status),
    #[error("promise is {0}, not rejected")]
    NotRejected(Status),
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("failed to spawn scheduler worker")]
    Spawn(#[from] std::io::Error),
}

/// The externally visible state of a promise.
///
/// A promise that follows another one reports [`Status::Pending`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Fulfilled => "fulfilled",
            Status::Rejected => "rejected",
        };
        f.write_str(name)
    }
}
