//! The scheduler port that defers handler invocation, plus two
//! implementations: a caller-drained queue and a single worker thread.
use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    sync::{
        mpsc::{channel, Sender},
        Arc, Mutex, PoisonError,
    },
    thread,
};

use tracing::{debug, error};

use crate::Error;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs after the submitting call has returned.
///
/// Implementations must not run `job` before `schedule` returns and must run
/// jobs in submission order.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, job: Job);
}

/// A FIFO of jobs that only runs when the owner drains it.
///
/// Cloning yields another handle to the same queue, so a test can keep one
/// handle and give the other to a [`Runtime`](crate::Runtime).
#[derive(Clone, Default)]
pub struct QueueScheduler {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the jobs that were queued when the turn began. Jobs they
    /// schedule wait for the next turn. Returns the number of jobs run.
    pub fn run_turn(&self) -> usize {
        let queued = self.len();
        (0..queued).take_while(|_| self.run_one()).count()
    }

    /// Runs jobs until the queue is empty, including jobs scheduled along
    /// the way. Returns the number of jobs run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    fn run_one(&self) -> bool {
        // The guard must be released before the job runs: jobs schedule more jobs.
        let job = self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, job: Job) {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(job);
    }
}

impl Debug for QueueScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueScheduler").field("queued", &self.len()).finish()
    }
}

/// Runs jobs on one background thread, in submission order.
///
/// The worker stops once every handle is dropped and the queue is empty.
///
/// # Examples
///
/// ```
/// use promise_core::{Runtime, ThreadScheduler, Value};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let scheduler = ThreadScheduler::builder().name("promises").spawn().unwrap();
/// let runtime = Runtime::new(scheduler);
/// let deferred = runtime.pending();
/// let promise = deferred.promise();
///
/// let producer = thread::spawn(move || deferred.resolve(Value::new("🍓")));
/// let value = block_on(async move { promise.await }).unwrap();
/// assert_eq!(value.downcast_ref::<&str>(), Some(&"🍓"));
/// producer.join().expect("The producer thread has panicked");
/// ```
#[derive(Clone)]
pub struct ThreadScheduler {
    sender: Arc<Mutex<Sender<Job>>>,
    name: Option<Arc<str>>,
}

impl ThreadScheduler {
    /// Starts a worker with default settings.
    pub fn new() -> Result<Self, Error> {
        Self::builder().spawn()
    }

    pub fn builder() -> ThreadSchedulerBuilder {
        ThreadSchedulerBuilder::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(job).is_err() {
            error!(worker = ?self.name, "scheduler worker has stopped, dropping job");
        }
    }
}

impl Debug for ThreadScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler").field("name", &self.name).finish()
    }
}

/// Configuration for a [`ThreadScheduler`] worker, in the manner of
/// [`std::thread::Builder`].
#[derive(Clone, Debug, Default)]
pub struct ThreadSchedulerBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadSchedulerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn spawn(self) -> Result<ThreadScheduler, Error> {
        let (sender, receiver) = channel::<Job>();
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let worker = self.name.clone();
        builder.spawn(move || {
            debug!(worker = ?worker, "scheduler worker started");
            receiver.into_iter().for_each(|job| job());
            debug!(worker = ?worker, "scheduler worker stopped");
        })?;
        Ok(ThreadScheduler {
            sender: Arc::new(Mutex::new(sender)),
            name: self.name.map(Arc::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc::channel, Arc, Mutex};
    use std::time::Duration;

    use super::{QueueScheduler, Scheduler, ThreadScheduler};

    #[test]
    fn test_queue_runs_nothing_until_drained() {
        let scheduler = QueueScheduler::new();
        let ran = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let ran = ran.clone();
            scheduler.schedule(Box::new(move || ran.lock().unwrap().push(i)));
        }
        assert_eq!(scheduler.len(), 3);
        assert!(ran.lock().unwrap().is_empty());
        assert_eq!(scheduler.run_until_idle(), 3);
        assert_eq!(*ran.lock().unwrap(), vec![0, 1, 2]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_turn_defers_jobs_scheduled_during_it() {
        let scheduler = QueueScheduler::new();
        let inner = scheduler.clone();
        let ran = Arc::new(Mutex::new(Vec::new()));
        let (outer_log, inner_log) = (ran.clone(), ran.clone());
        scheduler.schedule(Box::new(move || {
            outer_log.lock().unwrap().push("outer");
            inner.schedule(Box::new(move || inner_log.lock().unwrap().push("inner")));
        }));
        assert_eq!(scheduler.run_turn(), 1);
        assert_eq!(*ran.lock().unwrap(), vec!["outer"]);
        assert_eq!(scheduler.run_turn(), 1);
        assert_eq!(*ran.lock().unwrap(), vec!["outer", "inner"]);
        assert_eq!(scheduler.run_turn(), 0);
    }

    #[test]
    fn test_thread_scheduler_keeps_submission_order() {
        let scheduler = ThreadScheduler::builder()
            .name("ordered")
            .stack_size(256 * 1024)
            .spawn()
            .expect("The worker failed to spawn");
        assert_eq!(scheduler.name(), Some("ordered"));
        let (tx, rx) = channel();
        for i in 0..100 {
            let tx = tx.clone();
            scheduler.schedule(Box::new(move || tx.send(i).unwrap()));
        }
        let received: Vec<_> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_thread_scheduler_runs_off_the_calling_thread() {
        let scheduler = ThreadScheduler::new().expect("The worker failed to spawn");
        let caller = std::thread::current().id();
        let (tx, rx) = channel();
        scheduler.schedule(Box::new(move || tx.send(std::thread::current().id()).unwrap()));
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }
}
