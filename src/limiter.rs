use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{self, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use pin_project_lite::pin_project;
use tokio::{runtime::Handle, sync::oneshot};
use tracing::{debug, trace};

use crate::{
    hold::{Hold, Settlement},
    Concurrency, ConfigurationError, Error, LimiterConfig,
};

/// Limits the number of concurrent jobs.
///
/// Jobs are queued and started in the order they were submitted, as long as fewer than the
/// configured [Concurrency] are running and the limiter isn't on hold.
///
/// Any running job can put the whole limiter on hold through the [Hold] it is given, e.g. when a
/// server signals that a shared rate limit has been hit. It can also ask to be retried once the
/// hold is over, in which case it is put at the front of the queue.
///
/// Cloning a `Limiter` gives another handle to the same queue.
#[derive(Debug, Clone)]
pub struct Limiter {
    inner: Arc<LimiterInner>,
}

/// One execution of a queued job. Invoked again, with a fresh [Hold], for every retry.
///
/// Resolves to the hand-off of the outcome to the caller, or `None` if the execution was
/// superseded by a retry.
pub(crate) type Job = Arc<dyn Fn(Hold) -> BoxFuture<'static, Option<Delivery>> + Send + Sync>;

type Delivery = Box<dyn FnOnce() + Send>;

pub(crate) struct LimiterInner {
    concurrency: Concurrency,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Job>,
    in_flight: usize,
    on_hold: bool,
    // Set while some thread is running the dispatch loop.
    dispatching: bool,
}

/// Held while a job is running. Releases the concurrency slot when dropped, even if the job
/// panicked or was dropped by a runtime shutting down.
struct Permit {
    limiter: Arc<LimiterInner>,
    released: bool,
}

/// A snapshot of the state of the [Limiter].
///
/// Not guaranteed to be consistent under high concurrency.
#[derive(Debug, Clone, Copy)]
pub struct LimiterState {
    limit: Concurrency,
    in_flight: usize,
    queued: usize,
    on_hold: bool,
}

pin_project! {
    /// The eventual outcome of a job submitted with [Limiter::run].
    ///
    /// Dropping this doesn't cancel the job.
    #[derive(Debug)]
    pub struct Completion<T, E> {
        #[pin]
        rx: oneshot::Receiver<Result<T, Error<E>>>,
    }
}

impl Limiter {
    /// Create a limiter allowing up to `concurrency` jobs to run at once.
    pub fn new(concurrency: Concurrency) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                concurrency,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Create a limiter allowing up to `concurrency` jobs to run at once.
    ///
    /// Fails if `concurrency` is zero.
    pub fn with_concurrency(concurrency: usize) -> Result<Self, ConfigurationError> {
        Ok(Self::new(Concurrency::try_from(concurrency)?))
    }

    pub fn from_config(config: LimiterConfig) -> Self {
        Self::new(config.concurrency)
    }

    /// Queue `work` to run once there is capacity and no hold in place.
    ///
    /// `work` is called with a [Hold] each time it is executed, which is once, plus once more for
    /// every retry it asks for. The returned future resolves with the outcome of the last
    /// execution.
    ///
    /// The job is queued immediately, before the returned future is polled.
    ///
    /// # Panics
    ///
    /// If called outside the context of a Tokio runtime.
    pub fn run<F, Fut, T, E>(&self, work: F) -> Completion<T, E>
    where
        F: FnMut(Hold) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let runtime = Handle::current();
        let (tx, rx) = oneshot::channel();
        let delivery = Arc::new(Mutex::new(Some(tx)));
        let work = Mutex::new(work);

        let job: Job = Arc::new(move |hold: Hold| -> BoxFuture<'static, Option<Delivery>> {
            let attempt = hold.attempt();
            let fut = {
                let mut work = work.lock().unwrap();
                (&mut *work)(hold)
            };
            let delivery = delivery.clone();

            Box::pin(async move {
                let result = fut.await;

                let outcome = match attempt.settle() {
                    Settlement::Superseded => {
                        debug!("discarding outcome of superseded attempt");
                        return None;
                    }
                    Settlement::Rejected(error) => Err(Error::InvalidArgument(error)),
                    Settlement::Completed => result.map_err(Error::Work),
                };

                Some(Box::new(move || {
                    if let Some(tx) = delivery.lock().unwrap().take() {
                        // The caller may have stopped waiting.
                        let _ = tx.send(outcome);
                    }
                }) as Delivery)
            })
        });

        {
            let mut state = self.inner.state.lock().unwrap();
            state.queue.push_back(job);
            trace!(queued = state.queue.len(), "enqueued work item");
        }
        self.inner.dispatch(&runtime);

        Completion { rx }
    }

    /// The current state of the limiter.
    pub fn state(&self) -> LimiterState {
        let state = self.inner.state.lock().unwrap();
        LimiterState {
            limit: self.inner.concurrency,
            in_flight: state.in_flight,
            queued: state.queue.len(),
            on_hold: state.on_hold,
        }
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::from_config(LimiterConfig::default())
    }
}

impl LimiterInner {
    /// Start as many queued jobs as capacity allows, unless on hold.
    ///
    /// Only one caller runs the loop at a time. Anyone else returns straight away: whatever they
    /// changed is already visible to the running loop, which only stops after finding nothing to
    /// start under the same lock that clears `dispatching`.
    fn dispatch(self: &Arc<Self>, runtime: &Handle) {
        {
            let mut state = self.state.lock().unwrap();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }

        loop {
            let job = {
                let mut state = self.state.lock().unwrap();
                let next = if state.on_hold || self.concurrency.is_reached_by(state.in_flight) {
                    None
                } else {
                    state.queue.pop_front()
                };
                let Some(job) = next else {
                    state.dispatching = false;
                    return;
                };
                state.in_flight += 1;
                trace!(
                    in_flight = state.in_flight,
                    queued = state.queue.len(),
                    "admitted work item"
                );
                job
            };

            let permit = Permit {
                limiter: self.clone(),
                released: false,
            };
            // A runtime that is shutting down drops the task here, releasing the permit.
            runtime.spawn(execute(permit, job));
        }
    }

    fn free_slot(&self) {
        self.state.lock().unwrap().in_flight -= 1;
    }

    /// Put the limiter on hold for `duration`, unless it's already on hold.
    ///
    /// A `retry` job goes to the front of the queue, to be run first once the hold is over.
    pub(crate) fn hold(self: &Arc<Self>, duration: Duration, retry: Option<Job>, runtime: &Handle) {
        let mut state = self.state.lock().unwrap();
        let retry = match retry {
            Some(job) => {
                state.queue.push_front(job);
                true
            }
            None => false,
        };

        if state.on_hold {
            debug!(retry, "limiter already on hold");
            return;
        }
        state.on_hold = true;
        debug!(?duration, retry, "holding limiter");

        let limiter = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            limiter.state.lock().unwrap().on_hold = false;
            debug!("hold lifted");
            limiter.dispatch(&Handle::current());
        });
    }
}

impl fmt::Debug for LimiterInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("LimiterInner")
            .field("concurrency", &self.concurrency)
            .field("in_flight", &state.in_flight)
            .field("queued", &state.queue.len())
            .field("on_hold", &state.on_hold)
            .finish()
    }
}

async fn execute(permit: Permit, job: Job) {
    let hold = Hold::new(permit.limiter.clone(), job.clone());
    let delivery = job(hold).await;
    permit.finish(delivery);
}

impl Permit {
    /// Frees the slot, hands the outcome to the caller, then starts the next job.
    fn finish(mut self, delivery: Option<Delivery>) {
        self.limiter.free_slot();
        self.released = true;
        if let Some(deliver) = delivery {
            deliver();
        }
        self.limiter.dispatch(&Handle::current());
    }
}

impl Drop for Permit {
    /// Reduces the number of jobs in flight, and starts the next job if possible.
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.limiter.free_slot();
        // Nothing can be started once the runtime is gone.
        if let Ok(runtime) = Handle::try_current() {
            self.limiter.dispatch(&runtime);
        }
    }
}

impl LimiterState {
    /// The concurrency limit, or `None` if unbounded.
    pub fn limit(&self) -> Option<usize> {
        self.limit.get()
    }
    /// The amount of concurrency available to use, or `None` if unbounded.
    pub fn available(&self) -> Option<usize> {
        self.limit().map(|limit| limit.saturating_sub(self.in_flight))
    }
    /// The number of jobs in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
    /// The number of jobs waiting to start, including jobs waiting to be retried.
    pub fn queued(&self) -> usize {
        self.queued
    }
    pub fn is_on_hold(&self) -> bool {
        self.on_hold
    }
}

impl<T, E> Future for Completion<T, E> {
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        match self.project().rx.poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
