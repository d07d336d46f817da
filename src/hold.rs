use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::runtime::Handle;
use tracing::warn;

use crate::{
    limiter::{Job, LimiterInner},
    InvalidArgument, Once,
};

/// Pauses dispatch for the whole [Limiter](crate::Limiter), optionally retrying the current work
/// item afterwards.
///
/// Every execution of a work item gets a fresh `Hold`. Only the first request made through it has
/// any effect, later requests return the first one's result.
///
/// The hold is shared: while it is active no new work item is started, however much concurrency is
/// available. If the limiter is already on hold, the request joins the active hold rather than
/// extending it.
#[derive(Clone)]
pub struct Hold {
    attempt: Arc<Attempt>,
}

/// What a work item wants the [Limiter](crate::Limiter) to do when it calls [Hold::hold].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoldOptions {
    hold_ms: f64,
    retry: bool,
}

type HoldFn = Box<dyn FnOnce(HoldOptions) -> Result<(), InvalidArgument> + Send>;

/// One execution of a work item.
pub(crate) struct Attempt {
    request: Once<HoldFn, Result<(), InvalidArgument>>,
    status: Arc<Mutex<Status>>,
}

#[derive(Default)]
struct Status {
    settled: bool,
    superseded: bool,
    rejected: Option<InvalidArgument>,
}

/// How the outcome of a finished [Attempt] should be handled.
pub(crate) enum Settlement {
    /// Deliver the work's own outcome.
    Completed,
    /// The work item asked for an invalid hold, deliver that instead.
    Rejected(InvalidArgument),
    /// The work item has been queued again, drop the outcome.
    Superseded,
}

impl Hold {
    pub(crate) fn new(limiter: Arc<LimiterInner>, job: Job) -> Self {
        let status = Arc::new(Mutex::new(Status::default()));
        let runtime = Handle::current();

        let request: HoldFn = {
            let status = status.clone();
            Box::new(move |options: HoldOptions| {
                let mut status = status.lock().unwrap();
                if status.settled {
                    return Err(InvalidArgument::Settled);
                }

                let duration = match options.duration() {
                    Ok(duration) => duration,
                    Err(error) => {
                        warn!(%error, "rejected hold request");
                        status.rejected = Some(error.clone());
                        return Err(error);
                    }
                };

                let retry = if options.retry {
                    status.superseded = true;
                    Some(job)
                } else {
                    None
                };
                limiter.hold(duration, retry, &runtime);
                Ok(())
            })
        };

        Self {
            attempt: Arc::new(Attempt {
                request: Once::new(request),
                status,
            }),
        }
    }

    /// Put the limiter on hold for `options.hold_ms`, queueing this work item again if
    /// `options.retry` is set.
    ///
    /// When retrying, whatever the current execution goes on to return is discarded: the caller
    /// only sees the outcome of the retry.
    ///
    /// An invalid request is returned here and also becomes the outcome the caller sees for this
    /// work item.
    pub fn hold(&self, options: HoldOptions) -> Result<(), InvalidArgument> {
        self.attempt.request.call(options)
    }

    /// Put the limiter on hold for `hold_ms` and retry this work item afterwards.
    pub fn wait_and_retry(&self, hold_ms: f64) -> Result<(), InvalidArgument> {
        self.hold(HoldOptions::millis(hold_ms).retry(true))
    }

    /// Whether this execution has already made its hold request.
    pub fn is_used(&self) -> bool {
        self.attempt.request.is_called()
    }

    pub(crate) fn attempt(&self) -> Arc<Attempt> {
        self.attempt.clone()
    }
}

impl fmt::Debug for Hold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hold")
            .field("result", &self.attempt.request.get())
            .finish()
    }
}

impl Attempt {
    /// Marks the execution as finished. Any later hold request is rejected.
    pub(crate) fn settle(&self) -> Settlement {
        let mut status = self.status.lock().unwrap();
        status.settled = true;
        if status.superseded {
            Settlement::Superseded
        } else if let Some(error) = status.rejected.take() {
            Settlement::Rejected(error)
        } else {
            Settlement::Completed
        }
    }
}

impl HoldOptions {
    /// Hold for `hold_ms` milliseconds, without retrying.
    pub fn millis(hold_ms: f64) -> Self {
        Self {
            hold_ms,
            retry: false,
        }
    }

    /// Hold for `duration`, without retrying.
    pub fn from_duration(duration: Duration) -> Self {
        Self::millis(duration.as_secs_f64() * 1000.0)
    }

    /// Build a retrying hold from an `x-ratelimit-reset` style header, which holds the number of
    /// whole seconds until the server's rate limit window resets.
    ///
    /// Holds for one second longer than the header says, to be sure the window has reset.
    pub fn from_reset_header(value: &str) -> Result<Self, InvalidArgument> {
        let seconds: u64 = value
            .trim()
            .parse()
            .map_err(|_| InvalidArgument::ResetHeader(value.to_owned()))?;
        Ok(Self::millis((seconds as f64 + 1.0) * 1000.0).retry(true))
    }

    /// Whether to queue the work item again once the hold is over.
    pub fn retry(self, retry: bool) -> Self {
        Self { retry, ..self }
    }

    pub fn hold_ms(&self) -> f64 {
        self.hold_ms
    }

    pub fn is_retry(&self) -> bool {
        self.retry
    }

    fn duration(&self) -> Result<Duration, InvalidArgument> {
        if self.hold_ms.is_nan() {
            return Err(InvalidArgument::NotANumber);
        }
        if self.hold_ms < 0.0 {
            return Err(InvalidArgument::Negative(self.hold_ms));
        }
        Duration::try_from_secs_f64(self.hold_ms / 1000.0)
            .map_err(|_| InvalidArgument::OutOfRange(self.hold_ms))
    }
}

impl From<Duration> for HoldOptions {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}
