use thiserror::Error;

/// The concurrency a [Limiter](crate::Limiter) was asked to use is not valid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("concurrency must be a number, got {0:?}")]
    NotANumber(String),
    #[error("concurrency must be greater than 0")]
    NotPositive,
    #[error("concurrency must be a whole number or infinity, got {0}")]
    Fractional(f64),
}

/// A [Hold](crate::Hold) was requested with arguments that can't be honoured.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidArgument {
    #[error("hold duration must be a number")]
    NotANumber,
    #[error("hold duration must not be negative, got {0}ms")]
    Negative(f64),
    #[error("hold duration of {0}ms is out of range")]
    OutOfRange(f64),
    #[error("hold requested after the work item settled")]
    Settled,
    #[error("rate limit reset header must be a whole number of seconds, got {0:?}")]
    ResetHeader(String),
}

/// The outcome of a work item that didn't produce a value.
#[derive(Debug, Error)]
pub enum Error<E> {
    /// The work item called its [Hold](crate::Hold) with invalid arguments.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
    /// The work itself failed.
    #[error(transparent)]
    Work(E),
    /// The work item was dropped before it settled, e.g. because it panicked.
    #[error("work item was dropped before it settled")]
    Abandoned,
}

impl<E> Error<E> {
    /// The error returned by the work, if that's what this is.
    pub fn into_work(self) -> Option<E> {
        match self {
            Error::Work(e) => Some(e),
            _ => None,
        }
    }
}
