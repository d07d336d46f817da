//! Client-side concurrency limiting, with a shared hold for backing off from rate-limited
//! backends.
//!
//! ```
//! use client_rate_limiter::{HoldOptions, Limiter};
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() {
//! let limiter = Limiter::with_concurrency(2).unwrap();
//!
//! // Pretend the server is rate limiting the first request.
//! let mut rate_limited = true;
//!
//! let status = limiter
//!     .run(move |hold| {
//!         let status = if std::mem::take(&mut rate_limited) { 429 } else { 200 };
//!         async move {
//!             if status == 429 {
//!                 // Nobody starts a request until the window resets, then this one is retried.
//!                 hold.hold(HoldOptions::from_reset_header("0").unwrap()).unwrap();
//!             }
//!             Ok::<_, std::io::Error>(status)
//!         }
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(status, 200);
//! # }
//! ```

mod config;
mod error;
mod hold;
mod limiter;
mod once;

pub use config::{Concurrency, LimiterConfig};
pub use error::{ConfigurationError, Error, InvalidArgument};
pub use hold::{Hold, HoldOptions};
pub use limiter::{Completion, Limiter, LimiterState};
pub use once::Once;
