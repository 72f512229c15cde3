//! Drive coroutines that suspend on deferred values.
//!
//! A coroutine body is an ordinary closure returning a future. It gets a
//! [`Suspender`] and, wherever it needs the result of an asynchronous
//! operation, suspends on a [`Deferred`] value:
//!
//! ```
//! use fiber_promise::{Coroutine, Deferred, Settle};
//! use std::thread;
//!
//! // Some producer outside the coroutine, settling from its own thread.
//! fn query(id: u32) -> Deferred<String, String> {
//!     Deferred::new(move |continuation| {
//!         thread::spawn(move || match id {
//!             1 => continuation.resolve(String::from("alice")),
//!             _ => continuation.reject(format!("user {id} not found")),
//!         });
//!     })
//! }
//!
//! let drive = Coroutine::new(|s| async move {
//!     let first = s.suspend(query(1)).await?;
//!     let second = match s.suspend(query(2)).await {
//!         Ok(name) => name,
//!         Err(_) => String::from("nobody"),
//!     };
//!     Ok::<_, String>(format!("{first} and {second}"))
//! })
//! .drive();
//!
//! assert_eq!(drive.wait(), Ok(String::from("alice and nobody")));
//! ```
//!
//! [`drive`] polls the body until it suspends, registers a continuation on
//! the deferred value it suspended on, and resumes the body with the
//! settlement once the producer delivers it, until the body returns. A
//! rejected deferred value comes back out of [`Suspension`] as `Err`, so the
//! body handles it with `match` or passes it on with `?`.

mod config;
mod coroutine;
mod deferred;
mod driver;
mod envelope;
mod outcome;
mod pair;
mod suspend;

pub use config::DriveConfig;
pub use coroutine::{coroutine_fn, Coroutine};
pub use deferred::{Continuation, Deferred, Settle};
pub use driver::drive;
pub use envelope::{Rejection, Settlement};
pub use outcome::{Drive, Outcome};
pub use pair::Resolver;
pub use suspend::{Suspender, Suspension};

use thiserror::Error;

/// Why a drive did not finish with the body's return value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// The body returned an error, typically a rejection it did not handle.
    #[error("coroutine body failed: {0}")]
    Failed(E),
    /// The body panicked; carries the panic message.
    #[error("coroutine body panicked: {0}")]
    Panicked(String),
    /// A producer dropped the continuation it was handed without settling it.
    #[error("producer dropped its continuation without settling it")]
    ProducerDropped,
    /// [`Drive::cancel`] stopped the drive before the body finished.
    #[error("drive was cancelled")]
    Cancelled,
    /// The body awaited a future that is not a [`Suspension`].
    #[error("coroutine suspended on something other than a deferred value")]
    ForeignSuspension,
    /// The body polled two suspensions in the same step, e.g. with `join!`.
    #[error("coroutine suspended on more than one deferred value at once")]
    OverlappingSuspension,
    /// The body tried to suspend more often than
    /// [`DriveConfig::with_max_suspensions`] allows.
    #[error("coroutine exceeded the limit of {0} suspensions")]
    SuspensionLimit(usize),
}

impl<E> Error<E> {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Error::Failed(_) => "failed",
            Error::Panicked(_) => "panicked",
            Error::ProducerDropped => "producer dropped",
            Error::Cancelled => "cancelled",
            Error::ForeignSuspension => "foreign suspension",
            Error::OverlappingSuspension => "overlapping suspension",
            Error::SuspensionLimit(_) => "suspension limit",
        }
    }

    /// The body's own failure, if that is what ended the drive.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Error::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
