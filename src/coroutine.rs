use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::DriveConfig;
use crate::driver::drive;
use crate::outcome::Drive;
use crate::suspend::Suspender;

type Body<R, E> = Box<dyn FnOnce(Suspender<E>) -> BoxFuture<'static, Result<R, E>> + Send>;

/// A suspendable computation that has not been started yet.
///
/// The body is an ordinary closure returning a future. It receives the
/// [`Suspender`] it uses to wait on deferred values, and nothing of it runs
/// until the coroutine is driven.
///
/// # Examples
///
/// ```
/// use fiber_promise::{Coroutine, Deferred};
///
/// let coroutine = Coroutine::new(|s| async move {
///     match s.suspend(Deferred::<u32, &str>::rejected("not found")).await {
///         Ok(_) => Ok("found"),
///         Err(_) => Ok("recovered"),
///     }
/// });
/// assert_eq!(coroutine.drive().try_take(), Some(Ok::<_, fiber_promise::Error<&str>>("recovered")));
/// ```
pub struct Coroutine<R, E> {
    body: Body<R, E>,
    config: DriveConfig,
}

impl<R, E> Coroutine<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Suspender<E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self {
            body: Box::new(move |suspender| body(suspender).boxed()),
            config: DriveConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DriveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Shorthand for [`drive`](crate::drive)`(self)`.
    pub fn drive(self) -> Drive<R, E> {
        drive(self)
    }

    pub(crate) fn into_parts(self) -> (Body<R, E>, DriveConfig) {
        (self.body, self.config)
    }
}

impl<R, E> std::fmt::Debug for Coroutine<R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Turn a body taking arguments into a plain function that starts a fresh
/// drive per call.
///
/// # Examples
///
/// ```
/// use fiber_promise::{coroutine_fn, Deferred};
///
/// let add_one = coroutine_fn(|x: u32, s| async move {
///     let y = s.suspend(Deferred::<u32, ()>::resolved(x)).await?;
///     Ok(y + 1)
/// });
/// assert_eq!(add_one(41).try_take(), Some(Ok(42)));
/// assert_eq!(add_one(1).try_take(), Some(Ok(2)));
/// ```
pub fn coroutine_fn<A, F, Fut, R, E>(body: F) -> impl Fn(A) -> Drive<R, E>
where
    A: Send + 'static,
    F: Fn(A, Suspender<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    let body = Arc::new(body);
    move |args| {
        let body = body.clone();
        Coroutine::new(move |suspender| body(args, suspender)).drive()
    }
}
