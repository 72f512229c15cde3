//! The loop that drives a coroutine from one suspension to the next.
//!
//! Each step polls the body once. `Ready` ends the drive. `Pending` means the
//! body parked a deferred value in its [`Shared`] slot; the driver registers a
//! continuation on it and the step is over. When the continuation is settled
//! the next step runs:
//!
//! - if it was settled synchronously, inside `register`, the loop that is
//!   still on the stack picks it up and keeps going;
//! - otherwise the step runs on whichever thread settled it.
//!
//! Neither path recurses, so the stack does not grow with the number of
//! suspensions.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, debug_span, trace, Span};

use crate::config::DriveConfig;
use crate::coroutine::Coroutine;
use crate::outcome::{Cancel, Completion, Drive, Outcome};
use crate::suspend::{Shared, Suspender};
use crate::Error;

/// How a settled continuation reaches the driver that is waiting on it.
pub(crate) trait Resume: Send + Sync {
    fn resume(self: Arc<Self>);

    /// The continuation was dropped without being settled.
    fn abandon(self: Arc<Self>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// A step is polling the body.
    Running,
    /// A step is inside `Deferred::register`.
    Registering,
    /// Settled while still registering; the registering step continues.
    SettledEarly,
    /// Abandoned while still registering.
    AbandonedEarly,
    /// Suspended; the next settlement runs the next step.
    Waiting,
    Done,
}

#[derive(Debug)]
struct Control {
    phase: Phase,
    cancel_requested: bool,
    suspensions: usize,
}

/// The body, with panics caught at each poll.
type Body<R, E> = BoxFuture<'static, std::thread::Result<Result<R, E>>>;

struct Driver<R, E> {
    body: Mutex<Option<Body<R, E>>>,
    shared: Arc<Mutex<Shared>>,
    control: Mutex<Control>,
    completion: Completion<R, E>,
    config: DriveConfig,
    span: Span,
}

/// Start driving `coroutine` and return a handle to its outcome.
///
/// The body runs on the calling thread up to its first suspension on a
/// producer that does not settle synchronously. A body that never suspends,
/// or only on synchronous producers, has finished when this returns.
///
/// # Examples
///
/// ```
/// use fiber_promise::{drive, Coroutine, Deferred};
///
/// let coroutine = Coroutine::new(|s| async move {
///     let x = s.suspend(Deferred::<u32, ()>::resolved(41)).await?;
///     Ok::<_, ()>(x + 1)
/// });
/// assert_eq!(drive(coroutine).try_take(), Some(Ok(42)));
/// ```
pub fn drive<R, E>(coroutine: Coroutine<R, E>) -> Drive<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    let (body, config) = coroutine.into_parts();
    let shared = Arc::new(Mutex::new(Shared::default()));
    let future = AssertUnwindSafe(body(Suspender::new(shared.clone())))
        .catch_unwind()
        .boxed();
    let span = debug_span!("drive", coroutine = %config.name());

    let driver = Arc::new(Driver {
        body: Mutex::new(Some(future)),
        shared,
        control: Mutex::new(Control {
            phase: Phase::Running,
            cancel_requested: false,
            suspensions: 0,
        }),
        completion: Completion::new(),
        config,
        span,
    });
    let handle = driver.completion.handle(driver.clone());
    driver.span.in_scope(|| debug!("starting coroutine"));
    driver.advance();
    handle
}

impl<R, E> Driver<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    /// Run steps until the body completes or waits on a producer.
    fn advance(self: Arc<Self>) {
        let _entered = self.span.enter();
        loop {
            if self.control.lock().cancel_requested {
                self.finish(Err(Error::Cancelled));
                return;
            }

            let polled = {
                let mut body = self.body.lock();
                let Some(future) = body.as_mut() else {
                    return;
                };
                future.as_mut().poll(&mut Context::from_waker(noop_waker_ref()))
            };

            let yielded = match polled {
                Poll::Ready(Ok(result)) => {
                    self.finish(result.map_err(Error::Failed));
                    return;
                }
                Poll::Ready(Err(payload)) => {
                    self.finish(Err(Error::Panicked(panic_message(payload.as_ref()))));
                    return;
                }
                Poll::Pending => self.shared.lock().take_yielded(),
            };
            let yielded = match yielded {
                Ok(yielded) => yielded,
                Err(err) => {
                    self.finish(Err(err));
                    return;
                }
            };

            let suspension = {
                let mut control = self.control.lock();
                if control.cancel_requested {
                    None
                } else {
                    control.suspensions += 1;
                    control.phase = Phase::Registering;
                    Some(control.suspensions)
                }
            };
            // Cancelled while the body was running: the producer never starts.
            let Some(suspension) = suspension else {
                self.finish(Err(Error::Cancelled));
                return;
            };
            if let Some(limit) = self.config.max_suspensions() {
                if suspension > limit {
                    self.finish(Err(Error::SuspensionLimit(limit)));
                    return;
                }
            }

            trace!(suspension, "registering continuation");
            yielded.register(self.clone());

            let mut control = self.control.lock();
            let phase = control.phase;
            match phase {
                Phase::SettledEarly => {
                    trace!(suspension, "settled during registration");
                    control.phase = Phase::Running;
                }
                Phase::AbandonedEarly => {
                    drop(control);
                    self.finish(Err(Error::ProducerDropped));
                    return;
                }
                Phase::Registering if control.cancel_requested => {
                    drop(control);
                    self.finish(Err(Error::Cancelled));
                    return;
                }
                Phase::Registering => {
                    trace!(suspension, "suspended");
                    control.phase = Phase::Waiting;
                    return;
                }
                Phase::Running | Phase::Waiting | Phase::Done => return,
            }
        }
    }

    /// End the drive: drop the body and publish the outcome.
    fn finish(&self, outcome: Outcome<R, E>) {
        let suspensions = {
            let mut control = self.control.lock();
            control.phase = Phase::Done;
            control.suspensions
        };
        let body = self.body.lock().take();
        drop(body);
        match &outcome {
            Ok(_) => debug!(suspensions, "coroutine completed"),
            Err(err) => debug!(suspensions, error = err.kind(), "coroutine failed"),
        }
        self.completion.complete(outcome);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

impl<R, E> Resume for Driver<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    fn resume(self: Arc<Self>) {
        let mut control = self.control.lock();
        let phase = control.phase;
        match phase {
            Phase::Registering => control.phase = Phase::SettledEarly,
            Phase::Waiting => {
                control.phase = Phase::Running;
                drop(control);
                self.advance();
            }
            _ => {
                drop(control);
                let _entered = self.span.enter();
                trace!(?phase, "ignoring settlement");
            }
        }
    }

    fn abandon(self: Arc<Self>) {
        let mut control = self.control.lock();
        let phase = control.phase;
        match phase {
            Phase::Registering => control.phase = Phase::AbandonedEarly,
            Phase::Waiting => {
                drop(control);
                let _entered = self.span.enter();
                self.finish(Err(Error::ProducerDropped));
            }
            _ => {}
        }
    }
}

impl<R, E> Cancel for Driver<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    fn cancel(self: Arc<Self>) {
        let mut control = self.control.lock();
        control.cancel_requested = true;
        if control.phase == Phase::Waiting {
            control.phase = Phase::Done;
            drop(control);
            let _entered = self.span.enter();
            self.finish(Err(Error::Cancelled));
        }
    }
}
