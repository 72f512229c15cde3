use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::Error;

/// What a drive finishes with.
pub type Outcome<R, E> = Result<R, Error<E>>;

/// Lets a [`Drive`] handle reach back into its driver.
pub(crate) trait Cancel: Send + Sync {
    fn cancel(self: Arc<Self>);
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

struct Inner<R, E> {
    outcome: Option<Outcome<R, E>>,
    waker: Result<Waker, WakerState>,
}

/// The driver's half: completes the outcome exactly once.
pub(crate) struct Completion<R, E> {
    inner: Arc<Mutex<Inner<R, E>>>,
}

impl<R, E> Completion<R, E> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                outcome: None,
                waker: Err(WakerState::Fresh),
            })),
        }
    }

    /// Store the outcome and wake the waiting task. Later calls are ignored.
    pub(crate) fn complete(&self, outcome: Outcome<R, E>) {
        let mut inner = self.inner.lock();
        if let Err(WakerState::Tainted) = inner.waker {
            return;
        }
        inner.outcome = Some(outcome);
        let waker = std::mem::replace(&mut inner.waker, Err(WakerState::Tainted));
        drop(inner);
        if let Ok(waker) = waker {
            waker.wake()
        }
    }

    pub(crate) fn handle(&self, control: Arc<dyn Cancel>) -> Drive<R, E> {
        Drive {
            inner: self.inner.clone(),
            control,
        }
    }
}

/// Handle to a running drive and its eventual outcome.
///
/// A drive whose body never waits on a producer finishes before
/// [`drive`](crate::drive) returns, and [`Drive::try_take`] yields the outcome
/// right away. Otherwise await the handle, or block on it with
/// [`Drive::wait`].
///
/// # Examples
///
/// ```
/// use fiber_promise::Coroutine;
///
/// let drive = Coroutine::new(|_| async { Ok::<_, ()>("done") }).drive();
/// assert!(drive.is_finished());
/// assert_eq!(drive.try_take(), Some(Ok("done")));
/// ```
#[must_use = "dropping a `Drive` discards the outcome of the coroutine"]
pub struct Drive<R, E> {
    inner: Arc<Mutex<Inner<R, E>>>,
    control: Arc<dyn Cancel>,
}

impl<R, E> Drive<R, E> {
    pub fn is_finished(&self) -> bool {
        matches!(self.inner.lock().waker, Err(WakerState::Tainted))
    }

    /// Take the outcome if the drive has already finished.
    ///
    /// The outcome is delivered once. After this has returned `Some`, it
    /// returns `None`, and awaiting the handle or calling [`Drive::wait`]
    /// panics; use [`Drive::is_finished`] to tell "taken" from "running".
    pub fn try_take(&self) -> Option<Outcome<R, E>> {
        self.inner.lock().outcome.take()
    }

    /// Stop a suspended drive. It finishes with [`Error::Cancelled`] and the
    /// coroutine body is dropped. A running body is stopped at its next
    /// suspension. Cancelling a finished drive does nothing.
    pub fn cancel(&self) {
        self.control.clone().cancel()
    }

    /// Block the current thread until the drive finishes.
    ///
    /// The producers the body waits on must settle from other threads, or
    /// this never returns.
    ///
    /// # Panics
    ///
    /// If the outcome was already taken with [`Drive::try_take`].
    pub fn wait(self) -> Outcome<R, E> {
        futures::executor::block_on(self)
    }
}

/// Resolves to the outcome once; polling again afterwards panics, as does
/// polling after [`Drive::try_take`] returned `Some`.
impl<R, E> Future for Drive<R, E> {
    type Output = Outcome<R, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.outcome.take() {
            return Poll::Ready(outcome);
        }
        if let Err(WakerState::Tainted) = inner.waker {
            panic!("`Drive` polled after completion");
        }
        inner.waker = Ok(cx.waker().clone());
        Poll::Pending
    }
}

impl<R, E> std::fmt::Debug for Drive<R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Flag(AtomicBool);

    impl Cancel for Flag {
        fn cancel(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_complete_wakes_waiter() {
        let completion = Completion::<u32, ()>::new();
        let drive = completion.handle(Arc::new(Flag::default()));
        let task = thread::spawn(move || block_on(drive));
        completion.complete(Ok(42));
        assert_eq!(task.join().expect("The task thread has panicked"), Ok(42));
    }

    #[test]
    fn test_first_completion_wins() {
        let completion = Completion::<u32, ()>::new();
        let drive = completion.handle(Arc::new(Flag::default()));
        assert!(!drive.is_finished());
        completion.complete(Ok(1));
        completion.complete(Err(Error::Cancelled));
        assert!(drive.is_finished());
        assert_eq!(drive.try_take(), Some(Ok(1)));
        assert_eq!(drive.try_take(), None);
    }

    #[test]
    #[should_panic(expected = "`Drive` polled after completion")]
    fn test_wait_after_take_panics() {
        let completion = Completion::<u32, ()>::new();
        let drive = completion.handle(Arc::new(Flag::default()));
        completion.complete(Ok(1));
        assert_eq!(drive.try_take(), Some(Ok(1)));
        assert!(drive.is_finished());
        let _ = drive.wait();
    }

    #[test]
    fn test_cancel_reaches_control() {
        let completion = Completion::<u32, ()>::new();
        let flag = Arc::new(Flag::default());
        let drive = completion.handle(flag.clone());
        drive.cancel();
        assert!(flag.0.load(Ordering::SeqCst));
    }
}
