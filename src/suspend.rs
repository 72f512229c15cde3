//! The suspension point a coroutine body awaits on.
//!
//! A body receives a [`Suspender`] and calls [`Suspender::suspend`] with a
//! [`Deferred`]. Polling the returned [`Suspension`] the first time parks the
//! deferred in a slot shared with the driver and returns `Pending`; the driver
//! picks it up, registers a continuation, and polls the body again once that
//! continuation has been settled.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::deferred::{Continuation, Deferred, Sink};
use crate::driver::Resume;
use crate::envelope::{Rejection, Settlement};
use crate::Error;

/// A deferred value yielded by the body, with its element type erased.
pub(crate) trait Yielded: Send {
    fn register(self: Box<Self>, resumer: Arc<dyn Resume>);
}

/// State shared between one coroutine body and its driver.
#[derive(Default)]
pub(crate) struct Shared {
    yielded: Option<Box<dyn Yielded>>,
    overlapping: bool,
}

impl Shared {
    /// Take what the body suspended on after a `Pending` poll.
    pub(crate) fn take_yielded<E>(&mut self) -> Result<Box<dyn Yielded>, Error<E>> {
        if self.overlapping {
            return Err(Error::OverlappingSuspension);
        }
        self.yielded.take().ok_or(Error::ForeignSuspension)
    }
}

type Slot<T, E> = Arc<Mutex<Option<Settlement<T, E>>>>;

struct Awaiting<T, E> {
    deferred: Deferred<T, E>,
    slot: Slot<T, E>,
}

impl<T, E> Yielded for Awaiting<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn register(self: Box<Self>, resumer: Arc<dyn Resume>) {
        let Awaiting { deferred, slot } = *self;
        deferred.register(Continuation::from_sink(Box::new(SlotSink { slot, resumer })));
    }
}

/// Stores the settlement where the awaiting [`Suspension`] finds it, then
/// resumes the driver.
struct SlotSink<T, E> {
    slot: Slot<T, E>,
    resumer: Arc<dyn Resume>,
}

impl<T, E> Sink<T, E> for SlotSink<T, E>
where
    T: Send,
    E: Send,
{
    fn settle(self: Box<Self>, settlement: Settlement<T, E>) {
        *self.slot.lock() = Some(settlement);
        self.resumer.resume()
    }

    fn abandon(self: Box<Self>) {
        self.resumer.abandon()
    }
}

/// Handed to a coroutine body; the only way for the body to suspend.
///
/// `E` is the failure type of the body. Each suspension may resolve to a
/// different value type, but rejections always carry an `E`.
pub struct Suspender<E> {
    shared: Arc<Mutex<Shared>>,
    _failure: PhantomData<fn() -> E>,
}

impl<E> Suspender<E> {
    pub(crate) fn new(shared: Arc<Mutex<Shared>>) -> Self {
        Self {
            shared,
            _failure: PhantomData,
        }
    }

    /// Suspend the body until `deferred` settles.
    ///
    /// The returned future resolves to `Ok(value)` when the deferred resolves
    /// and to `Err(failure)` when it is rejected, so a rejection can be
    /// handled with `match` or propagated with `?`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fiber_promise::{Coroutine, Deferred};
    ///
    /// let drive = Coroutine::new(|s| async move {
    ///     let x = s.suspend(Deferred::<u32, String>::resolved(41)).await?;
    ///     Ok::<_, String>(x + 1)
    /// })
    /// .drive();
    /// assert_eq!(drive.try_take(), Some(Ok(42)));
    /// ```
    pub fn suspend<T>(&self, deferred: Deferred<T, E>) -> Suspension<'_, T, E> {
        Suspension {
            shared: &self.shared,
            state: State::Unregistered(deferred),
        }
    }
}

impl<E> std::fmt::Debug for Suspender<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suspender").finish_non_exhaustive()
    }
}

enum State<T, E> {
    Unregistered(Deferred<T, E>),
    Awaiting(Slot<T, E>),
    Finished,
}

/// Future returned by [`Suspender::suspend`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Suspension<'a, T, E> {
    shared: &'a Mutex<Shared>,
    state: State<T, E>,
}

impl<T, E> Future for Suspension<'_, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, State::Finished) {
            State::Unregistered(deferred) => {
                let slot = Arc::new(Mutex::new(None));
                let mut shared = this.shared.lock();
                if shared.yielded.is_some() {
                    shared.overlapping = true;
                } else {
                    shared.yielded = Some(Box::new(Awaiting {
                        deferred,
                        slot: slot.clone(),
                    }));
                }
                this.state = State::Awaiting(slot);
                Poll::Pending
            }
            State::Awaiting(slot) => {
                let settled = slot.lock().take();
                match settled {
                    Some(settlement) => Poll::Ready(settlement.map_err(Rejection::into_inner)),
                    None => {
                        this.state = State::Awaiting(slot);
                        Poll::Pending
                    }
                }
            }
            State::Finished => panic!("`Suspension` polled after completion"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Settle;
    use futures::task::noop_waker_ref;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingResumer {
        resumed: AtomicUsize,
        abandoned: AtomicUsize,
    }

    impl Resume for CountingResumer {
        fn resume(self: Arc<Self>) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }

        fn abandon(self: Arc<Self>) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        Pin::new(future).poll(&mut Context::from_waker(noop_waker_ref()))
    }

    #[test]
    fn test_first_poll_parks_the_deferred() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let suspender = Suspender::<()>::new(shared.clone());
        let mut suspension = suspender.suspend(Deferred::<u32, ()>::resolved(7));

        assert!(poll_once(&mut suspension).is_pending());
        let yielded = shared.lock().take_yielded::<()>();
        let resumer = Arc::new(CountingResumer::default());
        yielded.expect("a deferred was yielded").register(resumer.clone());

        assert_eq!(resumer.resumed.load(Ordering::SeqCst), 1);
        assert_eq!(poll_once(&mut suspension), Poll::Ready(Ok(7)));
    }

    #[test]
    fn test_rejection_is_unwrapped() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let suspender = Suspender::<&str>::new(shared.clone());
        let mut suspension = suspender.suspend(Deferred::<u32, &str>::rejected("not found"));

        assert!(poll_once(&mut suspension).is_pending());
        let yielded = shared.lock().take_yielded::<&str>();
        yielded
            .expect("a deferred was yielded")
            .register(Arc::new(CountingResumer::default()));
        assert_eq!(poll_once(&mut suspension), Poll::Ready(Err("not found")));
    }

    #[test]
    fn test_pending_until_settled() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let suspender = Suspender::<()>::new(shared.clone());
        let (resolver, deferred) = Deferred::<u32, ()>::pair();
        let mut suspension = suspender.suspend(deferred);

        assert!(poll_once(&mut suspension).is_pending());
        let yielded = shared.lock().take_yielded::<()>();
        yielded
            .expect("a deferred was yielded")
            .register(Arc::new(CountingResumer::default()));
        assert!(poll_once(&mut suspension).is_pending());
        resolver.resolve(3);
        assert_eq!(poll_once(&mut suspension), Poll::Ready(Ok(3)));
    }

    #[test]
    fn test_dropped_producer_abandons() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let suspender = Suspender::<()>::new(shared.clone());
        let mut suspension = suspender.suspend(Deferred::<u32, ()>::new(drop));

        assert!(poll_once(&mut suspension).is_pending());
        let resumer = Arc::new(CountingResumer::default());
        let yielded = shared.lock().take_yielded::<()>();
        yielded.expect("a deferred was yielded").register(resumer.clone());
        assert_eq!(resumer.abandoned.load(Ordering::SeqCst), 1);
        assert_eq!(resumer.resumed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nothing_yielded_is_foreign() {
        let mut shared = Shared::default();
        assert!(matches!(
            shared.take_yielded::<()>(),
            Err(Error::ForeignSuspension)
        ));
    }

    #[test]
    fn test_two_at_once_is_overlapping() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let suspender = Suspender::<()>::new(shared.clone());
        let mut first = suspender.suspend(Deferred::<u32, ()>::resolved(1));
        let mut second = suspender.suspend(Deferred::<u32, ()>::resolved(2));

        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());
        assert!(matches!(
            shared.lock().take_yielded::<()>(),
            Err(Error::OverlappingSuspension)
        ));
    }
}
