use crate::envelope::{Rejection, Settlement};

/// Anything that can settle a deferred value exactly once.
///
/// Both [`Continuation`] and [`Resolver`](crate::Resolver) consume themselves
/// on settlement, so a second settlement does not compile.
pub trait Settle<T, E>: Sized {
    fn settle(self, settlement: Settlement<T, E>);

    fn resolve(self, value: T) {
        self.settle(Ok(value))
    }

    fn reject(self, failure: E) {
        self.settle(Err(Rejection::new(failure)))
    }
}

/// Receiver side of a continuation. The driver installs one that resumes the
/// coroutine; [`Continuation::new`] installs a plain callback.
pub(crate) trait Sink<T, E>: Send {
    fn settle(self: Box<Self>, settlement: Settlement<T, E>);

    /// The continuation was dropped without being settled.
    fn abandon(self: Box<Self>);
}

struct FnSink<F>(F);

impl<T, E, F> Sink<T, E> for FnSink<F>
where
    F: FnOnce(Settlement<T, E>) + Send,
{
    fn settle(self: Box<Self>, settlement: Settlement<T, E>) {
        (self.0)(settlement)
    }

    fn abandon(self: Box<Self>) {}
}

/// The one-shot procedure a producer invokes with its settled result.
///
/// Dropping a continuation without settling it abandons the waiting
/// coroutine, which then finishes with
/// [`Error::ProducerDropped`](crate::Error::ProducerDropped).
pub struct Continuation<T, E> {
    sink: Option<Box<dyn Sink<T, E>>>,
}

impl<T, E> Continuation<T, E> {
    /// A continuation that calls `callback` with the settlement.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Settlement<T, E>) + Send + 'static,
    {
        Self::from_sink(Box::new(FnSink(callback)))
    }

    pub(crate) fn from_sink(sink: Box<dyn Sink<T, E>>) -> Self {
        Self { sink: Some(sink) }
    }
}

impl<T, E> Settle<T, E> for Continuation<T, E> {
    fn settle(mut self, settlement: Settlement<T, E>) {
        if let Some(sink) = self.sink.take() {
            sink.settle(settlement)
        }
    }
}

impl<T, E> Drop for Continuation<T, E> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.abandon()
        }
    }
}

impl<T, E> std::fmt::Debug for Continuation<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("settled", &self.sink.is_none())
            .finish()
    }
}

type Producer<T, E> = Box<dyn FnOnce(Continuation<T, E>) + Send>;

/// A value that is not available yet.
///
/// A `Deferred` owns a producer: a routine that, once handed a
/// [`Continuation`], eventually settles it exactly once. Nothing runs at
/// construction; the producer is invoked when the deferred is registered.
///
/// # Examples
///
/// ```
/// use fiber_promise::{Continuation, Deferred, Settle};
/// use std::sync::mpsc::channel;
///
/// let deferred = Deferred::<u32, ()>::new(|continuation| continuation.resolve(41));
/// let (tx, rx) = channel();
/// deferred.register(Continuation::new(move |settlement| tx.send(settlement).unwrap()));
/// assert_eq!(rx.recv().unwrap(), Ok(41));
/// ```
///
/// Registration consumes the deferred, so registering twice is rejected:
///
/// ```compile_fail
/// use fiber_promise::{Continuation, Deferred};
///
/// let deferred = Deferred::<u32, ()>::resolved(1);
/// deferred.register(Continuation::new(|_| {}));
/// deferred.register(Continuation::new(|_| {}));
/// ```
pub struct Deferred<T, E> {
    producer: Producer<T, E>,
}

impl<T, E> Deferred<T, E> {
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Continuation<T, E>) + Send + 'static,
    {
        Self {
            producer: Box::new(producer),
        }
    }

    /// A deferred whose producer resolves synchronously with `value`.
    pub fn resolved(value: T) -> Self
    where
        T: Send + 'static,
    {
        Self::new(move |continuation| continuation.resolve(value))
    }

    /// A deferred whose producer rejects synchronously with `failure`.
    pub fn rejected(failure: E) -> Self
    where
        E: Send + 'static,
    {
        Self::new(move |continuation| continuation.reject(failure))
    }

    /// Hand `continuation` to the producer. The producer runs immediately.
    pub fn register(self, continuation: Continuation<T, E>) {
        (self.producer)(continuation)
    }
}

impl<T, E> std::fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_producer_runs_on_register_not_on_construction() {
        let ran = Arc::new(AtomicBool::new(false));
        let deferred = Deferred::<(), ()>::new({
            let ran = ran.clone();
            move |continuation| {
                ran.store(true, Ordering::SeqCst);
                continuation.resolve(())
            }
        });
        assert!(!ran.load(Ordering::SeqCst));
        deferred.register(Continuation::new(|_| {}));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rejected_delivers_rejection() {
        let (tx, rx) = channel();
        Deferred::<(), &str>::rejected("boom")
            .register(Continuation::new(move |settlement| tx.send(settlement).unwrap()));
        assert_eq!(rx.recv().unwrap(), Err(Rejection::new("boom")));
    }

    #[test]
    fn test_settle_from_another_thread() {
        let (tx, rx) = channel();
        let deferred = Deferred::<String, ()>::new(|continuation| {
            thread::spawn(move || continuation.resolve(String::from("🍓")));
        });
        deferred.register(Continuation::new(move |settlement| tx.send(settlement).unwrap()));
        assert_eq!(rx.recv().unwrap(), Ok(String::from("🍓")));
    }

    struct CountingSink(Arc<AtomicUsize>);

    impl Sink<(), ()> for CountingSink {
        fn settle(self: Box<Self>, _: Settlement<(), ()>) {}

        fn abandon(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dropped_continuation_abandons_once() {
        let abandoned = Arc::new(AtomicUsize::new(0));
        let deferred = Deferred::<(), ()>::new(drop);
        deferred.register(Continuation::from_sink(Box::new(CountingSink(abandoned.clone()))));
        assert_eq!(abandoned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_settled_continuation_does_not_abandon() {
        let abandoned = Arc::new(AtomicUsize::new(0));
        Deferred::<(), ()>::resolved(())
            .register(Continuation::from_sink(Box::new(CountingSink(abandoned.clone()))));
        assert_eq!(abandoned.load(Ordering::SeqCst), 0);
    }
}
