use std::sync::Arc;

use parking_lot::Mutex;

use crate::deferred::{Continuation, Deferred, Settle};
use crate::envelope::Settlement;

/// The producing half of [`Deferred::pair`]. It can be settled from any
/// thread, before or after the deferred half has been registered.
///
/// # Examples
///
/// ```
/// use fiber_promise::{Coroutine, Deferred, Settle};
/// use std::thread;
///
/// let (resolver, deferred) = Deferred::<String, ()>::pair();
/// let drive = Coroutine::new(|s| async move { s.suspend(deferred).await }).drive();
///
/// let task = thread::spawn(move || resolver.resolve("Hi".into()));
/// assert_eq!(drive.wait(), Ok(String::from("Hi")));
/// task.join().expect("The task thread has panicked.");
/// ```
#[derive(Debug)]
pub struct Resolver<T, E> {
    promise: Arc<Mutex<Inner<T, E>>>,
}

#[derive(Debug)]
enum Inner<T, E> {
    Fresh,
    Registered(Continuation<T, E>),
    Settled(Settlement<T, E>),
    Tainted,
}

impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Split a deferred value into a resolver and the deferred itself.
    pub fn pair() -> (Resolver<T, E>, Self) {
        let inner = Arc::new(Mutex::new(Inner::Fresh));
        let promise = inner.clone();
        let deferred = Deferred::new(move |continuation: Continuation<T, E>| {
            let mut promise = promise.lock();
            match std::mem::replace(&mut *promise, Inner::Tainted) {
                Inner::Fresh => *promise = Inner::Registered(continuation),
                Inner::Settled(settlement) => {
                    drop(promise);
                    continuation.settle(settlement)
                }
                // The resolver is gone; dropping the continuation abandons it.
                Inner::Tainted | Inner::Registered(_) => {
                    drop(promise);
                    drop(continuation)
                }
            }
        });
        (Resolver { promise: inner }, deferred)
    }
}

impl<T, E> Settle<T, E> for Resolver<T, E> {
    fn settle(self, settlement: Settlement<T, E>) {
        let mut promise = self.promise.lock();
        match std::mem::replace(&mut *promise, Inner::Tainted) {
            Inner::Registered(continuation) => {
                drop(promise);
                continuation.settle(settlement)
            }
            Inner::Fresh => *promise = Inner::Settled(settlement),
            other => *promise = other,
        }
    }
}

impl<T, E> Drop for Resolver<T, E> {
    /// If this is an unsettled resolver, abandon the waiting continuation.
    fn drop(&mut self) {
        let mut promise = self.promise.lock();
        match std::mem::replace(&mut *promise, Inner::Tainted) {
            Inner::Registered(continuation) => {
                drop(promise);
                drop(continuation)
            }
            Inner::Settled(settlement) => *promise = Inner::Settled(settlement),
            Inner::Fresh | Inner::Tainted => {}
        }
    }
}
