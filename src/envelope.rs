/// A failure carried across a suspension boundary.
///
/// Producers settle a [`Continuation`](crate::Continuation) with a
/// `Rejection` instead of a value when the asynchronous operation failed.
/// The [`Suspension`](crate::Suspension) awaiting it unwraps the payload and
/// hands it back to the coroutine body as `Err(payload)`.
///
/// # Examples
///
/// ```
/// use fiber_promise::Rejection;
/// let rejection = Rejection::new("not found");
/// assert_eq!(rejection.payload(), &"not found");
/// assert_eq!(rejection.into_inner(), "not found");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection<E> {
    payload: E,
}

impl<E> Rejection<E> {
    pub fn new(payload: E) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    /// Unwrap the failure so it can be raised at the resume point.
    pub fn into_inner(self) -> E {
        self.payload
    }
}

impl<E> From<E> for Rejection<E> {
    fn from(payload: E) -> Self {
        Self::new(payload)
    }
}

/// What a producer settles a deferred value with.
pub type Settlement<T, E> = Result<T, Rejection<E>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct NotFound(u32);

    #[test]
    fn test_rejection_keeps_payload() {
        let settlement: Settlement<(), NotFound> = Err(NotFound(7).into());
        match settlement {
            Err(rejection) => assert_eq!(rejection.into_inner(), NotFound(7)),
            Ok(()) => panic!("expected a rejection"),
        }
    }
}
