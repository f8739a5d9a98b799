//! Deriving new deferreds from existing ones.
//!
//! Every operator here funnels into [`Deferred::then`]: it returns a fresh
//! deferred straight away and settles it from whatever the chosen handler
//! produces. A handler returns `Err(e)` to fail the derived deferred, or
//! `Ok(Next)` to succeed with a plain value or adopt another deferred.
use crate::deferred::{Deferred, Settler};
use std::fmt::Debug;

/// What a reaction hands on to the deferred it feeds.
pub enum Next<T, E> {
    /// Succeed with this value.
    Value(T),
    /// Settle the same way this deferred eventually settles.
    Deferred(Deferred<T, E>),
}

impl<T, E> From<Deferred<T, E>> for Next<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Self::Deferred(deferred)
    }
}

impl<T: Debug, E> Debug for Next<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
        }
    }
}

/// A boxed reaction taking an `A` and feeding a `Deferred<T, E>`.
pub type Handler<A, T, E> = Box<dyn FnOnce(A) -> Result<Next<T, E>, E> + Send>;

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    /// Register a success and a failure reaction, returning the deferred that
    /// receives whichever one runs.
    pub fn then<U, F, G>(&self, on_success: F, on_failure: G) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Next<U, E>, E> + Send + 'static,
        G: FnOnce(E) -> Result<Next<U, E>, E> + Send + 'static,
    {
        let (settler, derived) = Deferred::pending_on(self.scheduler());
        self.subscribe(Box::new(move |outcome| {
            let step = match outcome {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            };
            settler.adopt(step);
        }));
        derived
    }

    /// `then` with either handler optional. A missing success handler passes
    /// the value through; a missing failure handler re-raises the error, so
    /// failures skip stages that do not handle them.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{Deferred, EventLoop, Next};
    ///
    /// let event_loop = EventLoop::new();
    /// let chained = Deferred::<i32, &str>::wrap_error(&event_loop, "E")
    ///     .register(None, None)
    ///     .register(Some(Box::new(|value| Ok(Next::Value(value + 1)))), None);
    /// event_loop.run_until_idle();
    /// assert_eq!(chained.result(), Some(Err("E")));
    /// ```
    pub fn register(
        &self,
        on_success: Option<Handler<T, T, E>>,
        on_failure: Option<Handler<E, T, E>>,
    ) -> Deferred<T, E> {
        let on_success: Handler<T, T, E> = match on_success {
            Some(handler) => handler,
            None => Box::new(|value| Ok(Next::Value(value))),
        };
        let on_failure: Handler<E, T, E> = match on_failure {
            Some(handler) => handler,
            None => Box::new(Err),
        };
        self.then(on_success, on_failure)
    }

    /// Handle a failure; successes pass through untouched.
    pub fn catch<G>(&self, on_failure: G) -> Deferred<T, E>
    where
        G: FnOnce(E) -> Result<Next<T, E>, E> + Send + 'static,
    {
        self.then(|value| Ok(Next::Value(value)), on_failure)
    }

    /// Continue on success; failures pass through untouched.
    pub fn and_then<U, F>(&self, on_success: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Next<U, E>, E> + Send + 'static,
    {
        self.then(on_success, Err)
    }

    pub fn map<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Ok(Next::Value(f(value))), Err)
    }

    pub fn map_err<G>(&self, f: G) -> Deferred<T, E>
    where
        G: FnOnce(E) -> E + Send + 'static,
    {
        self.then(|value| Ok(Next::Value(value)), move |error| Err(f(error)))
    }
}

impl<T, E> Settler<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    /// Settle from a handler's result, following `Next::Deferred` to its
    /// eventual outcome.
    pub(crate) fn adopt(self, step: Result<Next<T, E>, E>) {
        match step {
            Ok(Next::Value(value)) => {
                self.succeed(value);
            }
            Ok(Next::Deferred(inner)) => inner.subscribe(Box::new(move |outcome| {
                self.settle(outcome);
            })),
            Err(error) => {
                self.fail(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Next;
    use crate::{Deferred, EventLoop, Status};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn settled(event_loop: &EventLoop, value: i32) -> Deferred<i32, String> {
        Deferred::succeeded(event_loop, value)
    }

    #[test]
    fn then_returns_immediately_and_settles_later() {
        let event_loop = EventLoop::new();
        let derived = settled(&event_loop, 1).then(|v| Ok(Next::Value(v * 10)), Err);
        assert_eq!(derived.status(), Status::Unsettled);
        event_loop.run_until_idle();
        assert_eq!(derived.result(), Some(Ok(10)));
    }

    #[test]
    fn handler_error_fails_the_derived_deferred() {
        let event_loop = EventLoop::new();
        let derived = settled(&event_loop, 1).and_then(|_| -> Result<Next<i32, String>, String> {
            Err("thrown".into())
        });
        event_loop.run_until_idle();
        assert_eq!(derived.result(), Some(Err("thrown".to_owned())));
    }

    #[test]
    fn failure_skips_stages_without_a_handler() {
        let event_loop = EventLoop::new();
        let reached = Arc::new(Mutex::new(false));
        let flag = reached.clone();
        let chained = Deferred::<i32, String>::wrap_error(&event_loop, "E".into())
            .map(move |value| {
                *flag.lock() = true;
                value
            })
            .register(None, None);
        event_loop.run_until_idle();
        assert!(!*reached.lock());
        assert_eq!(chained.result(), Some(Err("E".to_owned())));
    }

    #[test]
    fn catch_recovers_and_passes_success_through() {
        let event_loop = EventLoop::new();
        let recovered = Deferred::<i32, String>::wrap_error(&event_loop, "E".into())
            .catch(|error| Ok(Next::Value(error.len() as i32)));
        let untouched = settled(&event_loop, 5).catch(|_| Ok(Next::Value(0)));
        event_loop.run_until_idle();
        assert_eq!(recovered.result(), Some(Ok(1)));
        assert_eq!(untouched.result(), Some(Ok(5)));
    }

    #[test]
    fn catch_can_rethrow_a_different_error() {
        let event_loop = EventLoop::new();
        let rethrown = Deferred::<i32, String>::wrap_error(&event_loop, "E".into())
            .catch(|error| Err(format!("{error}!")))
            .map_err(|error| format!("{error}?"));
        event_loop.run_until_idle();
        assert_eq!(rethrown.result(), Some(Err("E!?".to_owned())));
    }

    #[test]
    fn returned_deferred_is_flattened() {
        let event_loop = EventLoop::new();
        let inner_loop = event_loop.clone();
        let flattened = settled(&event_loop, 1)
            .and_then(move |_| Ok(Deferred::<i32, String>::succeeded(&inner_loop, 5).into()));
        event_loop.run_until_idle();
        assert_eq!(flattened.result(), Some(Ok(5)));
    }

    #[test]
    fn flattening_waits_for_the_inner_deferred() {
        let event_loop = EventLoop::new();
        let inner_loop = event_loop.clone();
        let flattened = settled(&event_loop, 1).and_then(move |_| {
            Ok(Deferred::<i32, String>::delay_failure(
                &inner_loop,
                "late".into(),
                Duration::from_millis(20),
            )
            .into())
        });
        event_loop.run_ready();
        assert_eq!(flattened.status(), Status::Unsettled);
        event_loop.advance(Duration::from_millis(20));
        assert_eq!(flattened.result(), Some(Err("late".to_owned())));
    }

    #[test]
    fn registering_on_a_pending_deferred_queues() {
        let event_loop = EventLoop::new();
        let (settler, source) = Deferred::<i32, String>::pending(&event_loop);
        let derived = source.map(|value| value + 1);
        event_loop.run_until_idle();
        assert_eq!(derived.status(), Status::Unsettled);
        settler.succeed(1);
        assert_eq!(derived.status(), Status::Unsettled);
        event_loop.run_until_idle();
        assert_eq!(derived.result(), Some(Ok(2)));
    }

    #[test]
    fn abandoning_the_source_abandons_the_chain() {
        let event_loop = EventLoop::new();
        let (settler, source) = Deferred::<i32, String>::pending(&event_loop);
        let derived = source.map(|value| value + 1).map(|value| value * 2);
        drop(settler);
        assert!(source.is_abandoned());
        assert!(derived.is_abandoned());
        let late = source.map(|value| value);
        assert!(late.is_abandoned());
    }
}
