//! Building deferreds out of values, errors, timers and other deferreds.
use crate::chain::Next;
use crate::deferred::Deferred;
use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

struct JoinSlots<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    /// A deferred for `value`: a mirror of it when it is already a deferred,
    /// otherwise one that has already succeeded.
    pub fn wrap_value<S>(scheduler: &S, value: Next<T, E>) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::wrap_value_on(Arc::new(scheduler.clone()), value)
    }

    pub fn succeeded<S>(scheduler: &S, value: T) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        Self::wrap_value(scheduler, Next::Value(value))
    }

    /// A deferred that has already failed with `error`.
    pub fn wrap_error<S>(scheduler: &S, error: E) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        let (settler, deferred) = Self::pending(scheduler);
        settler.fail(error);
        deferred
    }

    fn wrap_value_on(scheduler: Arc<dyn Scheduler>, value: Next<T, E>) -> Self {
        let (settler, deferred) = Self::pending_on(scheduler);
        settler.adopt(Ok(value));
        deferred
    }

    /// Succeed with every value, in input order, once all of `items` have
    /// succeeded; fail with the first failure observed.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{Deferred, EventLoop, Next};
    /// use std::time::Duration;
    ///
    /// let event_loop = EventLoop::new();
    /// let joined = Deferred::<i32, String>::all(
    ///     &event_loop,
    ///     vec![
    ///         Next::Value(1),
    ///         Next::Deferred(Deferred::delay_success(
    ///             &event_loop,
    ///             Next::Value(2),
    ///             Duration::from_millis(10),
    ///         )),
    ///         Next::Value(3),
    ///     ],
    /// );
    /// event_loop.run_until_idle();
    /// assert_eq!(joined.result(), Some(Ok(vec![1, 2, 3])));
    /// ```
    pub fn all<S, I>(scheduler: &S, items: I) -> Deferred<Vec<T>, E>
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator<Item = Next<T, E>>,
    {
        let scheduler: Arc<dyn Scheduler> = Arc::new(scheduler.clone());
        let items: Vec<_> = items.into_iter().collect();
        let (settler, joined) = Deferred::<Vec<T>, E>::pending_on(scheduler.clone());
        if items.is_empty() {
            settler.succeed(Vec::new());
            return joined;
        }
        let slots = Arc::new(Mutex::new(JoinSlots {
            values: vec![None; items.len()],
            remaining: items.len(),
        }));
        for (index, item) in items.into_iter().enumerate() {
            let settler = settler.clone();
            let slots = slots.clone();
            Self::wrap_value_on(scheduler.clone(), item).subscribe(Box::new(move |outcome| {
                match outcome {
                    Ok(value) => {
                        let complete = {
                            let mut slots = slots.lock();
                            slots.values[index] = Some(value);
                            slots.remaining -= 1;
                            (slots.remaining == 0)
                                .then(|| slots.values.drain(..).flatten().collect::<Vec<_>>())
                        };
                        if let Some(values) = complete {
                            settler.succeed(values);
                        }
                    }
                    Err(error) => {
                        settler.fail(error);
                    }
                }
            }));
        }
        joined
    }

    /// Adopt the outcome of whichever of `items` settles first.
    ///
    /// An empty `items` never settles: the result is abandoned immediately.
    pub fn race<S, I>(scheduler: &S, items: I) -> Self
    where
        S: Scheduler + Clone + 'static,
        I: IntoIterator<Item = Next<T, E>>,
    {
        let scheduler: Arc<dyn Scheduler> = Arc::new(scheduler.clone());
        let (settler, raced) = Self::pending_on(scheduler.clone());
        for item in items {
            let settler = settler.clone();
            Self::wrap_value_on(scheduler.clone(), item).subscribe(Box::new(move |outcome| {
                settler.settle(outcome);
            }));
        }
        raced
    }

    /// Behave like [`wrap_value`](Deferred::wrap_value), starting only once
    /// `delay` has elapsed.
    pub fn delay_success<S>(scheduler: &S, value: Next<T, E>, delay: Duration) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        let (settler, deferred) = Self::pending(scheduler);
        scheduler.schedule_after(delay, Box::new(move || settler.adopt(Ok(value))));
        deferred
    }

    /// Fail with `error` once `delay` has elapsed.
    pub fn delay_failure<S>(scheduler: &S, error: E, delay: Duration) -> Self
    where
        S: Scheduler + Clone + 'static,
    {
        let (settler, deferred) = Self::pending(scheduler);
        scheduler.schedule_after(
            delay,
            Box::new(move || {
                settler.fail(error);
            }),
        );
        deferred
    }
}
