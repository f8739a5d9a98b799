use crate::scheduler::Scheduler;
use crate::Error;
use parking_lot::Mutex;
use std::fmt::{self, Debug};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// A queued continuation. It receives the settled outcome and picks its
/// success or failure branch itself.
pub(crate) type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unsettled,
    Succeeded,
    Failed,
}

/// The eventual result of an asynchronous operation.
///
/// A `Deferred` starts unsettled and settles exactly once, either succeeding
/// with a `T` or failing with an `E`. Clones are handles to the same value.
/// Reactions registered through [`then`](Deferred::then) and friends always
/// run on a later scheduler turn, in the order they were registered.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, EventLoop, Next, Status};
///
/// let event_loop = EventLoop::new();
/// let answer = Deferred::<i32, String>::new(&event_loop, |settle_success, _| {
///     settle_success.settle(41);
///     Ok(())
/// });
/// let next = answer.map(|value| value + 1);
/// assert_eq!(next.status(), Status::Unsettled);
///
/// event_loop.run_until_idle();
/// assert_eq!(next.result(), Some(Ok(42)));
/// ```
pub struct Deferred<T, E> {
    shared: Arc<Shared<T, E>>,
}

struct Shared<T, E> {
    state: Mutex<State<T, E>>,
    scheduler: Arc<dyn Scheduler>,
    settlers: AtomicUsize,
    observed: AtomicBool,
}

enum State<T, E> {
    Pending {
        reactions: Vec<Reaction<T, E>>,
        wakers: Vec<Waker>,
    },
    Settled(Result<T, E>),
    /// Every settlement handle was dropped while pending.
    Abandoned,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Deferred<T, E> {
    pub fn status(&self) -> Status {
        match &*self.shared.state.lock() {
            State::Settled(Ok(_)) => Status::Succeeded,
            State::Settled(Err(_)) => Status::Failed,
            State::Pending { .. } | State::Abandoned => Status::Unsettled,
        }
    }

    /// True once every settlement handle is gone without having settled.
    /// An abandoned deferred stays [`Status::Unsettled`] forever.
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Abandoned)
    }

    pub(crate) fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.shared.scheduler.clone()
    }

    fn abandon(&self) {
        let (reactions, wakers) = {
            let mut state = self.shared.state.lock();
            let State::Pending { reactions, wakers } = &mut *state else {
                return;
            };
            let reactions = mem::take(reactions);
            let wakers = mem::take(wakers);
            *state = State::Abandoned;
            (reactions, wakers)
        };
        tracing::debug!(
            dropped_reactions = reactions.len(),
            "deferred abandoned before settling"
        );
        for waker in wakers {
            waker.wake();
        }
        // Dropping the reactions drops the settlers of everything chained on
        // this deferred, so they are abandoned in turn.
        drop(reactions);
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    /// Create a deferred and run `executor` synchronously with its two
    /// settlement procedures. An `Err` returned by the executor fails the
    /// deferred, unless the executor already settled it.
    pub fn new<S, F>(scheduler: &S, executor: F) -> Self
    where
        S: Scheduler + Clone + 'static,
        F: FnOnce(SettleSuccess<T, E>, SettleFailure<T, E>) -> Result<(), E>,
    {
        let (settler, deferred) = Self::pending_on(Arc::new(scheduler.clone()));
        let (settle_success, settle_failure) = settler.clone().split();
        if let Err(error) = executor(settle_success, settle_failure) {
            settler.fail(error);
        }
        deferred
    }

    /// An unsettled deferred together with the handle that settles it.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::{Deferred, EventLoop};
    /// use futures::executor::block_on;
    /// use std::thread;
    ///
    /// let event_loop = EventLoop::new();
    /// let (settler, consumer) = Deferred::<String, String>::pending(&event_loop);
    /// let task = thread::spawn(move || settler.succeed("Hi".into()));
    /// assert_eq!(block_on(consumer), Ok("Hi".to_owned()));
    /// task.join().expect("The settling thread has panicked.");
    /// ```
    pub fn pending<S>(scheduler: &S) -> (Settler<T, E>, Self)
    where
        S: Scheduler + Clone + 'static,
    {
        Self::pending_on(Arc::new(scheduler.clone()))
    }

    pub(crate) fn pending_on(scheduler: Arc<dyn Scheduler>) -> (Settler<T, E>, Self) {
        let deferred = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending {
                    reactions: Vec::new(),
                    wakers: Vec::new(),
                }),
                scheduler,
                settlers: AtomicUsize::new(0),
                observed: AtomicBool::new(false),
            }),
        };
        (Settler::attach(&deferred), deferred)
    }

    /// A copy of the outcome, once settled.
    pub fn result(&self) -> Option<Result<T, E>> {
        match &*self.shared.state.lock() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Pending { .. } | State::Abandoned => None,
        }
    }

    /// Queue `reaction` to receive the outcome on a later scheduler turn.
    pub(crate) fn subscribe(&self, reaction: Reaction<T, E>) {
        self.shared.observed.store(true, Ordering::Release);
        {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { reactions, .. } => {
                    reactions.push(reaction);
                    return;
                }
                State::Settled(outcome) => {
                    // Scheduled under the lock so a late reaction cannot
                    // overtake the batch handed over by `settle`.
                    let outcome = outcome.clone();
                    self.shared
                        .scheduler
                        .schedule(Box::new(move || reaction(outcome)));
                    return;
                }
                State::Abandoned => {}
            }
        }
        drop(reaction);
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let wakers = {
            let mut state = self.shared.state.lock();
            let State::Pending { reactions, wakers } = &mut *state else {
                return false;
            };
            let reactions = mem::take(reactions);
            let wakers = mem::take(wakers);
            *state = State::Settled(outcome.clone());
            tracing::trace!(
                succeeded = outcome.is_ok(),
                reactions = reactions.len(),
                "deferred settled"
            );
            // The batch must reach the scheduler before any subscriber can
            // see `Settled`.
            if !reactions.is_empty() || outcome.is_err() {
                let deferred = self.clone();
                self.shared
                    .scheduler
                    .schedule(Box::new(move || deferred.run_reactions(reactions, outcome)));
            }
            wakers
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    fn run_reactions(&self, reactions: Vec<Reaction<T, E>>, outcome: Result<T, E>) {
        if let Err(error) = &outcome {
            if !self.shared.observed.load(Ordering::Acquire) {
                self.shared.scheduler.report_unhandled(error);
            }
        }
        for reaction in reactions {
            reaction(outcome.clone());
        }
    }
}

impl<T, E> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.status())
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

impl<T: Clone, E: Clone> Future for Deferred<T, E> {
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.observed.store(true, Ordering::Release);
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone().map_err(Error::Failed)),
            State::Abandoned => Poll::Ready(Err(Error::Abandoned)),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// The producer side of a [`Deferred`].
///
/// Settlers can be cloned and sent across threads. The first call to
/// [`succeed`](Settler::succeed), [`fail`](Settler::fail) or
/// [`settle`](Settler::settle) on any clone wins; every later call returns
/// `false` and changes nothing. When the last settler for a deferred is dropped
/// before it settled, the deferred is abandoned.
pub struct Settler<T, E> {
    target: Deferred<T, E>,
}

impl<T, E> Settler<T, E> {
    fn attach(target: &Deferred<T, E>) -> Self {
        target.shared.settlers.fetch_add(1, Ordering::Relaxed);
        Self {
            target: target.clone(),
        }
    }

    /// Split into the two procedures an executor receives.
    pub fn split(self) -> (SettleSuccess<T, E>, SettleFailure<T, E>) {
        (SettleSuccess(self.clone()), SettleFailure(self))
    }
}

impl<T, E> Settler<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    pub fn succeed(&self, value: T) -> bool {
        self.target.settle(Ok(value))
    }

    pub fn fail(&self, error: E) -> bool {
        self.target.settle(Err(error))
    }

    pub fn settle(&self, outcome: Result<T, E>) -> bool {
        self.target.settle(outcome)
    }
}

impl<T, E> Clone for Settler<T, E> {
    fn clone(&self) -> Self {
        Self::attach(&self.target)
    }
}

impl<T, E> Drop for Settler<T, E> {
    fn drop(&mut self) {
        if self.target.shared.settlers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.target.abandon();
        }
    }
}

impl<T, E> Debug for Settler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler").field("target", &self.target).finish()
    }
}

/// `settle_success`, as handed to an executor.
pub struct SettleSuccess<T, E>(Settler<T, E>);

/// `settle_failure`, as handed to an executor.
pub struct SettleFailure<T, E>(Settler<T, E>);

impl<T, E> SettleSuccess<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    pub fn settle(&self, value: T) -> bool {
        self.0.succeed(value)
    }
}

impl<T, E> SettleFailure<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
{
    pub fn settle(&self, error: E) -> bool {
        self.0.fail(error)
    }
}

impl<T, E> Clone for SettleSuccess<T, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T, E> Clone for SettleFailure<T, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T, E> Debug for SettleSuccess<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SettleSuccess").field(&self.0).finish()
    }
}

impl<T, E> Debug for SettleFailure<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SettleFailure").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Deferred, Status};
    use crate::{Error, EventLoop};
    use futures::executor::block_on;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_settlement_wins() {
        let event_loop = EventLoop::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let record = calls.clone();
        let deferred = Deferred::<i32, &str>::new(&event_loop, |ok, fail| {
            let mut record = record.lock();
            record.push(ok.settle(1));
            record.push(fail.settle("late"));
            record.push(ok.settle(2));
            Ok(())
        });
        assert_eq!(*calls.lock(), vec![true, false, false]);
        assert_eq!(deferred.status(), Status::Succeeded);
        assert_eq!(deferred.result(), Some(Ok(1)));
    }

    #[test]
    fn failure_first_then_success_is_ignored() {
        let event_loop = EventLoop::new();
        let (settler, deferred) = Deferred::<i32, &str>::pending(&event_loop);
        assert!(settler.fail("first"));
        assert!(!settler.succeed(1));
        assert!(!settler.fail("second"));
        assert_eq!(deferred.result(), Some(Err("first")));
    }

    #[test]
    fn executor_error_fails_the_deferred() {
        let event_loop = EventLoop::new();
        let deferred = Deferred::<i32, &str>::new(&event_loop, |_, _| Err("boom"));
        assert_eq!(deferred.status(), Status::Failed);
        assert_eq!(deferred.result(), Some(Err("boom")));
    }

    #[test]
    fn executor_error_after_settling_is_ignored() {
        let event_loop = EventLoop::new();
        let deferred = Deferred::<i32, &str>::new(&event_loop, |ok, _| {
            ok.settle(7);
            Err("boom")
        });
        assert_eq!(deferred.result(), Some(Ok(7)));
    }

    #[test]
    fn reactions_wait_for_the_scheduler() {
        let event_loop = EventLoop::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let deferred = Deferred::<i32, ()>::new(&event_loop, |ok, _| {
            ok.settle(1);
            Ok(())
        });
        deferred.subscribe(Box::new(move |_| flag.store(true, Ordering::SeqCst)));
        assert!(!ran.load(Ordering::SeqCst));
        event_loop.run_until_idle();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn dropping_every_settler_abandons() {
        let event_loop = EventLoop::new();
        let (settler, deferred) = Deferred::<i32, String>::pending(&event_loop);
        let extra = settler.clone();
        drop(settler);
        assert!(!deferred.is_abandoned());
        drop(extra);
        assert!(deferred.is_abandoned());
        assert_eq!(deferred.status(), Status::Unsettled);
        assert_eq!(block_on(deferred), Err(Error::Abandoned));
    }

    #[test]
    fn executor_that_keeps_nothing_abandons() {
        let event_loop = EventLoop::new();
        let deferred = Deferred::<i32, String>::new(&event_loop, |_, _| Ok(()));
        assert!(deferred.is_abandoned());
    }

    #[test]
    fn settled_deferred_is_not_abandoned_by_drop() {
        let event_loop = EventLoop::new();
        let (settler, deferred) = Deferred::<i32, String>::pending(&event_loop);
        settler.succeed(3);
        drop(settler);
        assert!(!deferred.is_abandoned());
        assert_eq!(block_on(deferred), Ok(3));
    }

    #[test]
    fn awaiting_a_failure() {
        let event_loop = EventLoop::new();
        let (settler, deferred) = Deferred::<(), String>::pending(&event_loop);
        let waiter = thread::spawn(move || block_on(deferred));
        let sender = thread::spawn(move || settler.fail("reject!!".into()));
        sender.join().expect("The sender thread has panicked");
        assert_eq!(
            waiter.join().expect("The waiter thread has panicked"),
            Err(Error::Failed("reject!!".to_owned()))
        );
    }

    #[test]
    fn many_consumers_see_the_same_value() {
        let event_loop = EventLoop::new();
        let (settler, deferred) = Deferred::<String, ()>::pending(&event_loop);
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let consumer = deferred.clone();
                thread::spawn(move || block_on(consumer))
            })
            .collect();
        settler.succeed("🍓".into());
        for consumer in consumers {
            assert_eq!(
                consumer.join().expect("A consumer thread has panicked"),
                Ok("🍓".to_owned())
            );
        }
    }

    #[test]
    fn concurrent_settlers_only_one_wins() {
        let event_loop = EventLoop::new();
        let (settler, deferred) = Deferred::<usize, usize>::pending(&event_loop);
        let racers: Vec<_> = (0..8)
            .map(|i| {
                let settler = settler.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        settler.succeed(i)
                    } else {
                        settler.fail(i)
                    }
                })
            })
            .collect();
        let wins = racers
            .into_iter()
            .map(|racer| racer.join().expect("A racer thread has panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_ne!(deferred.status(), Status::Unsettled);
    }
}
