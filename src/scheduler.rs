//! The host scheduler a [`Deferred`](crate::Deferred) hands its reactions to.
//!
//! A scheduler only has to promise two things: tasks passed to
//! [`Scheduler::schedule`] run after the current call stack unwinds, and they
//! run in the order they were scheduled. [`EventLoop`] is a deterministic
//! implementation driven by hand, with a virtual clock for delayed tasks.
use crate::config::{Config, UnhandledFailures};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work handed to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `task` on a later turn, after every task scheduled before it.
    ///
    /// Deferreds call this while holding their own lock, so it must only
    /// enqueue: running `task` inline would deadlock.
    fn schedule(&self, task: Task);

    /// Run `task` once `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, task: Task);

    /// Called when a deferred fails and nothing ever observed it.
    fn report_unhandled(&self, failure: &dyn fmt::Debug) {
        UnhandledFailures::Log.report(failure)
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }

    fn schedule_after(&self, delay: Duration, task: Task) {
        (**self).schedule_after(delay, task)
    }

    fn report_unhandled(&self, failure: &dyn fmt::Debug) {
        (**self).report_unhandled(failure)
    }
}

/// A single-threaded, manually driven scheduler.
///
/// Nothing runs until one of [`turn`](EventLoop::turn),
/// [`run_ready`](EventLoop::run_ready), [`advance`](EventLoop::advance) or
/// [`run_until_idle`](EventLoop::run_until_idle) is called. Time is virtual:
/// delayed tasks fire when the loop's clock is moved past their deadline, so
/// tests never sleep.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, EventLoop, Next};
/// use std::time::Duration;
///
/// let event_loop = EventLoop::new();
/// let late = Deferred::<&str, ()>::delay_success(
///     &event_loop,
///     Next::Value("late"),
///     Duration::from_millis(100),
/// );
/// event_loop.advance(Duration::from_millis(99));
/// assert_eq!(late.result(), None);
/// event_loop.advance(Duration::from_millis(1));
/// assert_eq!(late.result(), Some(Ok("late")));
/// ```
#[derive(Clone, Default)]
pub struct EventLoop {
    state: Arc<Mutex<LoopState>>,
    config: Arc<Config>,
}

#[derive(Default)]
struct LoopState {
    ready: VecDeque<Task>,
    timers: BTreeMap<(Duration, u64), Task>,
    now: Duration,
    next_timer: u64,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            state: Arc::default(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Virtual time elapsed since the loop was created.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Ready tasks plus timers that have not fired yet.
    pub fn pending_tasks(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.timers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0
    }

    /// Run the oldest ready task, if there is one.
    pub fn turn(&self) -> bool {
        // The lock must be released before the task runs, tasks schedule more.
        let task = self.state.lock().ready.pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run ready tasks until the queue is empty, including any they schedule.
    /// Timers are left alone.
    pub fn run_ready(&self) -> usize {
        let mut ran = 0;
        while self.turn() {
            ran += 1;
        }
        ran
    }

    /// Move the clock forward by `by`, firing every timer whose deadline falls
    /// inside the window. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = self.run_ready();
        while self.fire_next_timer(Some(target)) {
            ran += self.run_ready();
        }
        self.state.lock().now = target;
        ran
    }

    /// Run everything, jumping the clock to each pending timer in turn, until
    /// no work is left.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = self.run_ready();
        while self.fire_next_timer(None) {
            ran += self.run_ready();
        }
        ran
    }

    fn fire_next_timer(&self, limit: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        let Some((&(deadline, _), _)) = state.timers.first_key_value() else {
            return false;
        };
        if limit.is_some_and(|limit| deadline > limit) {
            return false;
        }
        let Some((_, task)) = state.timers.pop_first() else {
            return false;
        };
        if deadline > state.now {
            state.now = deadline;
        }
        tracing::trace!(deadline = ?deadline, "event loop timer fired");
        state.ready.push_back(task);
        true
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, task: Task) {
        self.state.lock().ready.push_back(task);
    }

    fn schedule_after(&self, delay: Duration, task: Task) {
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        let seq = state.next_timer;
        state.next_timer += 1;
        state.timers.insert((deadline, seq), task);
    }

    fn report_unhandled(&self, failure: &dyn fmt::Debug) {
        self.config.unhandled_failures.report(failure)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventLoop")
            .field("now", &state.now)
            .field("ready", &state.ready.len())
            .field("timers", &state.timers.len())
            .finish()
    }
}
