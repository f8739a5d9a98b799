//! A channel scheduler uses a tokio unbounded mpsc channel as its backend.
//! Every task goes through the one channel and is run by a single worker task,
//! so tasks run one at a time and in the order they were sent, no matter which
//! thread sent them. A task that panics is logged and the worker moves on.
use crate::config::Config;
use crate::scheduler::{Scheduler, Task};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

/// A [`Scheduler`] driven by a tokio runtime.
///
/// The worker task lives as long as any clone of the scheduler, including the
/// clones held by deferreds built on it.
///
/// # Examples
///
/// ```
/// use deferred::{channel::ChannelScheduler, Deferred};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let scheduler = ChannelScheduler::new(tokio::runtime::Handle::current());
/// let doubled = Deferred::<i32, String>::succeeded(&scheduler, 21).map(|value| value * 2);
/// assert_eq!(doubled.await, Ok(42));
/// # });
/// ```
#[derive(Clone)]
pub struct ChannelScheduler {
    sender: UnboundedSender<Task>,
    runtime: Handle,
    config: Arc<Config>,
}

impl ChannelScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self::with_config(runtime, Config::default())
    }

    pub fn with_config(runtime: Handle, config: Config) -> Self {
        let (sender, mut receiver) = unbounded_channel::<Task>();
        runtime.spawn(async move {
            while let Some(task) = receiver.recv().await {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    let message = payload
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                        .unwrap_or("non-string panic payload");
                    tracing::error!(panic = message, "channel scheduler task panicked");
                }
            }
            tracing::debug!("channel scheduler closed");
        });
        Self {
            sender,
            runtime,
            config: Arc::new(config),
        }
    }
}

impl Scheduler for ChannelScheduler {
    fn schedule(&self, task: Task) {
        // A closed channel hands the task back; dropping it abandons whatever
        // it would have settled.
        if self.sender.send(task).is_err() {
            tracing::debug!("channel scheduler worker is gone, dropping task");
        }
    }

    fn schedule_after(&self, delay: Duration, task: Task) {
        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(task).is_err() {
                tracing::debug!("channel scheduler worker is gone, dropping timer task");
            }
        });
    }

    fn report_unhandled(&self, failure: &dyn fmt::Debug) {
        self.config.unhandled_failures.report(failure)
    }
}

impl fmt::Debug for ChannelScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelScheduler")
            .field("closed", &self.sender.is_closed())
            .field("config", &self.config)
            .finish()
    }
}
