//! Scheduler-wide settings.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Environment variable read by [`Config::from_env`].
pub const UNHANDLED_FAILURES_ENV: &str = "DEFERRED_UNHANDLED_FAILURES";

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// What to do with a failure nobody registered a reaction for.
    pub unhandled_failures: UnhandledFailures,
}

impl Config {
    /// Defaults, with the unhandled-failure policy taken from
    /// `DEFERRED_UNHANDLED_FAILURES` when it is set.
    pub fn from_env() -> Result<Self, ParsePolicyError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(UNHANDLED_FAILURES_ENV) {
            config.unhandled_failures = raw.parse()?;
        }
        Ok(config)
    }

    pub fn unhandled_failures(mut self, policy: UnhandledFailures) -> Self {
        self.unhandled_failures = policy;
        self
    }
}

/// Policy for failures that reach the end of a chain without a handler.
///
/// A failure counts as unhandled when, by the time its settlement task runs,
/// no reaction was ever registered on the failed deferred and no future ever
/// polled it.
#[derive(Clone, Default)]
pub enum UnhandledFailures {
    Ignore,
    /// Emit a `tracing` warning.
    #[default]
    Log,
    /// Pass the `Debug` rendering of the error to a callback.
    Hook(Arc<dyn Fn(&str) + Send + Sync>),
}

impl UnhandledFailures {
    pub fn hook(hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self::Hook(Arc::new(hook))
    }

    pub(crate) fn report(&self, failure: &dyn fmt::Debug) {
        match self {
            Self::Ignore => {}
            Self::Log => {
                tracing::warn!(?failure, "deferred failed with no failure handler attached")
            }
            Self::Hook(hook) => hook(&format!("{failure:?}")),
        }
    }
}

impl fmt::Debug for UnhandledFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => f.write_str("Ignore"),
            Self::Log => f.write_str("Log"),
            Self::Hook(_) => f.write_str("Hook(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown unhandled-failure policy `{0}`, expected `ignore` or `log`")]
pub struct ParsePolicyError(pub String);

impl FromStr for UnhandledFailures {
    type Err = ParsePolicyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ignore" | "off" => Ok(Self::Ignore),
            "log" | "warn" => Ok(Self::Log),
            _ => Err(ParsePolicyError(raw.to_owned())),
        }
    }
}
