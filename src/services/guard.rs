//! Client submission guard: wraps one user-initiated action (a claim or a
//! payment attempt) in single-flight, debounce and cooldown-after-failure.
//! The server stays the source of truth; this exists to cut redundant load
//! and give users one consistent retry story.
//!
//! The guard is an explicit state machine (`Idle -> InFlight -> Cooldown ->
//! Idle`) with timers as plain deadlines, independent of any UI framework's
//! lifecycle.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::error::{Classify, ErrorClass};

#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Invocations within this window of the last accepted one collapse.
    pub debounce_window: Duration,
    /// Consecutive failures before the guard refuses further attempts.
    pub max_failures: u32,
    /// How long the refusal lasts; surfaced to the user as a countdown.
    pub cooldown: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            max_failures: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    InFlight,
    Cooldown { until: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error("an attempt is already in progress")]
    AttemptInProgress,
    #[error("duplicate submission collapsed")]
    Debounced,
    #[error("cooling down, retry in {remaining:?}")]
    CoolingDown { remaining: Duration },
}

#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// Refused locally; the wrapped operation never ran.
    #[error(transparent)]
    Rejected(GuardRejection),
    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E: Classify + std::error::Error> GuardError<E> {
    /// One consistent user-facing message for every way an attempt can end.
    pub fn user_message(&self) -> String {
        match self {
            GuardError::Rejected(GuardRejection::CoolingDown { remaining }) => format!(
                "Too many failed attempts. Please wait {}s before retrying.",
                remaining.as_secs().max(1)
            ),
            GuardError::Rejected(_) => "Request already being processed.".to_string(),
            GuardError::Inner(err) => err.class().user_message().to_string(),
        }
    }
}

struct Inner {
    phase: Phase,
    consecutive_failures: u32,
    last_accepted: Option<Instant>,
}

pub struct SubmissionGuard {
    config: GuardConfig,
    inner: Mutex<Inner>,
}

impl SubmissionGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                consecutive_failures: 0,
                last_accepted: None,
            }),
        }
    }

    /// Run one attempt through the guard.
    ///
    /// While an attempt is in flight a repeat invocation is ignored, not
    /// queued. A success resets the failure counter; hitting `max_failures`
    /// puts the guard into cooldown until the window elapses.
    pub async fn run<F, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.admit().map_err(GuardError::Rejected)?;

        let result = operation.await;

        let mut inner = self.inner.lock().unwrap();
        inner.phase = Phase::Idle;
        match result {
            Ok(value) => {
                inner.consecutive_failures = 0;
                Ok(value)
            }
            Err(err) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.max_failures {
                    inner.phase = Phase::Cooldown {
                        until: Instant::now() + self.config.cooldown,
                    };
                }
                Err(GuardError::Inner(err))
            }
        }
    }

    /// Remaining cooldown, if the guard is refusing attempts right now.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        match inner.phase {
            Phase::Cooldown { until } => {
                let now = Instant::now();
                (now < until).then(|| until - now)
            }
            _ => None,
        }
    }

    fn admit(&self) -> Result<(), GuardRejection> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        if let Phase::Cooldown { until } = inner.phase {
            if now < until {
                return Err(GuardRejection::CoolingDown {
                    remaining: until - now,
                });
            }
            // Cooldown elapsed: the failure counter resets with it.
            inner.phase = Phase::Idle;
            inner.consecutive_failures = 0;
        }

        if inner.phase == Phase::InFlight {
            return Err(GuardRejection::AttemptInProgress);
        }

        if let Some(last) = inner.last_accepted {
            if now.duration_since(last) < self.config.debounce_window {
                return Err(GuardRejection::Debounced);
            }
        }

        inner.phase = Phase::InFlight;
        inner.last_accepted = Some(now);
        Ok(())
    }
}

/// Maps a classified failure to the retry policy the UI should follow.
pub fn retry_hint(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Conflict => "re-select",
        ErrorClass::Validation => "fix-input",
        ErrorClass::Auth => "re-login",
        ErrorClass::Transient => "retry-later",
    }
}
