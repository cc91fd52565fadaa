//! Fixed-delay polling against an [`ObjectStore`].
//!
//! The external backend has no way to notify us, so we synchronize with it
//! by probing the bucket: either until an output object shows up, or until
//! a trigger object we uploaded has been deleted. Each operation runs
//! `Idle -> Attempting -> {Success, FatalError, RetriesExhausted}`, with one
//! request outstanding at a time and a constant wait between attempts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::object_store::{ObjectStore, ObjectStoreError};

/// How long to wait between attempts and how many times to retry.
///
/// The delay is the same before every retry. `max_retries = 0` means a
/// single attempt with no waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollPolicy {
    pub delay: Duration,
    pub max_retries: u32,
}

impl PollPolicy {
    pub const fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }

    pub const fn from_millis(delay_ms: u64, max_retries: u32) -> Self {
        Self::new(Duration::from_millis(delay_ms), max_retries)
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// What ends polling successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCondition {
    ObjectExists,
    ObjectAbsent,
}

impl TerminationCondition {
    fn is_met(self, present: bool) -> bool {
        match self {
            Self::ObjectExists => present,
            Self::ObjectAbsent => !present,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// Request issued, response not yet known.
    Pending,
    Found,
    NotFound,
    /// The store failed in a way that looked temporary. Still terminal.
    TransientError(String),
    FatalError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollAttempt {
    /// Zero-based.
    pub attempt_number: u32,
    pub delay_before_attempt: Duration,
    pub result: AttemptResult,
}

/// Receives every attempt twice: once `Pending` and once resolved.
pub trait PollObserver: Send + Sync {
    fn on_attempt(&self, attempt: &PollAttempt);
}

impl<F> PollObserver for F
where
    F: Fn(&PollAttempt) + Send + Sync,
{
    fn on_attempt(&self, attempt: &PollAttempt) {
        self(attempt)
    }
}

/// How a failed poll should be presented to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TimedOut,
    Failed,
    Cancelled,
}

impl FailureKind {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::TimedOut => "operation timed out",
            Self::Failed => "operation failed",
            Self::Cancelled => "operation cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("gave up waiting on {key} after {attempts} attempts")]
    RetriesExhausted { key: String, attempts: u32 },

    #[error("polling {key} failed on attempt {attempts}: {source}")]
    Fatal {
        key: String,
        attempts: u32,
        #[source]
        source: ObjectStoreError,
    },

    #[error("could not decode {key}: {message}")]
    Decode { key: String, message: String },

    #[error("polling {key} was cancelled")]
    Cancelled { key: String },
}

impl PollError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RetriesExhausted { .. } => FailureKind::TimedOut,
            Self::Fatal { .. } | Self::Decode { .. } => FailureKind::Failed,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

/// One probe of the store: whether the object was there, plus whatever
/// payload the probe collected.
enum Observation<T> {
    Present(T),
    Absent,
}

/// Polls a store until an object appears or disappears.
///
/// Cheap to clone. Clones share the cancellation token and observer, so a
/// view can hand out copies and cancel all of them at teardown.
#[derive(Clone)]
pub struct PollingFetcher {
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
    observer: Option<Arc<dyn PollObserver>>,
}

impl PollingFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PollObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// GETs `key` until it exists and returns its bytes.
    pub async fn fetch_when_present(&self, key: &str, policy: PollPolicy) -> Result<Vec<u8>, PollError> {
        let observation = self
            .run(key, policy, TerminationCondition::ObjectExists, || async move {
                self.store.get(key).await.map(|data| match data {
                    Some(data) => Observation::Present(data),
                    None => Observation::Absent,
                })
            })
            .await?;

        match observation {
            Observation::Present(data) => Ok(data),
            // ObjectExists only terminates on Present
            Observation::Absent => Err(PollError::RetriesExhausted {
                key: key.to_string(),
                attempts: policy.max_attempts(),
            }),
        }
    }

    pub async fn fetch_text_when_present(&self, key: &str, policy: PollPolicy) -> Result<String, PollError> {
        let data = self.fetch_when_present(key, policy).await?;
        String::from_utf8(data).map_err(|e| PollError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn fetch_json_when_present<T: DeserializeOwned>(
        &self,
        key: &str,
        policy: PollPolicy,
    ) -> Result<T, PollError> {
        let data = self.fetch_when_present(key, policy).await?;
        serde_json::from_slice(&data).map_err(|e| PollError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Checks existence of `key` until it is gone. Returns `true` once the
    /// object is absent.
    pub async fn wait_until_absent(&self, key: &str, policy: PollPolicy) -> Result<bool, PollError> {
        self.wait_for(key, policy, TerminationCondition::ObjectAbsent).await
    }

    /// Checks existence of `key` until it shows up, without downloading it.
    pub async fn wait_until_present(&self, key: &str, policy: PollPolicy) -> Result<bool, PollError> {
        self.wait_for(key, policy, TerminationCondition::ObjectExists).await
    }

    async fn wait_for(
        &self,
        key: &str,
        policy: PollPolicy,
        until: TerminationCondition,
    ) -> Result<bool, PollError> {
        self.run(key, policy, until, || async move {
            self.store.exists(key).await.map(|present| {
                if present {
                    Observation::Present(())
                } else {
                    Observation::Absent
                }
            })
        })
        .await?;
        Ok(true)
    }

    fn notify(&self, attempt_number: u32, delay_before_attempt: Duration, result: AttemptResult) {
        if let Some(observer) = &self.observer {
            observer.on_attempt(&PollAttempt {
                attempt_number,
                delay_before_attempt,
                result,
            });
        }
    }

    async fn run<T, F, Fut>(
        &self,
        key: &str,
        policy: PollPolicy,
        until: TerminationCondition,
        mut probe: F,
    ) -> Result<Observation<T>, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>, ObjectStoreError>>,
    {
        let cancelled = || PollError::Cancelled { key: key.to_string() };
        let mut attempt_number: u32 = 0;

        loop {
            let delay_before_attempt = if attempt_number == 0 {
                Duration::ZERO
            } else {
                policy.delay
            };

            if attempt_number > 0 {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(cancelled()),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }

            self.notify(attempt_number, delay_before_attempt, AttemptResult::Pending);
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                outcome = probe() => outcome,
            };
            let attempts = attempt_number + 1;

            match outcome {
                Ok(observation) => {
                    let present = matches!(observation, Observation::Present(_));
                    let result = if present {
                        AttemptResult::Found
                    } else {
                        AttemptResult::NotFound
                    };
                    self.notify(attempt_number, delay_before_attempt, result);

                    if until.is_met(present) {
                        info!(key, attempts, "poll condition met");
                        return Ok(observation);
                    }
                    if attempt_number >= policy.max_retries {
                        warn!(key, attempts, "poll retries exhausted");
                        return Err(PollError::RetriesExhausted {
                            key: key.to_string(),
                            attempts,
                        });
                    }
                    debug!(key, attempts, present, delay_ms = policy.delay.as_millis() as u64, "poll condition not met, retrying");
                }
                Err(source) => {
                    let result = if source.is_transient() {
                        AttemptResult::TransientError(source.to_string())
                    } else {
                        AttemptResult::FatalError(source.to_string())
                    };
                    self.notify(attempt_number, delay_before_attempt, result);
                    warn!(key, attempts, error = %source, "poll attempt failed");
                    return Err(PollError::Fatal {
                        key: key.to_string(),
                        attempts,
                        source,
                    });
                }
            }

            attempt_number += 1;
        }
    }
}
