//! Bounded retry with caller-supplied error classification.
//!
//! [`RetryExecutor::execute`] runs an operation, asks the classifier whether a
//! failure is transient, and sleeps through the [`RetryPolicy`] backoff
//! schedule between attempts. The agent passes a transport classifier, the
//! relational store passes a database classifier; the executor itself knows
//! nothing about either.

use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget and wait schedule. Immutable once built.
///
/// # Examples
///
/// ```
/// use pulsemon_common::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts(), 3);
/// assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
/// assert_eq!(policy.backoff_for(7), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call. An empty schedule retries
    /// without waiting.
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before retry number `retry` (zero-based). The last entry is reused
    /// past the end of the schedule.
    pub fn backoff_for(&self, retry: usize) -> Duration {
        self.backoff
            .get(retry)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        )
    }
}

/// Config-file form of a [`RetryPolicy`], shared by the agent and server
/// `[retry]` tables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![1, 3, 5]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        )
    }
}

/// Outcome of an operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The cancellation token fired before or between attempts.
    #[error("{operation}: cancelled after {attempts} attempt(s)")]
    Cancelled { operation: String, attempts: u32 },

    /// The last error was terminal, or the attempt budget ran out.
    #[error("{operation}: failed after {attempts} attempt(s): {source}")]
    Failed {
        operation: String,
        attempts: u32,
        transient: bool,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Cancelled { attempts, .. } | RetryError::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            RetryError::Cancelled { operation, .. } | RetryError::Failed { operation, .. } => {
                operation
            }
        }
    }

    /// The last underlying error, if any attempt ran to completion.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Failed { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Drives an operation through a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, `classify` calls its error terminal, the
    /// attempt budget is spent, or `cancel` fires.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        operation: &str,
        classify: C,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(operation, attempts, "Operation cancelled");
                return Err(RetryError::Cancelled {
                    operation: operation.to_string(),
                    attempts,
                });
            }

            attempts += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(operation, attempts, "Operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let transient = classify(&err);
            if !transient || attempts >= self.policy.max_attempts {
                return Err(RetryError::Failed {
                    operation: operation.to_string(),
                    attempts,
                    transient,
                    source: err,
                });
            }

            let delay = self.policy.backoff_for((attempts - 1) as usize);
            tracing::warn!(
                operation,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        operation: operation.to_string(),
                        attempts,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
