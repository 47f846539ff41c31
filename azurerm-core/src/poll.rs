//! Poll - Wait for an asynchronous mutation to reach a terminal state
//!
//! The control plane applies most mutations asynchronously and only exposes a
//! status read API. [`wait_for_state`] refreshes that status on a fixed cadence
//! and classifies every observation:
//!
//! - a `target` state counts towards `continuous_target_occurrence`; the wait
//!   succeeds once it has been observed that many times in a row
//! - `NotFound` is treated as pending (read-after-write lag), optionally capped
//!   by `not_found_checks`
//! - a `pending` state resets the target counter and keeps polling
//! - anything else aborts the wait
//!
//! The deadline and the cancellation token are honoured both while a refresh
//! is in flight and while sleeping between refreshes.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ProviderError, ProviderResult};

/// Lower bound for the interval between two refreshes
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default overall budget for a wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default interval between two refreshes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Remote-reported lifecycle status of a resource or operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProvisioningState {
    Accepted,
    Succeeded,
    Failed,
    Canceled,
    /// The read API does not (yet) know the resource
    NotFound,
    /// Any other remote value (e.g., "Creating", "InProgress")
    Other(String),
}

impl ProvisioningState {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "accepted" => Self::Accepted,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            "notfound" | "responsenotfound" => Self::NotFound,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Accepted => "Accepted",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::NotFound => "NotFound",
            Self::Other(s) => s,
        }
    }

    /// Succeeded, Failed or Canceled
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ProvisioningState {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for ProvisioningState {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<ProvisioningState> for String {
    fn from(state: ProvisioningState) -> Self {
        state.as_str().to_string()
    }
}

/// One observation returned by a refresh function
#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed<T> {
    pub value: Option<T>,
    pub state: ProvisioningState,
}

impl<T> Refreshed<T> {
    pub fn found(value: T, state: ProvisioningState) -> Self {
        Self {
            value: Some(value),
            state,
        }
    }

    pub fn not_found() -> Self {
        Self {
            value: None,
            state: ProvisioningState::NotFound,
        }
    }
}

/// Polling policy for one wait
#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub pending: Vec<ProvisioningState>,
    pub target: Vec<ProvisioningState>,
    /// Overall wall-clock budget
    pub timeout: Duration,
    /// Absolute end of the wait; replaces `timeout` when set so that several
    /// waits of one operation share a single budget
    pub deadline: Option<Instant>,
    /// Interval between refreshes
    pub min_interval: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Consecutive target observations required before success
    pub continuous_target_occurrence: u32,
    /// Give up after this many consecutive not-found reads (None: until timeout)
    pub not_found_checks: Option<u32>,
}

impl WaitConfig {
    pub fn new(pending: Vec<ProvisioningState>, target: Vec<ProvisioningState>) -> Self {
        Self {
            pending,
            target,
            timeout: DEFAULT_TIMEOUT,
            deadline: None,
            min_interval: DEFAULT_INTERVAL,
            delay: Duration::ZERO,
            continuous_target_occurrence: 1,
            not_found_checks: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn continuous_target_occurrence(mut self, count: u32) -> Self {
        self.continuous_target_occurrence = count;
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = Some(checks);
        self
    }

    fn interval(&self) -> Duration {
        self.min_interval.max(MIN_POLL_INTERVAL)
    }
}

/// Successful end of a wait
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome<T> {
    /// Value carried by the final observation
    pub value: Option<T>,
    pub state: ProvisioningState,
    /// Number of refreshes performed
    pub polls: u32,
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error(
        "timeout after {timeout:?} while waiting for state to become '{}' (last state: '{}')",
        join_states(expected),
        last_state.as_ref().map(ProvisioningState::as_str).unwrap_or("none")
    )]
    Timeout {
        last_state: Option<ProvisioningState>,
        expected: Vec<ProvisioningState>,
        timeout: Duration,
    },

    #[error("wait cancelled after {polls} polls")]
    Cancelled { polls: u32 },

    #[error("operation reported state '{state}'")]
    Failed { state: ProvisioningState },

    #[error("unexpected state '{state}', wanted target '{}'", join_states(expected))]
    UnexpectedState {
        state: ProvisioningState,
        expected: Vec<ProvisioningState>,
    },

    #[error("resource not found after {checks} consecutive checks")]
    NotFound { checks: u32 },

    #[error("error polling for state: {0}")]
    Refresh(#[source] ProviderError),
}

fn join_states(states: &[ProvisioningState]) -> String {
    states
        .iter()
        .map(ProvisioningState::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<WaitError> for ProviderError {
    fn from(err: WaitError) -> Self {
        let kind = match &err {
            WaitError::Timeout { .. } => ErrorKind::PollTimeout,
            WaitError::Cancelled { .. } => ErrorKind::Cancelled,
            WaitError::NotFound { .. } => ErrorKind::NotFound,
            WaitError::Failed { .. } | WaitError::UnexpectedState { .. } => ErrorKind::Remote,
            WaitError::Refresh(inner) => inner.kind,
        };
        ProviderError::new(kind, "error waiting for state").with_cause(err)
    }
}

enum Interrupt {
    Cancelled,
    Deadline,
}

async fn pause(
    duration: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(), Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = sleep_until(deadline) => Err(Interrupt::Deadline),
        _ = sleep(duration) => Ok(()),
    }
}

/// Refresh until the target state is observed `continuous_target_occurrence`
/// times in a row, or fail.
pub async fn wait_for_state<T, F, Fut>(
    config: &WaitConfig,
    cancel: &CancellationToken,
    mut refresh: F,
) -> Result<WaitOutcome<T>, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Refreshed<T>>>,
{
    let started = Instant::now();
    let deadline = config.deadline.unwrap_or(started + config.timeout);
    let budget = deadline.saturating_duration_since(started);
    let required = config.continuous_target_occurrence.max(1);

    let mut polls = 0u32;
    let mut target_hits = 0u32;
    let mut not_found_hits = 0u32;
    let mut last_state: Option<ProvisioningState> = None;

    let interrupted = |why: Interrupt, polls: u32, last_state: Option<ProvisioningState>| match why
    {
        Interrupt::Cancelled => WaitError::Cancelled { polls },
        Interrupt::Deadline => WaitError::Timeout {
            last_state,
            expected: config.target.clone(),
            timeout: budget,
        },
    };

    if !config.delay.is_zero() {
        pause(config.delay, deadline, cancel)
            .await
            .map_err(|why| interrupted(why, polls, None))?;
    }

    loop {
        let refreshed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(interrupted(Interrupt::Cancelled, polls, last_state)),
            _ = sleep_until(deadline) => return Err(interrupted(Interrupt::Deadline, polls, last_state)),
            result = refresh() => result.map_err(WaitError::Refresh)?,
        };
        polls += 1;

        let Refreshed { value, state } = refreshed;
        if config.target.contains(&state) {
            not_found_hits = 0;
            target_hits += 1;
            log::trace!("poll #{}: target state {} ({}/{})", polls, state, target_hits, required);
            if target_hits >= required {
                return Ok(WaitOutcome {
                    value,
                    state,
                    polls,
                });
            }
        } else if state == ProvisioningState::NotFound {
            target_hits = 0;
            not_found_hits += 1;
            log::trace!("poll #{}: not found ({} in a row)", polls, not_found_hits);
            if let Some(max) = config.not_found_checks
                && not_found_hits > max
            {
                return Err(WaitError::NotFound {
                    checks: not_found_hits,
                });
            }
        } else if config.pending.contains(&state) {
            target_hits = 0;
            not_found_hits = 0;
            log::trace!("poll #{}: pending state {}", polls, state);
        } else if matches!(
            state,
            ProvisioningState::Failed | ProvisioningState::Canceled
        ) {
            return Err(WaitError::Failed { state });
        } else {
            return Err(WaitError::UnexpectedState {
                state,
                expected: config.target.clone(),
            });
        }
        last_state = Some(state);

        pause(config.interval(), deadline, cancel)
            .await
            .map_err(|why| interrupted(why, polls, last_state.clone()))?;
    }
}

/// Handle to an in-flight asynchronous mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// URL to query for the operation status
    pub polling_url: String,
    pub status: ProvisioningState,
}

impl OperationHandle {
    pub fn new(polling_url: impl Into<String>) -> Self {
        Self {
            polling_url: polling_url.into(),
            status: ProvisioningState::Accepted,
        }
    }
}

/// Result of submitting a mutating request
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
    /// The control plane applied the mutation synchronously
    Completed(T),
    /// The mutation continues asynchronously
    Accepted(OperationHandle),
}

/// Poll an operation handle until it reaches a terminal state.
///
/// The handle is consumed; a terminal status other than `Succeeded` is an error.
pub async fn wait_for_operation<F, Fut>(
    handle: OperationHandle,
    config: &WaitConfig,
    cancel: &CancellationToken,
    mut status: F,
) -> Result<ProvisioningState, WaitError>
where
    F: FnMut(OperationHandle) -> Fut,
    Fut: Future<Output = ProviderResult<ProvisioningState>>,
{
    if handle.status.is_terminal() {
        return match handle.status {
            ProvisioningState::Succeeded => Ok(handle.status),
            state => Err(WaitError::Failed { state }),
        };
    }

    let outcome = wait_for_state(config, cancel, || {
        let pending = status(handle.clone());
        async move {
            let state = pending.await?;
            Ok::<_, ProviderError>(Refreshed::<()> { value: None, state })
        }
    })
    .await?;
    Ok(outcome.state)
}
