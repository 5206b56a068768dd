//! Read-transform-write with optimistic concurrency.
//!
//! One cycle loads the chat's session, runs the caller's pure transform and
//! attempts a compare-and-swap against the loaded version:
//!
//! - version conflict: reload and transform again immediately
//! - store error or timeout: back off `base * 2^(n-1)` (capped) and retry
//!   the whole cycle, up to `max_attempts` failures
//! - validation error from the transform: stop, nothing was written
//!
//! An action is reported as applied only once the store shows it: its CAS
//! returned `Swapped`, or a write that failed without an answer is found on
//! reload. Before giving up after such a write, one extra load checks it.

use super::{CasOutcome, SessionStore, StoreError};
use crate::config::StoreConfig;
use crate::error::ValidationError;
use crate::metrics;
use crate::state::{ChatId, Outcome, Session, Transition};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Conflicts tolerated per action before giving up.
pub const MAX_VERSION_CONFLICTS: u32 = 16;

/// Bounds on how hard one action tries to reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub max_conflicts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
            attempt_timeout: config.attempt_timeout(),
            max_conflicts: MAX_VERSION_CONFLICTS,
        }
    }

    /// Delay after the `failure`-th failed attempt (1-based).
    pub fn backoff(&self, failure: u32) -> Duration {
        let exp = failure.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

/// A transition that is now durable.
#[derive(Debug, Clone)]
pub struct Committed {
    pub session: Session,
    pub outcome: Outcome,
    /// Cycles run, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),

    #[error("store failed {attempts} time(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("gave up after {conflicts} version conflicts")]
    Contended { conflicts: u32 },
}

async fn timed<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

/// Apply `transform` to the chat's stored session until it commits.
///
/// A chat with no record is presented to `transform` as an idle session at
/// version 0 with the given `capacity`. Replayed outcomes are returned
/// without a write.
pub async fn read_transform_write<S, F>(
    store: &S,
    policy: &RetryPolicy,
    chat_id: ChatId,
    capacity: usize,
    mut transform: F,
) -> Result<Committed, RetryError>
where
    S: SessionStore + ?Sized,
    F: FnMut(&Session) -> Result<Transition, ValidationError>,
{
    let mut failures = 0u32;
    let mut conflicts = 0u32;
    let mut cycles = 0u32;
    // Last transition whose write failed without a definite answer.
    let mut in_doubt: Option<Transition> = None;

    loop {
        cycles += 1;

        let step = match timed(policy.attempt_timeout, store.load(chat_id)).await {
            Ok(loaded) => {
                let current = loaded.unwrap_or_else(|| Session::idle(chat_id, capacity));
                let transition = transform(&current)?;
                if !transition.outcome.is_mutation() {
                    if transition.outcome == Outcome::Replayed
                        && let Some(pending) = in_doubt.take()
                    {
                        debug!(chat_id, attempts = cycles, "unanswered write had landed");
                        return Ok(Committed {
                            session: current,
                            outcome: pending.outcome,
                            attempts: cycles,
                        });
                    }
                    return Ok(Committed {
                        session: transition.session,
                        outcome: transition.outcome,
                        attempts: cycles,
                    });
                }
                match timed(
                    policy.attempt_timeout,
                    store.compare_and_swap(chat_id, current.version, &transition.session),
                )
                .await
                {
                    Ok(cas) => Ok((cas, transition)),
                    Err(e) => {
                        in_doubt = Some(transition);
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };

        match step {
            Ok((CasOutcome::Swapped, transition)) => {
                debug!(
                    chat_id,
                    version = transition.session.version,
                    attempts = cycles,
                    "session committed"
                );
                return Ok(Committed {
                    session: transition.session,
                    outcome: transition.outcome,
                    attempts: cycles,
                });
            }
            Ok((CasOutcome::VersionConflict { actual }, _)) => {
                conflicts += 1;
                metrics::record_version_conflict();
                debug!(chat_id, actual, conflicts, "version conflict, reloading");
                if conflicts > policy.max_conflicts {
                    warn!(chat_id, conflicts, "too many version conflicts");
                    return Err(RetryError::Contended { conflicts });
                }
                tokio::task::yield_now().await;
            }
            Err(source) => {
                failures += 1;
                if failures >= policy.max_attempts {
                    if let Some(pending) = in_doubt.take()
                        && let Some(session) =
                            landed(store, policy, chat_id, capacity, &mut transform).await
                    {
                        debug!(chat_id, attempts = failures, "last write landed after all");
                        return Ok(Committed {
                            session,
                            outcome: pending.outcome,
                            attempts: cycles,
                        });
                    }
                    warn!(chat_id, attempts = failures, error = %source, "store retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: failures,
                        source,
                    });
                }
                let delay = policy.backoff(failures);
                metrics::record_store_retry();
                warn!(
                    chat_id,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %source,
                    "store attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Reload once to see whether an unanswered write took effect.
///
/// Returns the stored session when the transform reports the action as
/// already applied.
async fn landed<S, F>(
    store: &S,
    policy: &RetryPolicy,
    chat_id: ChatId,
    capacity: usize,
    transform: &mut F,
) -> Option<Session>
where
    S: SessionStore + ?Sized,
    F: FnMut(&Session) -> Result<Transition, ValidationError>,
{
    let loaded = match timed(policy.attempt_timeout, store.load(chat_id)).await {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(chat_id, error = %e, "could not confirm the last write");
            return None;
        }
    };
    let current = loaded.unwrap_or_else(|| Session::idle(chat_id, capacity));
    match transform(&current) {
        Ok(t) if t.outcome == Outcome::Replayed => Some(current),
        _ => None,
    }
}
