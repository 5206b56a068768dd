//! Unified error handling for kickoff.
//!
//! This module provides the error hierarchy for inbound actions, with
//! metric labeling and the user-facing reply text for each failure.

use crate::state::{ActorId, ChatId};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Validation Errors (state machine rejections)
// ============================================================================

/// Reasons the session state machine refuses an action.
///
/// Always surfaced to the actor, never retried, and never accompanied by a
/// state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("roster is full: {needed} slot(s) needed, {remaining} left")]
    RosterFull { needed: usize, remaining: usize },

    #[error("actor {0} is already on the roster")]
    DuplicateEntry(ActorId),

    #[error("actor {0} is not on the roster")]
    NotFound(ActorId),

    #[error("session is closed")]
    SessionClosed,

    #[error("permission denied")]
    PermissionDenied,

    #[error("a session is already in progress")]
    SessionActive,

    #[error("no active session")]
    NoActiveSession,
}

impl ValidationError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RosterFull { .. } => "roster_full",
            Self::DuplicateEntry(_) => "duplicate_entry",
            Self::NotFound(_) => "not_found",
            Self::SessionClosed => "session_closed",
            Self::PermissionDenied => "permission_denied",
            Self::SessionActive => "session_active",
            Self::NoActiveSession => "no_active_session",
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::RosterFull { remaining: 0, .. } => "Play list is full!".to_string(),
            Self::RosterFull { remaining, .. } => {
                format!("Not enough room on the list, only {remaining} slot(s) left.")
            }
            Self::DuplicateEntry(_) => "You're already on the list!".to_string(),
            Self::NotFound(_) => "You're not on the list.".to_string(),
            Self::SessionClosed => {
                "This play list is closed. Wait for an admin to start a new one.".to_string()
            }
            Self::PermissionDenied => {
                "Sorry, only group administrators can do that.".to_string()
            }
            Self::SessionActive => {
                "A play list is already in progress! Cancel it before starting a new list."
                    .to_string()
            }
            Self::NoActiveSession => "No active play list.".to_string(),
        }
    }
}

// ============================================================================
// Action Errors (dispatcher outcomes)
// ============================================================================

/// Every way an inbound action can fail, as reported back to the actor.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),

    #[error("rate limited, retry in {}ms", .remaining.as_millis())]
    RateLimited { remaining: Duration },

    /// The store stayed unavailable for every attempt. Nothing was applied.
    #[error("store unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// The chat's queue was full; the action was not queued.
    #[error("chat {0} is busy")]
    Busy(ChatId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Rejected(e) => e.error_code(),
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Busy(_) => "busy",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Text shown to the actor who sent the action.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected(e) => e.user_message(),
            Self::RateLimited { remaining } => {
                let secs = remaining.as_secs_f64().ceil().max(1.0) as u64;
                format!("Slow down! Try again in {secs}s.")
            }
            Self::Busy(_) => "Too many requests right now, try again in a moment.".to_string(),
            Self::Unavailable { .. } | Self::Internal(_) => {
                "Something went wrong, please try again later.".to_string()
            }
        }
    }

    /// Retry hint for rate-limited actions.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

/// Result type for inbound action handling.
pub type ActionResult<T> = Result<T, ActionError>;
