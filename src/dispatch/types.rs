//! Messages exchanged with chat workers.

use crate::error::{ActionError, ActionResult};
use crate::state::{ActorId, ChatId, Outcome, Rating, ScheduleKind, SessionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// An action as delivered by the chat transport.
///
/// `id` is the idempotency key: delivering the same id twice applies it once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundAction {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub chat_id: ChatId,
    pub actor_id: ActorId,
    #[serde(default)]
    pub actor_name: String,
    pub kind: RequestKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Resolved by the transport from chat membership.
    #[serde(default)]
    pub is_admin: bool,
}

/// What the actor asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Start { schedule: ScheduleKind },
    Cancel,
    Join,
    JoinWithGuest,
    Leave,
    Rate { target: ActorId, rating: Rating },
}

impl RequestKind {
    pub fn tag(&self) -> ActionTag {
        match self {
            Self::Start { .. } => ActionTag::Start,
            Self::Cancel => ActionTag::Cancel,
            Self::Join => ActionTag::Join,
            Self::JoinWithGuest => ActionTag::JoinWithGuest,
            Self::Leave => ActionTag::Leave,
            Self::Rate { .. } => ActionTag::Rate,
        }
    }
}

/// Payload-free action kind; keys cooldowns and labels metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTag {
    Start,
    Cancel,
    Join,
    JoinWithGuest,
    Leave,
    Rate,
}

impl ActionTag {
    #[inline]
    pub fn requires_admin(self) -> bool {
        matches!(self, Self::Start | Self::Cancel | Self::Rate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Join => "join",
            Self::JoinWithGuest => "join_with_guest",
            Self::Leave => "leave",
            Self::Rate => "rate",
        }
    }
}

/// Successful result of an inbound action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The session state machine ran and its result is durable.
    Session {
        outcome: Outcome,
        state: SessionState,
        version: u64,
    },
    /// A player's rating was recorded.
    Rated { target: ActorId, rating: Rating },
}

/// Wire form of an action's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReply {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ActionReply {
    pub fn new(id: Uuid, chat_id: ChatId, result: ActionResult<ActionOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                id,
                chat_id,
                ok: true,
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => Self {
                id,
                chat_id,
                ok: false,
                outcome: None,
                error: Some(ReplyError::from(&e)),
            },
        }
    }
}

impl From<&ActionError> for ReplyError {
    fn from(e: &ActionError) -> Self {
        Self {
            code: e.error_code(),
            message: e.user_message(),
            retry_after_ms: e.retry_after().map(|d| d.as_millis() as u64),
        }
    }
}

/// Mailbox message for a chat worker.
#[derive(Debug)]
pub enum ChatEvent {
    Action {
        action: Box<InboundAction>,
        reply_tx: oneshot::Sender<ActionResult<ActionOutcome>>,
    },
    /// Flush any pending refresh and stop.
    Shutdown { done: oneshot::Sender<()> },
}
