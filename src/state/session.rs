//! Session data model.
//!
//! A `Session` is the single persisted record per chat. Everything the state
//! machine needs lives here, so a stored value plus an action fully
//! determines the next state.

use super::teams::Teams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Chat identifier (Telegram chat ids are signed 64-bit).
pub type ChatId = i64;

/// User identifier of whoever sent an action.
pub type ActorId = i64;

/// Skill score used for team balancing.
pub type Rating = i32;

/// How many applied action ids a session remembers for replay protection.
pub const RECENT_ACTIONS_CAP: usize = 32;

/// Which weekly game a session is for. Only affects display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Saturday,
    Wednesday,
}

/// Human-readable schedule metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDetails {
    pub day: &'static str,
    pub time: &'static str,
    pub location: &'static str,
}

impl ScheduleKind {
    pub fn details(self) -> ScheduleDetails {
        match self {
            Self::Saturday => ScheduleDetails {
                day: "Saturday Night",
                time: "10pm to 11pm",
                location: "Teenage Ground",
            },
            Self::Wednesday => ScheduleDetails {
                day: "Wednesday Night",
                time: "11pm to 12am",
                location: "Teenage Ground",
            },
        }
    }
}

/// Session lifecycle.
///
/// ```text
/// Idle ──Start──► Open ──capacity reached──► Forming ──► Formed
///                  │                            │
///                  └──────────Cancel────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Open,
    Forming,
    Formed,
    Cancelled,
}

impl SessionState {
    /// Open or Forming: at most one per chat.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::Forming)
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Formed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Forming => "forming",
            Self::Formed => "formed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Whether an entry brings a guest along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Solo,
    WithGuest,
}

impl EntryKind {
    /// Roster slots this kind of entry consumes.
    #[inline]
    pub fn slots(self) -> usize {
        match self {
            Self::Solo => 1,
            Self::WithGuest => 2,
        }
    }
}

/// One signup line on the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub actor_id: ActorId,
    pub display_name: String,
    pub kind: EntryKind,
    pub rating: Rating,
    pub joined_at: DateTime<Utc>,
}

impl Entry {
    #[inline]
    pub fn slots(&self) -> usize {
        self.kind.slots()
    }
}

/// The persisted game session for one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub schedule: Option<ScheduleKind>,
    pub state: SessionState,
    /// Signup order is preserved; it breaks rating ties during formation.
    pub roster: Vec<Entry>,
    pub capacity: usize,
    pub created_at: DateTime<Utc>,
    /// Bumped on every successful write; the store's compare-and-swap key.
    pub version: u64,
    pub teams: Option<Teams>,
    #[serde(default)]
    pub recent_actions: VecDeque<Uuid>,
}

impl Session {
    /// The implicit record for a chat that has never had a session stored.
    pub fn idle(chat_id: ChatId, capacity: usize) -> Self {
        Self {
            id: Uuid::nil(),
            chat_id,
            schedule: None,
            state: SessionState::Idle,
            roster: Vec::new(),
            capacity,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            teams: None,
            recent_actions: VecDeque::new(),
        }
    }

    /// Slots consumed by all entries.
    pub fn used_slots(&self) -> usize {
        self.roster.iter().map(Entry::slots).sum()
    }

    pub fn remaining_slots(&self) -> usize {
        self.capacity.saturating_sub(self.used_slots())
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used_slots() >= self.capacity
    }

    pub fn entry_for(&self, actor_id: ActorId) -> Option<&Entry> {
        self.roster.iter().find(|e| e.actor_id == actor_id)
    }

    pub fn has_applied(&self, action_id: Uuid) -> bool {
        self.recent_actions.contains(&action_id)
    }

    /// Remember an applied action id, forgetting the oldest beyond the cap.
    pub fn record_action(&mut self, action_id: Uuid) {
        self.recent_actions.push_back(action_id);
        while self.recent_actions.len() > RECENT_ACTIONS_CAP {
            self.recent_actions.pop_front();
        }
    }
}
