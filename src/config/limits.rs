//! Per-chat worker limits configuration.

use serde::Deserialize;
use std::time::Duration;

/// Per-chat worker limits.
///
/// These bound how much memory idle or flooded chats can hold.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Chat worker mailbox capacity (default: 64).
    /// Senders wait when a chat's queue is full.
    #[serde(default = "default_chat_mailbox_capacity")]
    pub chat_mailbox_capacity: usize,
    /// Seconds a chat worker may sit idle before it exits (default: 600).
    /// A new worker is spawned on the chat's next action.
    #[serde(default = "default_chat_idle_timeout_secs")]
    pub chat_idle_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            chat_mailbox_capacity: default_chat_mailbox_capacity(),
            chat_idle_timeout_secs: default_chat_idle_timeout_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn chat_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_idle_timeout_secs)
    }
}

fn default_chat_mailbox_capacity() -> usize {
    64
}

fn default_chat_idle_timeout_secs() -> u64 {
    600
}
