//! Rate limiting configuration.

use serde::Deserialize;
use std::time::Duration;

/// Cooldowns and outbound budget.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Cooldown between roster actions (join, guest, leave) of one kind per actor (default: 3000ms).
    #[serde(default = "default_cooldown_join_ms")]
    pub cooldown_join_ms: u64,
    /// Cooldown between admin actions (start, cancel, rate) of one kind per actor (default: 10000ms).
    #[serde(default = "default_cooldown_admin_ms")]
    pub cooldown_admin_ms: u64,
    /// Roster refreshes sent per second across all chats (default: 20).
    #[serde(default = "default_outbound_rate")]
    pub outbound_rate_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown_join_ms: default_cooldown_join_ms(),
            cooldown_admin_ms: default_cooldown_admin_ms(),
            outbound_rate_per_second: default_outbound_rate(),
        }
    }
}

impl RateLimitConfig {
    pub fn cooldown_join(&self) -> Duration {
        Duration::from_millis(self.cooldown_join_ms)
    }

    pub fn cooldown_admin(&self) -> Duration {
        Duration::from_millis(self.cooldown_admin_ms)
    }
}

fn default_cooldown_join_ms() -> u64 {
    3_000
}

fn default_cooldown_admin_ms() -> u64 {
    10_000
}

fn default_outbound_rate() -> u32 {
    20
}
