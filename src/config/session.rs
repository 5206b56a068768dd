//! Session rules configuration.

use crate::state::{Rating, Rules};
use serde::Deserialize;
use std::time::Duration;

/// Roster and display settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Roster slots per game (default: 12).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Rating for players with no stored rating (default: 5).
    #[serde(default = "default_rating")]
    pub default_rating: Rating,
    /// Rating assigned to guest slots during team formation (default: 5).
    #[serde(default = "default_rating")]
    pub guest_default_rating: Rating,
    /// Minimum milliseconds between roster refreshes per chat (default: 1500).
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            default_rating: default_rating(),
            guest_default_rating: default_rating(),
            debounce_window_ms: default_debounce_window_ms(),
        }
    }
}

impl SessionConfig {
    pub fn rules(&self) -> Rules {
        Rules {
            capacity: self.capacity,
            guest_default_rating: self.guest_default_rating,
        }
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

fn default_capacity() -> usize {
    12
}

fn default_rating() -> Rating {
    5
}

fn default_debounce_window_ms() -> u64 {
    1500
}
