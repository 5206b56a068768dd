//! Coalescing of roster display refreshes.
//!
//! Trailing debounce: the first change after a quiet period arms a deadline
//! one window away; changes landing before the deadline replace the pending
//! snapshot. When the deadline passes the latest snapshot is emitted, so a
//! chat sees at most one refresh per window and never a stale one.

use crate::state::RosterSnapshot;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    snapshot: RosterSnapshot,
}

/// Per-chat refresh debouncer. Owned by the chat worker; not shared.
#[derive(Debug)]
pub struct RefreshDebouncer {
    window: Duration,
    pending: Option<Pending>,
}

impl RefreshDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// Queue a snapshot for emission.
    ///
    /// Returns `false` when it replaced an already pending snapshot.
    pub fn schedule(&mut self, snapshot: RosterSnapshot, now: Instant) -> bool {
        match &mut self.pending {
            Some(pending) => {
                pending.snapshot = snapshot;
                false
            }
            None => {
                self.pending = Some(Pending {
                    deadline: now + self.window,
                    snapshot,
                });
                true
            }
        }
    }

    /// When the pending snapshot is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending snapshot if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<RosterSnapshot> {
        match &self.pending {
            Some(p) if p.deadline <= now => self.take(),
            _ => None,
        }
    }

    /// Take the pending snapshot regardless of the deadline (shutdown flush).
    pub fn take(&mut self) -> Option<RosterSnapshot> {
        self.pending.take().map(|p| p.snapshot)
    }
}
