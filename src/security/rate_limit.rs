//! Per-actor cooldowns and the global outbound budget.
//!
//! Two independent limiters live here:
//! - Action cooldowns keyed by `(actor, action kind)`, measured on the
//!   timestamps carried by inbound actions rather than the wall clock.
//! - A governor token bucket shared by every chat that caps how many
//!   roster refreshes leave the process per second.
//!
//! # Atomicity
//!
//! A cooldown check and the record of an accepted action happen under the
//! same DashMap shard lock (entry API), so two concurrent checks for the
//! same key can never both pass.

use crate::config::RateLimitConfig;
use crate::dispatch::ActionTag;
use crate::state::ActorId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Stale entries are swept on every Nth check.
const SWEEP_EVERY: u64 = 256;

/// Thread-safe cooldown tracker plus outbound limiter.
#[derive(Debug)]
pub struct RateLimitManager {
    /// Last permitted timestamp per `(actor, kind)`.
    last_permitted: DashMap<(ActorId, ActionTag), DateTime<Utc>>,
    /// Global refresh budget.
    outbound: DirectRateLimiter,
    cooldown_join: Duration,
    cooldown_admin: Duration,
    checks: AtomicU64,
}

impl RateLimitManager {
    /// Create a new rate limit manager with the given configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        let rate = NonZeroU32::new(config.outbound_rate_per_second).unwrap_or(nonzero!(20u32));
        Self {
            last_permitted: DashMap::new(),
            outbound: GovRateLimiter::direct(Quota::per_second(rate)),
            cooldown_join: config.cooldown_join(),
            cooldown_admin: config.cooldown_admin(),
            checks: AtomicU64::new(0),
        }
    }

    /// Cooldown that applies to an action kind.
    pub fn cooldown(&self, tag: ActionTag) -> Duration {
        if tag.requires_admin() {
            self.cooldown_admin
        } else {
            self.cooldown_join
        }
    }

    /// Check an action against its cooldown and record it when permitted.
    ///
    /// Returns the time left until the action would be accepted when it is
    /// rejected. A rejected check leaves the stored timestamp untouched. A
    /// timestamp earlier than the recorded one counts as a zero gap.
    pub fn check_action(
        &self,
        actor_id: ActorId,
        tag: ActionTag,
        now: DateTime<Utc>,
    ) -> Result<(), Duration> {
        let cooldown = self.cooldown(tag);

        let result = match self.last_permitted.entry((actor_id, tag)) {
            Entry::Occupied(mut entry) => {
                let elapsed = (now - *entry.get()).to_std().unwrap_or(Duration::ZERO);
                if elapsed >= cooldown {
                    entry.insert(now);
                    Ok(())
                } else {
                    Err(cooldown - elapsed)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Ok(())
            }
        };

        // The shard guard above is released before sweeping.
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.cleanup(now);
        }

        if let Err(remaining) = result {
            debug!(
                actor_id,
                action = tag.as_str(),
                remaining_ms = remaining.as_millis() as u64,
                "action cooldown active"
            );
        }
        result
    }

    /// Undo the record made by an accepted check at `at`.
    ///
    /// Used when the action never took effect, so a retry is not held back
    /// by the cooldown. A later record for the same key is left alone.
    pub fn release(&self, actor_id: ActorId, tag: ActionTag, at: DateTime<Utc>) {
        if self
            .last_permitted
            .remove_if(&(actor_id, tag), |_, last| *last == at)
            .is_some()
        {
            debug!(actor_id, action = tag.as_str(), "action cooldown released");
        }
    }

    /// Boolean form of [`check_action`](Self::check_action).
    pub fn allow(&self, actor_id: ActorId, tag: ActionTag, now: DateTime<Utc>) -> bool {
        self.check_action(actor_id, tag, now).is_ok()
    }

    /// Wait until the global outbound budget permits one more refresh.
    pub async fn until_outbound_ready(&self) {
        self.outbound.until_ready().await;
    }

    /// Non-blocking outbound check; consumes a token when allowed.
    pub fn check_outbound(&self) -> bool {
        self.outbound.check().is_ok()
    }

    /// Drop entries older than the longest cooldown.
    ///
    /// Such entries can no longer reject anything. Runs lazily from
    /// `check_action` and from the maintenance task.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        let horizon = self.cooldown_join.max(self.cooldown_admin);
        let before = self.last_permitted.len();
        self.last_permitted.retain(|_, last| {
            (now - *last)
                .to_std()
                .map_or(true, |age| age < horizon)
        });
        let removed = before.saturating_sub(self.last_permitted.len());
        if removed > 0 {
            debug!(removed, "swept stale cooldown entries");
        }
    }

    /// Get statistics about tracked entries.
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked_entries: self.last_permitted.len(),
        }
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStats {
    pub tracked_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(ms)
    }

    fn manager() -> RateLimitManager {
        RateLimitManager::new(&RateLimitConfig {
            cooldown_join_ms: 3_000,
            cooldown_admin_ms: 10_000,
            outbound_rate_per_second: 2,
        })
    }

    #[test]
    fn second_join_inside_cooldown_is_limited() {
        let limiter = manager();
        assert!(limiter.check_action(1, ActionTag::Join, at(0)).is_ok());

        let remaining = limiter.check_action(1, ActionTag::Join, at(1_000)).unwrap_err();
        assert_eq!(remaining, Duration::from_millis(2_000));

        assert!(limiter.check_action(1, ActionTag::Join, at(3_000)).is_ok());
    }

    #[test]
    fn rejection_does_not_extend_cooldown() {
        let limiter = manager();
        assert!(limiter.allow(1, ActionTag::Leave, at(0)));
        assert!(!limiter.allow(1, ActionTag::Leave, at(2_900)));
        // Measured from the accepted action, not the rejected one.
        assert!(limiter.allow(1, ActionTag::Leave, at(3_000)));
    }

    #[test]
    fn admin_actions_use_longer_cooldown() {
        let limiter = manager();
        assert_eq!(limiter.cooldown(ActionTag::Start), Duration::from_secs(10));
        assert_eq!(limiter.cooldown(ActionTag::JoinWithGuest), Duration::from_secs(3));

        assert!(limiter.allow(7, ActionTag::Cancel, at(0)));
        assert!(!limiter.allow(7, ActionTag::Cancel, at(5_000)));
        assert!(limiter.allow(7, ActionTag::Cancel, at(10_000)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = manager();
        assert!(limiter.allow(1, ActionTag::Join, at(0)));
        assert!(limiter.allow(2, ActionTag::Join, at(0)));
        assert!(limiter.allow(1, ActionTag::Leave, at(0)));
        assert!(!limiter.allow(1, ActionTag::Join, at(10)));
    }

    #[test]
    fn released_slot_can_be_used_again() {
        let limiter = manager();
        assert!(limiter.allow(1, ActionTag::Join, at(0)));
        limiter.release(1, ActionTag::Join, at(0));
        assert!(limiter.allow(1, ActionTag::Join, at(10)));

        // Releasing a stale timestamp keeps the newer record.
        limiter.release(1, ActionTag::Join, at(0));
        assert!(!limiter.allow(1, ActionTag::Join, at(20)));
    }

    #[test]
    fn earlier_timestamp_counts_as_zero_gap() {
        let limiter = manager();
        assert!(limiter.allow(1, ActionTag::Join, at(5_000)));
        let remaining = limiter.check_action(1, ActionTag::Join, at(4_000)).unwrap_err();
        assert_eq!(remaining, Duration::from_secs(3));
    }

    #[test]
    fn zero_cooldown_never_limits() {
        let limiter = RateLimitManager::new(&RateLimitConfig {
            cooldown_join_ms: 0,
            ..RateLimitConfig::default()
        });
        assert!(limiter.allow(1, ActionTag::Join, at(0)));
        assert!(limiter.allow(1, ActionTag::Join, at(0)));
    }

    #[test]
    fn cleanup_drops_only_expired_entries() {
        let limiter = manager();
        limiter.allow(1, ActionTag::Join, at(0));
        limiter.allow(2, ActionTag::Join, at(9_000));
        assert_eq!(limiter.stats().tracked_entries, 2);

        limiter.cleanup(at(10_000));
        assert_eq!(limiter.stats().tracked_entries, 1);
        assert!(!limiter.allow(2, ActionTag::Join, at(10_000)));
    }

    #[test]
    fn lazy_sweep_bounds_growth() {
        let limiter = manager();
        for actor in 0..SWEEP_EVERY as i64 - 1 {
            limiter.allow(actor, ActionTag::Join, at(0));
        }
        assert_eq!(limiter.stats().tracked_entries, SWEEP_EVERY as usize - 1);

        // The 256th check lands long after every cooldown expired.
        limiter.allow(-1, ActionTag::Join, at(60_000));
        assert_eq!(limiter.stats().tracked_entries, 1);
    }

    #[test]
    fn outbound_budget_is_global() {
        let limiter = manager();
        assert!(limiter.check_outbound());
        assert!(limiter.check_outbound());
        assert!(!limiter.check_outbound());
    }
}
