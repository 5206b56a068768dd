//! In-process dispatcher harness.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use kickoff::config::Config;
use kickoff::db::{DbError, MemoryRatings, RatingProvider};
use kickoff::dispatch::{ChatContext, Dispatcher, InboundAction, RequestKind};
use kickoff::state::{ActorId, ChatId, Rating, RosterSnapshot, Session};
use kickoff::store::{CasOutcome, MemoryStore, SessionStore, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Actor id the helpers treat as the chat admin.
pub const ADMIN: ActorId = 1;

/// Config tuned for tests: no admin cooldown, fast retries, short debounce.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.rate_limits.cooldown_admin_ms = 0;
    config.session.debounce_window_ms = 20;
    config.store.retry_base_delay_ms = 1;
    config.store.retry_max_delay_ms = 10;
    config
}

/// A dispatcher wired to the given store and ratings.
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub refresh_rx: mpsc::Receiver<RosterSnapshot>,
    pub store: Arc<dyn SessionStore>,
}

impl Harness {
    pub fn new(config: &Config) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRatings::new()),
        )
    }

    pub fn with_parts(
        config: &Config,
        store: Arc<dyn SessionStore>,
        ratings: Arc<dyn RatingProvider>,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(256);
        let ctx = ChatContext::new(config, Arc::clone(&store), ratings, refresh_tx);
        Self {
            dispatcher: Arc::new(Dispatcher::new(ctx)),
            refresh_rx,
            store,
        }
    }

    /// Current stored session for a chat.
    pub async fn session(&self, chat_id: ChatId) -> Option<Session> {
        self.store.load(chat_id).await.expect("store load")
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(1_700_000_000 + secs)
}

/// A non-admin action at `secs` after a fixed epoch.
pub fn action(chat_id: ChatId, actor_id: ActorId, kind: RequestKind, secs: i64) -> InboundAction {
    InboundAction {
        id: Uuid::new_v4(),
        chat_id,
        actor_id,
        actor_name: format!("player{actor_id}"),
        kind,
        timestamp: at(secs),
        is_admin: false,
    }
}

/// An action sent by [`ADMIN`].
pub fn admin(chat_id: ChatId, kind: RequestKind, secs: i64) -> InboundAction {
    InboundAction {
        is_admin: true,
        actor_name: "admin".to_string(),
        ..action(chat_id, ADMIN, kind, secs)
    }
}

/// Memory store that fails the next N calls and can delay calls.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicU32,
    slow_calls: AtomicU32,
    delay_ms: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` store calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Stall the next `n` calls for `delay` before answering.
    pub fn stall_next(&self, n: u32, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u32, Ordering::SeqCst);
        self.slow_calls.store(n, Ordering::SeqCst);
    }

    async fn inject(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.slow_calls) {
            let ms = self.delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(u64::from(ms))).await;
        }
        if take_one(&self.failures) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn load(&self, chat_id: ChatId) -> Result<Option<Session>, StoreError> {
        self.inject().await?;
        self.inner.load(chat_id).await
    }

    async fn compare_and_swap(
        &self,
        chat_id: ChatId,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome, StoreError> {
        self.inject().await?;
        self.inner
            .compare_and_swap(chat_id, expected_version, session)
            .await
    }
}

/// Ratings directory that is always down.
pub struct BrokenRatings;

#[async_trait]
impl RatingProvider for BrokenRatings {
    async fn rating(&self, _actor_id: ActorId) -> Result<Option<Rating>, DbError> {
        Err(DbError::Unavailable("ratings offline".to_string()))
    }

    async fn set_rating(&self, _actor_id: ActorId, _rating: Rating) -> Result<(), DbError> {
        Err(DbError::Unavailable("ratings offline".to_string()))
    }
}
