//! Per-chat serialization of inbound actions.
//!
//! The [`Dispatcher`] keeps one worker ([`actor::ChatActor`]) per chat,
//! indexed by chat id. Actions for a chat queue in that worker's bounded
//! mailbox and run one at a time; chats never wait on each other. Workers
//! stop when idle and are respawned on the chat's next action. A respawned
//! worker holds off until its predecessor has drained, so a chat never has
//! two writers.

mod actor;
mod debounce;
mod types;

pub use actor::{ChatActor, ChatWorker};
pub use debounce::RefreshDebouncer;
pub use types::{
    ActionOutcome, ActionReply, ActionTag, ChatEvent, InboundAction, ReplyError, RequestKind,
};

use crate::config::Config;
use crate::db::RatingProvider;
use crate::error::{ActionError, ActionResult};
use crate::security::RateLimitManager;
use crate::state::{ChatId, Rating, RosterSnapshot, Rules};
use crate::store::{RetryPolicy, SessionStore};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Everything a chat worker needs, shared by all workers.
pub struct ChatContext {
    pub store: Arc<dyn SessionStore>,
    pub ratings: Arc<dyn RatingProvider>,
    pub limiter: Arc<RateLimitManager>,
    pub rules: Rules,
    pub default_rating: Rating,
    pub retry: RetryPolicy,
    pub debounce_window: Duration,
    pub mailbox_capacity: usize,
    pub idle_timeout: Duration,
    /// Where debounced roster refreshes go.
    pub refresh_tx: mpsc::Sender<RosterSnapshot>,
}

impl ChatContext {
    pub fn new(
        config: &Config,
        store: Arc<dyn SessionStore>,
        ratings: Arc<dyn RatingProvider>,
        refresh_tx: mpsc::Sender<RosterSnapshot>,
    ) -> Self {
        Self {
            store,
            ratings,
            limiter: Arc::new(RateLimitManager::new(&config.rate_limits)),
            rules: config.session.rules(),
            default_rating: config.session.default_rating,
            retry: RetryPolicy::from_config(&config.store),
            debounce_window: config.session.debounce_window(),
            mailbox_capacity: config.limits.chat_mailbox_capacity,
            idle_timeout: config.limits.chat_idle_timeout(),
            refresh_tx,
        }
    }
}

/// Result of an enqueued action, available once its worker processed it.
#[derive(Debug)]
pub struct PendingReply(oneshot::Receiver<ActionResult<ActionOutcome>>);

impl PendingReply {
    pub async fn wait(self) -> ActionResult<ActionOutcome> {
        self.0.await.map_err(|_| {
            ActionError::Internal("chat worker dropped the action".to_string())
        })?
    }
}

/// Routes actions to per-chat workers.
pub struct Dispatcher {
    /// Workers by chat. A closed mailbox marks a worker that is exiting.
    chats: DashMap<ChatId, ChatWorker>,
    ctx: Arc<ChatContext>,
}

impl Dispatcher {
    pub fn new(ctx: ChatContext) -> Self {
        Self {
            chats: DashMap::new(),
            ctx: Arc::new(ctx),
        }
    }

    /// Shared cooldown tracker, for the maintenance sweep.
    pub fn limiter(&self) -> &Arc<RateLimitManager> {
        &self.ctx.limiter
    }

    /// Get the chat's worker mailbox, spawning a worker if none accepts
    /// actions. A replacement queues behind the exiting worker.
    fn worker(&self, chat_id: ChatId) -> mpsc::Sender<ChatEvent> {
        let mut worker = self
            .chats
            .entry(chat_id)
            .or_insert_with(|| ChatActor::spawn(chat_id, Arc::clone(&self.ctx), None));
        if worker.is_closed() {
            debug!(chat_id, "respawning chat worker");
            let previous = worker.finished.clone();
            *worker = ChatActor::spawn(chat_id, Arc::clone(&self.ctx), Some(previous));
        }
        worker.tx.clone()
    }

    fn event(action: InboundAction) -> (ChatEvent, PendingReply) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = ChatEvent::Action {
            action: Box::new(action),
            reply_tx,
        };
        (event, PendingReply(reply_rx))
    }

    /// Queue an action on its chat's worker without waiting for the result.
    ///
    /// Actions enqueued one after another for the same chat are processed
    /// in that order. Waits when the chat's mailbox is full. A worker that
    /// stops between lookup and send is replaced once.
    pub async fn enqueue(&self, action: InboundAction) -> ActionResult<PendingReply> {
        let chat_id = action.chat_id;
        let (mut event, pending) = Self::event(action);

        for _ in 0..2 {
            match self.worker(chat_id).send(event).await {
                Ok(()) => return Ok(pending),
                Err(mpsc::error::SendError(returned)) => event = returned,
            }
        }

        Err(ActionError::Internal(format!(
            "no worker available for chat {chat_id}"
        )))
    }

    /// Like [`enqueue`](Self::enqueue), but never waits for mailbox space.
    ///
    /// A full mailbox turns the action away with [`ActionError::Busy`], so a
    /// single reader feeding many chats is never held up by one of them.
    pub fn try_enqueue(&self, action: InboundAction) -> ActionResult<PendingReply> {
        let chat_id = action.chat_id;
        let (mut event, pending) = Self::event(action);

        for _ in 0..2 {
            match self.worker(chat_id).try_send(event) {
                Ok(()) => return Ok(pending),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(chat_id, "chat mailbox full, action turned away");
                    return Err(ActionError::Busy(chat_id));
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => event = returned,
            }
        }

        Err(ActionError::Internal(format!(
            "no worker available for chat {chat_id}"
        )))
    }

    /// Queue an action and wait for its result.
    pub async fn submit(&self, action: InboundAction) -> ActionResult<ActionOutcome> {
        self.enqueue(action).await?.wait().await
    }

    /// Forget workers that have fully exited. Returns how many were removed.
    ///
    /// A worker still draining its mailbox is kept so a replacement can
    /// wait for it.
    pub fn prune_closed(&self) -> usize {
        let before = self.chats.len();
        self.chats
            .retain(|_, w| !(w.is_closed() && w.finished.is_cancelled()));
        before.saturating_sub(self.chats.len())
    }

    /// Chats with a live worker.
    pub fn active_chats(&self) -> usize {
        self.chats.iter().filter(|w| !w.is_closed()).count()
    }

    /// Stop every worker, letting each finish queued actions and flush its
    /// pending refresh.
    pub async fn shutdown(&self) {
        let workers: Vec<_> = self.chats.iter().map(|e| e.value().clone()).collect();
        self.chats.clear();

        let count = workers.len();
        futures_util::future::join_all(workers.iter().map(|w| actor::stop(&w.tx))).await;
        // Workers whose mailbox was already closed did not take the request.
        futures_util::future::join_all(workers.iter().map(|w| w.finished.cancelled())).await;
        info!(chats = count, "dispatcher stopped");
    }
}
