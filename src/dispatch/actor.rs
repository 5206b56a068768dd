//! Per-chat worker.
//!
//! One `ChatActor` owns a chat: it processes that chat's actions strictly in
//! mailbox order and owns the chat's refresh debouncer. Workers for
//! different chats run in parallel and never share locks.

use super::ChatContext;
use super::debounce::RefreshDebouncer;
use super::types::{ActionOutcome, ActionTag, ChatEvent, InboundAction, RequestKind};
use crate::error::{ActionError, ActionResult, ValidationError};
use crate::metrics;
use crate::state::{
    Action, ActionKind, ActorId, ChatId, Outcome, Rating, RosterSnapshot, Session, Signup, apply,
    snapshot,
};
use crate::store::{RetryError, read_transform_write};
use crate::telemetry::{ActionTimer, spans};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Handle to a running chat worker.
#[derive(Debug, Clone)]
pub struct ChatWorker {
    pub tx: mpsc::Sender<ChatEvent>,
    /// Cancelled once the worker has handled its last action.
    pub finished: CancellationToken,
}

impl ChatWorker {
    /// True once the worker no longer accepts actions.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct ChatActor {
    chat_id: ChatId,
    ctx: Arc<ChatContext>,
    debouncer: RefreshDebouncer,
}

impl ChatActor {
    /// Create a chat worker and spawn it.
    ///
    /// A worker replacing one that is still draining its mailbox waits for
    /// `predecessor` before handling anything, so the chat keeps a single
    /// writer and its actions stay in order.
    pub fn spawn(
        chat_id: ChatId,
        ctx: Arc<ChatContext>,
        predecessor: Option<CancellationToken>,
    ) -> ChatWorker {
        let (tx, rx) = mpsc::channel(ctx.mailbox_capacity.max(1));
        let finished = CancellationToken::new();

        let actor = Self {
            chat_id,
            debouncer: RefreshDebouncer::new(ctx.debounce_window),
            ctx,
        };

        let done = finished.clone();
        tokio::spawn(
            async move {
                let _done = done.drop_guard();
                if let Some(previous) = predecessor {
                    previous.cancelled().await;
                }
                actor.run(rx).await;
            }
            .instrument(spans::chat(chat_id)),
        );
        ChatWorker { tx, finished }
    }

    /// The main worker loop.
    ///
    /// Exits on shutdown, when every sender is gone, or after sitting idle
    /// with nothing pending. Before exiting it closes the mailbox, handles
    /// whatever was already queued and flushes the pending refresh.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ChatEvent>) {
        metrics::chat_started();
        debug!("chat worker started");

        let mut stopped_by = Vec::new();
        loop {
            let deadline = self.debouncer.deadline();
            let idle_at = Instant::now() + self.ctx.idle_timeout;

            tokio::select! {
                event = rx.recv() => match event {
                    Some(ChatEvent::Action { action, reply_tx }) => {
                        let result = self.handle_action(*action).await;
                        let _ = reply_tx.send(result);
                    }
                    Some(ChatEvent::Shutdown { done }) => {
                        stopped_by.push(done);
                        break;
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(refresh) = self.debouncer.take_due(Instant::now()) {
                        self.emit(refresh).await;
                    }
                }
                _ = sleep_until(idle_at), if deadline.is_none() => {
                    debug!("chat worker idle, stopping");
                    break;
                }
            }
        }

        rx.close();
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Action { action, reply_tx } => {
                    let result = self.handle_action(*action).await;
                    let _ = reply_tx.send(result);
                }
                ChatEvent::Shutdown { done } => stopped_by.push(done),
            }
        }

        if let Some(refresh) = self.debouncer.take() {
            self.emit(refresh).await;
        }

        metrics::chat_stopped();
        debug!("chat worker stopped");

        // The shared context is released before the stop is acknowledged.
        drop(self);
        for done in stopped_by {
            let _ = done.send(());
        }
    }

    async fn handle_action(&mut self, action: InboundAction) -> ActionResult<ActionOutcome> {
        let tag = action.kind.tag();
        let span = spans::action(action.id, tag.as_str(), action.actor_id);

        async {
            let mut timer = ActionTimer::new(tag.as_str());
            let result = self.process(&action, tag).await;
            match &result {
                Ok(_) => timer.finish("ok"),
                Err(e) => {
                    timer.finish(e.error_code());
                    debug!(error = %e, "action rejected");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process(
        &mut self,
        action: &InboundAction,
        tag: ActionTag,
    ) -> ActionResult<ActionOutcome> {
        if tag.requires_admin() && !action.is_admin {
            return Err(ValidationError::PermissionDenied.into());
        }

        if let Err(remaining) = self
            .ctx
            .limiter
            .check_action(action.actor_id, tag, action.timestamp)
        {
            metrics::record_rate_limited(tag.as_str());
            return Err(ActionError::RateLimited { remaining });
        }

        let result = self.execute(action).await;
        if matches!(result, Err(ActionError::Unavailable { .. })) {
            // Nothing was applied; the actor may retry right away.
            self.ctx
                .limiter
                .release(action.actor_id, tag, action.timestamp);
        }
        result
    }

    async fn execute(&mut self, action: &InboundAction) -> ActionResult<ActionOutcome> {
        let kind = match &action.kind {
            RequestKind::Rate { target, rating } => return self.rate(*target, *rating).await,
            RequestKind::Start { schedule } => ActionKind::Start(*schedule),
            RequestKind::Cancel => ActionKind::Cancel,
            RequestKind::Join => ActionKind::Join(self.signup(action).await),
            RequestKind::JoinWithGuest => ActionKind::JoinWithGuest(self.signup(action).await),
            RequestKind::Leave => ActionKind::Leave(action.actor_id),
        };

        let step = Action {
            id: action.id,
            at: action.timestamp,
            kind,
        };
        let rules = self.ctx.rules;

        let committed = read_transform_write(
            self.ctx.store.as_ref(),
            &self.ctx.retry,
            self.chat_id,
            rules.capacity,
            |current| apply(current, &step, &rules),
        )
        .await
        .map_err(|e| match e {
            RetryError::Rejected(v) => ActionError::Rejected(v),
            RetryError::Exhausted { attempts, source } => ActionError::Unavailable {
                attempts,
                reason: source.to_string(),
            },
            RetryError::Contended { conflicts } => ActionError::Unavailable {
                attempts: conflicts,
                reason: "too many concurrent writers".to_string(),
            },
        })?;

        let session = committed.session;
        match &committed.outcome {
            Outcome::TeamsFormed { teams } => {
                metrics::record_teams_formed();
                info!(
                    version = session.version,
                    black = teams.black.len(),
                    white = teams.white.len(),
                    bench = teams.bench.len(),
                    "teams formed"
                );
            }
            Outcome::Replayed => {
                debug!(version = session.version, "duplicate action ignored");
            }
            outcome => {
                info!(version = session.version, ?outcome, "action applied");
            }
        }

        if committed.outcome.is_mutation() {
            self.schedule_refresh(&session);
        }

        Ok(ActionOutcome::Session {
            outcome: committed.outcome,
            state: session.state,
            version: session.version,
        })
    }

    /// Resolve the registrant's rating; a directory failure never blocks a join.
    async fn signup(&self, action: &InboundAction) -> Signup {
        let default = self.ctx.default_rating;
        let rating = match self.ctx.ratings.rating(action.actor_id).await {
            Ok(Some(rating)) => rating,
            Ok(None) => default,
            Err(e) => {
                warn!(error = %e, "rating lookup failed, using default");
                default
            }
        };

        let display_name = if action.actor_name.trim().is_empty() {
            action.actor_id.to_string()
        } else {
            action.actor_name.clone()
        };

        Signup {
            actor_id: action.actor_id,
            display_name,
            rating,
        }
    }

    async fn rate(&self, target: ActorId, rating: Rating) -> ActionResult<ActionOutcome> {
        self.ctx
            .ratings
            .set_rating(target, rating)
            .await
            .map_err(|e| ActionError::Unavailable {
                attempts: 1,
                reason: e.to_string(),
            })?;
        info!(target_id = target, rating, "rating updated");
        Ok(ActionOutcome::Rated { target, rating })
    }

    fn schedule_refresh(&mut self, session: &Session) {
        if !self.debouncer.schedule(snapshot(session), Instant::now()) {
            metrics::record_refresh_absorbed();
        }
    }

    async fn emit(&self, refresh: RosterSnapshot) {
        self.ctx.limiter.until_outbound_ready().await;
        let version = refresh.version;
        if self.ctx.refresh_tx.send(refresh).await.is_err() {
            debug!("refresh sink closed, dropping refresh");
            return;
        }
        metrics::record_refresh_emitted();
        debug!(version, "refresh emitted");
    }
}

/// Send a shutdown request and wait for the worker to finish.
pub(super) async fn stop(tx: &mpsc::Sender<ChatEvent>) {
    let (done, wait) = oneshot::channel();
    if tx.send(ChatEvent::Shutdown { done }).await.is_ok() {
        let _ = wait.await;
    }
}
