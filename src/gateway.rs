//! Line-delimited JSON surface of the daemon.
//!
//! Reads one [`InboundAction`] per line from the input and writes tagged
//! JSON lines to the output:
//!
//! ```text
//! {"type":"reply", "id":..., "chat_id":..., "ok":true, "outcome":{...}}
//! {"type":"refresh", "chat_id":..., "session_id":..., "state":..., "lines":[...]}
//! {"type":"error", "message":"..."}
//! ```
//!
//! Actions are enqueued in input order, so each chat sees its actions in the
//! order they were read; replies are awaited concurrently and may be written
//! out of order across chats. The reader never waits on a chat: an action for
//! a chat whose queue is full is answered `busy` straight away.

use crate::dispatch::{ActionReply, Dispatcher, InboundAction};
use crate::state::RosterSnapshot;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Longest accepted input line.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("input error: {0}")]
    Input(LinesCodecError),
    #[error("output error: {0}")]
    Output(LinesCodecError),
    #[error("writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// One output line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundLine {
    Reply(ActionReply),
    Refresh(RosterSnapshot),
    Error { message: String },
}

/// Serve actions from `input` until EOF or `shutdown` resolves.
///
/// On the way out every in-flight action is answered, chat workers flush
/// their pending refreshes, and all of it is written before returning.
pub async fn run<R, W, S>(
    dispatcher: Arc<Dispatcher>,
    refresh_rx: mpsc::Receiver<RosterSnapshot>,
    input: R,
    output: W,
    shutdown: S,
) -> Result<(), GatewayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_lines(output, out_rx));

    let (stop_tx, stop_rx) = oneshot::channel();
    let forwarder = tokio::spawn(forward_refreshes(refresh_rx, out_tx.clone(), stop_rx));

    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut inflight = JoinSet::new();
    let mut read_error = None;
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            _ = &mut shutdown => {
                info!("shutdown requested, draining");
                break;
            }
        };

        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let message = format!("line exceeds {MAX_LINE_LENGTH} bytes");
                warn!("{message}");
                let _ = out_tx.send(OutboundLine::Error { message }).await;
                continue;
            }
            Some(Err(e)) => {
                read_error = Some(GatewayError::Input(e));
                break;
            }
            None => {
                debug!("input closed");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let action: InboundAction = match serde_json::from_str(&line) {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "malformed action line");
                let _ = out_tx
                    .send(OutboundLine::Error {
                        message: format!("invalid action: {e}"),
                    })
                    .await;
                continue;
            }
        };

        let (id, chat_id) = (action.id, action.chat_id);
        let out = out_tx.clone();
        match dispatcher.try_enqueue(action) {
            Ok(pending) => {
                inflight.spawn(async move {
                    let result = pending.wait().await;
                    let _ = out
                        .send(OutboundLine::Reply(ActionReply::new(id, chat_id, result)))
                        .await;
                });
            }
            Err(e) => {
                let _ = out
                    .send(OutboundLine::Reply(ActionReply::new(id, chat_id, Err(e))))
                    .await;
            }
        }

        while inflight.try_join_next().is_some() {}
    }

    while inflight.join_next().await.is_some() {}
    dispatcher.shutdown().await;

    let _ = stop_tx.send(());
    let _ = forwarder.await;

    drop(out_tx);
    writer.await?.map_err(GatewayError::Output)?;

    match read_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Move refreshes to the output until told to stop, then drain what is left.
async fn forward_refreshes(
    mut refresh_rx: mpsc::Receiver<RosterSnapshot>,
    out_tx: mpsc::Sender<OutboundLine>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            refresh = refresh_rx.recv() => match refresh {
                Some(refresh) => {
                    if out_tx.send(OutboundLine::Refresh(refresh)).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            _ = &mut stop => break,
        }
    }

    refresh_rx.close();
    while let Some(refresh) = refresh_rx.recv().await {
        if out_tx.send(OutboundLine::Refresh(refresh)).await.is_err() {
            return;
        }
    }
}

async fn write_lines<W>(
    output: W,
    mut out_rx: mpsc::Receiver<OutboundLine>,
) -> Result<(), LinesCodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(output, LinesCodec::new());
    while let Some(line) = out_rx.recv().await {
        match serde_json::to_string(&line) {
            Ok(text) => sink.send(text).await?,
            Err(e) => warn!(error = %e, "failed to encode output line"),
        }
    }
    SinkExt::<String>::flush(&mut sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::MemoryRatings;
    use crate::dispatch::ChatContext;
    use crate::state::{ChatId, Session};
    use crate::store::{CasOutcome, MemoryStore, SessionStore, StoreError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Loads for one chat never come back.
    struct StuckChat {
        inner: MemoryStore,
        stuck: ChatId,
    }

    #[async_trait]
    impl SessionStore for StuckChat {
        async fn load(&self, chat_id: ChatId) -> Result<Option<Session>, StoreError> {
            if chat_id == self.stuck {
                std::future::pending::<()>().await;
            }
            self.inner.load(chat_id).await
        }

        async fn compare_and_swap(
            &self,
            chat_id: ChatId,
            expected_version: u64,
            session: &Session,
        ) -> Result<CasOutcome, StoreError> {
            self.inner
                .compare_and_swap(chat_id, expected_version, session)
                .await
        }
    }

    async fn run_script(script: &str) -> Vec<Value> {
        let mut config = Config::default();
        config.session.capacity = 2;
        config.session.debounce_window_ms = 50;

        let (refresh_tx, refresh_rx) = mpsc::channel(64);
        let ctx = ChatContext::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRatings::new()),
            refresh_tx,
        );
        let dispatcher = Arc::new(Dispatcher::new(ctx));

        let (mut client, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, mut client_out) = tokio::io::duplex(64 * 1024);
        client.write_all(script.as_bytes()).await.unwrap();
        drop(client);

        run(
            dispatcher,
            refresh_rx,
            server_in,
            server_out,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        let mut raw = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut client_out, &mut raw)
            .await
            .unwrap();
        raw.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn malformed_lines_are_reported_and_skipped() {
        let out = run_script("not json\n\n{\"chat_id\":1,\"actor_id\":2,\"kind\":\"join\"}\n").await;

        let errors: Vec<_> = out.iter().filter(|v| v["type"] == "error").collect();
        assert_eq!(errors.len(), 1);

        let replies: Vec<_> = out.iter().filter(|v| v["type"] == "reply").collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["ok"], false);
        assert_eq!(replies[0]["error"]["code"], "no_active_session");
    }

    #[tokio::test]
    async fn full_roster_forms_teams_and_flushes_refresh() {
        let script = concat!(
            r#"{"chat_id":7,"actor_id":1,"actor_name":"admin","is_admin":true,"kind":{"start":{"schedule":"saturday"}}}"#,
            "\n",
            r#"{"chat_id":7,"actor_id":2,"actor_name":"alice","kind":"join_with_guest"}"#,
            "\n",
        );
        let out = run_script(script).await;

        let replies: Vec<_> = out.iter().filter(|v| v["type"] == "reply").collect();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r["ok"] == true));

        let refreshes: Vec<_> = out.iter().filter(|v| v["type"] == "refresh").collect();
        let last = refreshes.last().unwrap();
        assert_eq!(last["state"], "formed");
        assert_eq!(last["teams"]["black"][0]["display_name"], "alice");
        assert_eq!(last["teams"]["white"][0]["guest"], true);
    }

    #[tokio::test]
    async fn full_chat_queue_does_not_hold_up_other_chats() {
        let mut config = Config::default();
        config.limits.chat_mailbox_capacity = 1;

        let (refresh_tx, refresh_rx) = mpsc::channel(64);
        let ctx = ChatContext::new(
            &config,
            Arc::new(StuckChat {
                inner: MemoryStore::new(),
                stuck: 1,
            }),
            Arc::new(MemoryRatings::new()),
            refresh_tx,
        );
        let dispatcher = Arc::new(Dispatcher::new(ctx));

        let (mut client, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_out) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(run(
            dispatcher,
            refresh_rx,
            server_in,
            server_out,
            std::future::pending::<()>(),
        ));

        let mut script = String::new();
        for actor in 2..6 {
            script.push_str(&format!(
                "{{\"chat_id\":1,\"actor_id\":{actor},\"kind\":\"join\"}}\n"
            ));
        }
        script.push_str(
            r#"{"chat_id":2,"actor_id":1,"is_admin":true,"kind":{"start":{"schedule":"saturday"}}}"#,
        );
        script.push('\n');
        client.write_all(script.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_out).lines();
        let mut seen: Vec<Value> = Vec::new();
        let chat_two_reply = |seen: &[Value]| {
            seen.iter()
                .any(|v| v["type"] == "reply" && v["chat_id"] == 2)
        };
        tokio::time::timeout(Duration::from_secs(3), async {
            while !chat_two_reply(&seen) {
                let line = lines.next_line().await.unwrap().unwrap();
                seen.push(serde_json::from_str(&line).unwrap());
            }
        })
        .await
        .expect("chat 2 answered while chat 1 is stuck");

        let started = seen
            .iter()
            .find(|v| v["type"] == "reply" && v["chat_id"] == 2)
            .unwrap();
        assert_eq!(started["ok"], true);
        assert_eq!(started["outcome"]["session"]["outcome"]["result"], "started");

        let busy = seen
            .iter()
            .filter(|v| v["chat_id"] == 1 && v["error"]["code"] == "busy")
            .count();
        assert!(busy >= 1, "{seen:?}");

        server.abort();
    }
}
