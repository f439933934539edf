//! OneBot v11 WebSocket client (§6). Grounded directly on
//! `mneme_onebot::client::OneBotClient`: a background task owns the
//! connection, reconnects with capped exponential backoff, and inbound
//! messages are delivered over an `mpsc` channel while outbound actions are
//! sent over another. Extended here to match outbound API responses by
//! `echo` id (§6: "each carries an echo id; responses are matched by echo
//! id"), which the teacher's version didn't need since it only sent
//! fire-and-forget `send_*_msg` actions.

use crate::event::{MessageEvent, OneBotAction, OneBotEvent, OneBotResponse};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_RETRIES: u32 = 10;
const MAX_BACKOFF_SECS: u64 = 60;

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<OneBotResponse>>>>;

pub struct OneBotClient {
    tx: mpsc::Sender<String>,
    pending: PendingCalls,
    connected: Arc<AtomicBool>,
}

impl OneBotClient {
    /// Spawns the connection-owning background task and returns `(client,
    /// inbound message receiver)`. Reconnects indefinitely with capped
    /// exponential backoff up to `MAX_RETRIES` consecutive failures, at
    /// which point the task gives up (a circuit breaker, matching the
    /// teacher's behavior).
    pub fn connect(url: &str, access_token: Option<&str>) -> Result<(Self, mpsc::Receiver<MessageEvent>)> {
        let mut ws_url = Url::parse(url).context("invalid OneBot websocket URL")?;
        if let Some(token) = access_token {
            ws_url.query_pairs_mut().append_pair("access_token", token);
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<MessageEvent>(64);
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(false));

        let task_pending = pending.clone();
        let task_connected = connected.clone();
        tokio::spawn(async move {
            let mut retry_count = 0u32;
            loop {
                match connect_async(&ws_url).await {
                    Ok((stream, _)) => {
                        tracing::info!("connected to OneBot gateway");
                        task_connected.store(true, Ordering::Relaxed);
                        retry_count = 0;
                        if let Err(e) = handle_connection(stream, &mut outbound_rx, &inbound_tx, &task_pending).await {
                            tracing::warn!(error = %e, "OneBot connection dropped");
                        }
                        task_connected.store(false, Ordering::Relaxed);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Err(e) => {
                        retry_count += 1;
                        if retry_count > MAX_RETRIES {
                            tracing::error!("giving up after {MAX_RETRIES} failed OneBot connection attempts: {e}");
                            return;
                        }
                        let backoff = MAX_BACKOFF_SECS.min(2u64.pow(retry_count.min(6) + 1));
                        tracing::warn!(attempt = retry_count, backoff_secs = backoff, error = %e, "failed to connect to OneBot gateway");
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                    }
                }
            }
        });

        Ok((Self { tx: outbound_tx, pending, connected }, inbound_rx))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn call(&self, action: &str, params: serde_json::Value) -> Result<OneBotResponse> {
        let echo = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(echo.clone(), tx);

        let action = OneBotAction { action: action.to_string(), params, echo: echo.clone() };
        let json = serde_json::to_string(&action)?;
        self.tx.send(json).await.map_err(|_| anyhow::anyhow!("OneBot outbound channel closed"))?;

        match tokio::time::timeout(Duration::from_secs(10), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => anyhow::bail!("OneBot response channel dropped for echo {echo}"),
            Err(_) => {
                self.pending.lock().unwrap().remove(&echo);
                anyhow::bail!("OneBot call '{action}' timed out waiting for echo {echo}")
            }
        }
    }

    pub async fn send_private_msg(&self, user_id: i64, message: &str) -> Result<()> {
        self.call("send_private_msg", serde_json::json!({ "user_id": user_id, "message": message })).await?;
        Ok(())
    }

    pub async fn send_group_msg(&self, group_id: i64, message: &str) -> Result<()> {
        self.call("send_group_msg", serde_json::json!({ "group_id": group_id, "message": message })).await?;
        Ok(())
    }

    pub async fn get_msg(&self, message_id: i64) -> Result<serde_json::Value> {
        let resp = self.call("get_msg", serde_json::json!({ "message_id": message_id })).await?;
        Ok(resp.data.unwrap_or(serde_json::Value::Null))
    }

    pub async fn get_group_member_info(&self, group_id: i64, user_id: i64) -> Result<serde_json::Value> {
        let resp = self
            .call("get_group_member_info", serde_json::json!({ "group_id": group_id, "user_id": user_id }))
            .await?;
        Ok(resp.data.unwrap_or(serde_json::Value::Null))
    }

    pub async fn get_stranger_info(&self, user_id: i64) -> Result<serde_json::Value> {
        let resp = self.call("get_stranger_info", serde_json::json!({ "user_id": user_id })).await?;
        Ok(resp.data.unwrap_or(serde_json::Value::Null))
    }
}

async fn handle_connection(
    stream: WsStream,
    outbound_rx: &mut mpsc::Receiver<String>,
    inbound_tx: &mpsc::Sender<MessageEvent>,
    pending: &PendingCalls,
) -> Result<()> {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                let Some(msg) = msg else { return Ok(()) };
                let msg = msg?;
                if let Message::Text(text) = msg {
                    handle_inbound_text(&text, inbound_tx, pending).await;
                } else if matches!(msg, Message::Close(_)) {
                    return Ok(());
                }
            }
            Some(payload) = outbound_rx.recv() => {
                write.send(Message::Text(payload)).await?;
            }
        }
    }
}

async fn handle_inbound_text(text: &str, inbound_tx: &mpsc::Sender<MessageEvent>, pending: &PendingCalls) {
    if let Ok(event) = serde_json::from_str::<OneBotEvent>(text) {
        match event {
            OneBotEvent::Message(msg) => {
                let _ = inbound_tx.send(msg).await;
            }
            other => tracing::debug!(?other, "ignored non-message OneBot event"),
        }
        return;
    }
    if let Ok(response) = serde_json::from_str::<OneBotResponse>(text) {
        if let Some(echo) = &response.echo {
            if let Some(tx) = pending.lock().unwrap().remove(echo) {
                let _ = tx.send(response);
                return;
            }
        }
        tracing::debug!(?response, "OneBot response with no matching pending call");
        return;
    }
    tracing::debug!(raw = %text, "unrecognized OneBot payload");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_before_connect_attempt_completes() {
        // is_connected starts false; flipped true only once the background
        // task observes a successful handshake.
        let connected = Arc::new(AtomicBool::new(false));
        assert!(!connected.load(Ordering::Relaxed));
    }
}
