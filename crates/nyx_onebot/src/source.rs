//! `nyx_ingress::IngressSource` binding for OneBot (§4.5 addition): wraps
//! the inbound `MessageEvent` channel and resolves each event to a
//! `SessionId`, so the debouncer never needs to know about WebSockets.

use crate::event::{InboundMessage, MessageEvent};
use async_trait::async_trait;
use nyx_core::SessionId;
use nyx_ingress::IngressSource;
use tokio::sync::mpsc;

pub struct OneBotSource {
    self_id: i64,
    rx: mpsc::Receiver<MessageEvent>,
}

impl OneBotSource {
    pub fn new(self_id: i64, rx: mpsc::Receiver<MessageEvent>) -> Self {
        Self { self_id, rx }
    }
}

#[async_trait]
impl IngressSource for OneBotSource {
    type Event = InboundMessage;

    async fn next_event(&mut self) -> Option<(SessionId, Self::Event)> {
        let event = self.rx.recv().await?;
        let session_id = SessionId::from(event.session_id());
        Some((session_id, event.into_inbound(self.self_id)))
    }
}
