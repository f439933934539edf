//! `IngressSource` (§4.5 addition): the wire-level transport the debouncer
//! sits behind. Keeping this a trait means the debouncer and the
//! orchestrator never depend on `nyx_onebot` directly — only a concrete
//! binary wires a real source in. `nyx_onebot::OneBotSource` is the only
//! implementation today.

use async_trait::async_trait;
use nyx_core::SessionId;

/// One inbound wire event, already resolved to a session id by the
/// transport (e.g. `onebot:group:<id>` / `onebot:private:<user_id>`).
#[async_trait]
pub trait IngressSource: Send + Sync {
    type Event: Send + 'static;

    /// Blocks until the next event is available. Returning `None` signals
    /// the transport has shut down cleanly.
    async fn next_event(&mut self) -> Option<(SessionId, Self::Event)>;
}
