pub mod client;
pub mod cq;
pub mod event;
pub mod source;

pub use client::OneBotClient;
pub use event::{InboundMessage, MessageEvent, MessageKind, OneBotEvent, Segment};
pub use source::OneBotSource;
