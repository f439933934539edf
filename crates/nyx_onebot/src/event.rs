//! OneBot v11 wire types (§6). Grounded on `mneme_onebot::event`, extended
//! to cover the full segment-array message body (§6 lists text, image,
//! face, mface, dice, rps, poke, at, reply, record, video, file, json,
//! xml), where the teacher's event.rs only needed `raw_message: String`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "post_type")]
pub enum OneBotEvent {
    #[serde(rename = "message")]
    Message(MessageEvent),
    #[serde(rename = "meta_event")]
    Meta(MetaEvent),
    #[serde(rename = "notice")]
    Notice(serde_json::Value),
    #[serde(rename = "request")]
    Request(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_type: String, // "private" or "group"
    pub sub_type: Option<String>,
    pub message_id: i64,
    pub user_id: i64,
    pub group_id: Option<i64>,
    #[serde(default)]
    pub message: Vec<RawSegment>,
    pub raw_message: String,
    pub sender: Sender,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    pub card: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "meta_event_type")]
pub enum MetaEvent {
    #[serde(rename = "heartbeat")]
    Heartbeat { time: i64 },
    #[serde(rename = "lifecycle")]
    Lifecycle { time: i64, sub_type: String },
}

/// Raw wire shape of one message segment: `{"type": "...", "data": {...}}`.
/// Parsed into the typed [`Segment`] via [`RawSegment::into_segment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSegment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Typed message segment (§6). `Image` carries an optional sticker hint
/// flag alongside its URL.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Image { url: Option<String>, is_sticker_hint: bool },
    Face { id: String },
    Mface { summary: String, emoji_id: String, emoji_package_id: String },
    Dice,
    Rps,
    Poke,
    At { qq: String },
    Reply { id: String },
    Record,
    Video,
    File,
    Json,
    Xml,
    Unknown(String),
}

impl RawSegment {
    pub fn into_segment(self) -> Segment {
        let d = &self.data;
        let s = |key: &str| d.get(key).and_then(|v| v.as_str()).map(str::to_string);
        match self.kind.as_str() {
            "text" => Segment::Text(s("text").unwrap_or_default()),
            "image" => Segment::Image { url: s("url"), is_sticker_hint: d.get("sub_type").and_then(|v| v.as_i64()) == Some(1) },
            "face" => Segment::Face { id: s("id").unwrap_or_default() },
            "mface" => Segment::Mface {
                summary: s("summary").unwrap_or_default(),
                emoji_id: s("emoji_id").unwrap_or_default(),
                emoji_package_id: s("emoji_package_id").unwrap_or_default(),
            },
            "dice" => Segment::Dice,
            "rps" => Segment::Rps,
            "poke" => Segment::Poke,
            "at" => Segment::At { qq: s("qq").unwrap_or_default() },
            "reply" => Segment::Reply { id: s("id").unwrap_or_default() },
            "record" => Segment::Record,
            "video" => Segment::Video,
            "file" => Segment::File,
            "json" => Segment::Json,
            "xml" => Segment::Xml,
            other => Segment::Unknown(other.to_string()),
        }
    }
}

/// A fully parsed inbound message, as handed to the debouncer/orchestrator.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_type: MessageKind,
    pub self_id: i64,
    pub user_id: i64,
    pub group_id: Option<i64>,
    pub sender_nickname: String,
    pub sender_card: Option<String>,
    pub segments: Vec<Segment>,
    pub is_mentioned: bool,
    pub raw_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Group,
    Private,
}

impl MessageEvent {
    /// §6: derive a session id as `onebot:group:<id>` / `onebot:private:<user>`.
    pub fn session_id(&self) -> String {
        match self.group_id {
            Some(gid) => format!("onebot:group:{gid}"),
            None => format!("onebot:private:{}", self.user_id),
        }
    }

    pub fn into_inbound(self, self_id: i64) -> InboundMessage {
        let segments: Vec<Segment> = self.message.into_iter().map(RawSegment::into_segment).collect();
        let is_mentioned = segments.iter().any(|seg| matches!(seg, Segment::At { qq } if qq == &self_id.to_string()));
        InboundMessage {
            message_type: if self.group_id.is_some() { MessageKind::Group } else { MessageKind::Private },
            self_id,
            user_id: self.user_id,
            group_id: self.group_id,
            sender_nickname: self.sender.nickname.unwrap_or_default(),
            sender_card: self.sender.card,
            segments,
            is_mentioned,
            raw_text: self.raw_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OneBotAction {
    pub action: String,
    pub params: serde_json::Value,
    pub echo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneBotResponse {
    pub status: String,
    pub retcode: i32,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    pub echo: Option<String>,
}
