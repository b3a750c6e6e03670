//! Wire definitions for the dashboard's push transports.
//!
//! Two independent server-push transports exist:
//! - the **event channel**, a WebSocket carrying newline-delimited JSON
//!   frames of shape `{"event": <kind>, "data": <payload>}`;
//! - the **pairing stream**, a `text/event-stream` response whose records
//!   (`event:` / `data:` lines, blank-line terminated) drive a one-shot
//!   device-pairing handshake.
//!
//! Frames with an unknown `event` name are not errors: they are ignored by
//! consumers.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PING_INTERVAL_MS: u64 = 30_000; // 30s
pub const RECONNECT_DELAY_MS: u64 = 3_000; // constant, not exponential
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Sent on the event channel every [`PING_INTERVAL_MS`] while open.
pub const KEEP_ALIVE_PAYLOAD: &str = r#"{"type":"ping"}"#;

pub const EVENT_STREAM_MIME: &str = "text/event-stream";

// ── Paths ────────────────────────────────────────────────────────────────────

pub mod paths {
    pub const EVENTS: &str = "/api/ws";
    pub const PAIRING_STREAM: &str = "/api/whatsapp/qr/stream";

    pub const LOGIN: &str = "/api/auth/login";
    pub const LOGOUT: &str = "/api/auth/logout";
    pub const ME: &str = "/api/me";

    pub const WHATSAPP_CONNECT: &str = "/api/whatsapp/connect";
    pub const WHATSAPP_DISCONNECT: &str = "/api/whatsapp/disconnect";
    pub const WHATSAPP_STATUS: &str = "/api/whatsapp/status";
    pub const WHATSAPP_SEND: &str = "/api/whatsapp/send";
}

// ── Event channel ────────────────────────────────────────────────────────────

/// Domain events pushed over the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    NewCustomer,
    CustomerUpdated,
    MessageSent,
    ConnectionStatus,
}

impl EventKind {
    pub const ALL: [Self; 5] = [
        Self::NewMessage,
        Self::NewCustomer,
        Self::CustomerUpdated,
        Self::MessageSent,
        Self::ConnectionStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::NewCustomer => "new_customer",
            Self::CustomerUpdated => "customer_updated",
            Self::MessageSent => "message_sent",
            Self::ConnectionStatus => "connection_status",
        }
    }

    /// `None` for names this client does not know about.
    pub fn parse(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Errors for a single record. Never fatal to the channel.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed event frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid '{event}' payload: {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// One decoded `{event, data}` record, before payload typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawEventFrame {
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event)
    }

    /// Type the payload. `Ok(None)` means the event name is unknown and the
    /// frame should be dropped.
    pub fn into_typed(self) -> Result<Option<EventFrame>, FrameError> {
        let Some(kind) = self.kind() else {
            return Ok(None);
        };
        let frame = match kind {
            EventKind::NewMessage => {
                let message = serde_json::from_value(self.data).map_err(|source| {
                    FrameError::InvalidPayload {
                        event: kind.as_str(),
                        source,
                    }
                })?;
                EventFrame::NewMessage(message)
            },
            EventKind::NewCustomer => EventFrame::NewCustomer(self.data),
            EventKind::CustomerUpdated => EventFrame::CustomerUpdated(self.data),
            EventKind::MessageSent => EventFrame::MessageSent(self.data),
            EventKind::ConnectionStatus => EventFrame::ConnectionStatus(self.data),
        };
        Ok(Some(frame))
    }
}

/// A typed event channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EventFrame {
    NewMessage(NewMessage),
    NewCustomer(serde_json::Value),
    CustomerUpdated(serde_json::Value),
    MessageSent(serde_json::Value),
    ConnectionStatus(serde_json::Value),
}

/// Split one delivery into records and decode each independently.
///
/// Blank lines are skipped. Results keep delivery order, so a malformed
/// record sits between its siblings instead of hiding them.
pub fn parse_frames(payload: &str) -> Vec<Result<RawEventFrame, FrameError>> {
    payload
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str::<RawEventFrame>(line).map_err(FrameError::from))
        .collect()
}

/// Payload of a `new_message` frame.
///
/// Besides chat messages the server reuses this event to announce that a
/// contact identifier (JID) was superseded by another one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewMessage {
    #[serde(deserialize_with = "lenient")]
    pub message_id: String,
    #[serde(deserialize_with = "lenient")]
    pub sender_jid: String,
    /// For outgoing messages, the customer JID.
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub chat_jid: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub message_text: String,
    #[serde(deserialize_with = "lenient")]
    pub message_type: String,
    /// Set for image/document messages.
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Unix seconds; numeric strings are accepted.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: i64,
    #[serde(deserialize_with = "lenient")]
    pub is_from_me: bool,
    #[serde(
        rename = "type",
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub old_jid: Option<String>,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub new_jid: Option<String>,
}

/// Decode a field, using its default for `null` or a value of the wrong type.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let timestamp = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|secs| secs as i64))
            .unwrap_or_default(),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    };
    Ok(timestamp)
}

/// How a `new_message` payload must be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageClass {
    JidRemap { old_jid: String, new_jid: String },
    Deliverable,
    Empty,
}

pub const JID_MAPPING_TYPE: &str = "jid_mapping";

impl NewMessage {
    pub fn has_text(&self) -> bool {
        !self.message_text.is_empty()
    }

    pub fn is_media(&self) -> bool {
        matches!(self.message_type.as_str(), "image" | "document")
            || self.media_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    pub fn classify(&self) -> MessageClass {
        let old_jid = self.old_jid.as_deref().filter(|jid| !jid.is_empty());
        let new_jid = self.new_jid.as_deref().filter(|jid| !jid.is_empty());
        if let (Some(old_jid), Some(new_jid)) = (old_jid, new_jid)
            && (!self.has_text() || self.kind.as_deref() == Some(JID_MAPPING_TYPE))
        {
            return MessageClass::JidRemap {
                old_jid: old_jid.to_string(),
                new_jid: new_jid.to_string(),
            };
        }
        if self.has_text() || self.is_media() {
            MessageClass::Deliverable
        } else {
            MessageClass::Empty
        }
    }
}

// ── Pairing stream ───────────────────────────────────────────────────────────

pub const DEFAULT_PAIRING_ERROR: &str = "an error occurred";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairEventKind {
    /// A fresh pairing code (rendered image) to show the user.
    Code,
    Success,
    Error,
    Timeout,
    Other(String),
}

impl PairEventKind {
    /// Terminal kinds end the pairing attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Timeout)
    }
}

/// JSON body of a pairing stream record's `data:` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairEvent {
    /// Empty when the record only names its kind in the `event:` line.
    #[serde(default)]
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PairEvent {
    /// Decode a record's `data:` field, taking the kind from the record's
    /// `event:` line when the payload does not carry one.
    pub fn from_record(record_event: Option<&str>, data: &str) -> Result<Self, serde_json::Error> {
        let mut event: Self = serde_json::from_str(data)?;
        if event.event.is_empty()
            && let Some(name) = record_event
        {
            event.event = name.to_string();
        }
        Ok(event)
    }

    pub fn kind(&self) -> PairEventKind {
        match self.event.as_str() {
            "code" => PairEventKind::Code,
            "success" => PairEventKind::Success,
            "error" => PairEventKind::Error,
            "timeout" => PairEventKind::Timeout,
            other => PairEventKind::Other(other.to_string()),
        }
    }

    /// The code image, if present and non-empty.
    pub fn image(&self) -> Option<&str> {
        self.qr_image.as_deref().filter(|img| !img.is_empty())
    }

    pub fn error_message(&self) -> &str {
        self.error
            .as_deref()
            .filter(|msg| !msg.is_empty())
            .unwrap_or(DEFAULT_PAIRING_ERROR)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── Event kinds ────────────────────────────────────────────────────

    #[test]
    fn event_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
        assert_eq!(EventKind::parse("typing"), None);
    }

    #[test]
    fn keep_alive_payload_is_ping() {
        let value: serde_json::Value = serde_json::from_str(KEEP_ALIVE_PAYLOAD).unwrap();
        assert_eq!(value, serde_json::json!({"type": "ping"}));
    }

    // ── Frame splitting ────────────────────────────────────────────────

    #[test]
    fn parse_frames_keeps_order_and_isolates_failures() {
        let payload = concat!(
            r#"{"event":"new_customer","data":{"id":"c1"}}"#,
            "\n",
            "{not json",
            "\n\n",
            r#"{"event":"message_sent","data":{"id":"m1"}}"#,
            "\n",
        );
        let frames = parse_frames(payload);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].as_ref().unwrap().event, "new_customer");
        assert!(matches!(frames[1], Err(FrameError::Malformed(_))));
        assert_eq!(frames[2].as_ref().unwrap().event, "message_sent");
    }

    #[test]
    fn parse_frames_tolerates_crlf_and_missing_data() {
        let frames = parse_frames("{\"event\":\"connection_status\"}\r\n");
        assert_eq!(frames.len(), 1);
        let frame = frames.into_iter().next().unwrap().unwrap();
        assert_eq!(frame.data, serde_json::Value::Null);
        assert_eq!(frame.kind(), Some(EventKind::ConnectionStatus));
    }

    #[test]
    fn unknown_event_types_to_none() {
        let raw = RawEventFrame {
            event: "presence".into(),
            data: serde_json::json!({}),
        };
        assert!(raw.into_typed().unwrap().is_none());
    }

    #[test]
    fn new_message_payload_must_be_object() {
        let raw = RawEventFrame {
            event: "new_message".into(),
            data: serde_json::json!("oops"),
        };
        assert!(matches!(
            raw.into_typed(),
            Err(FrameError::InvalidPayload {
                event: "new_message",
                ..
            })
        ));
    }

    // ── new_message routing ────────────────────────────────────────────

    fn message(value: serde_json::Value) -> NewMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn non_routing_fields_fall_back_to_defaults() {
        let msg = message(serde_json::json!({
            "message_text": "halo",
            "timestamp": null,
            "is_from_me": "yes",
            "sender_jid": 628,
            "media_url": false,
        }));
        assert_eq!(msg.message_text, "halo");
        assert_eq!(msg.timestamp, 0);
        assert!(!msg.is_from_me);
        assert_eq!(msg.sender_jid, "");
        assert_eq!(msg.media_url, None);
        assert_eq!(msg.classify(), MessageClass::Deliverable);
    }

    #[test]
    fn timestamp_accepts_numeric_strings() {
        let msg = message(serde_json::json!({"timestamp": " 1700000000 "}));
        assert_eq!(msg.timestamp, 1_700_000_000);
        let msg = message(serde_json::json!({"timestamp": 1_700_000_000.5}));
        assert_eq!(msg.timestamp, 1_700_000_000);
    }

    #[test]
    fn remap_without_text() {
        let msg = message(serde_json::json!({"old_jid": "A@x", "new_jid": "B@x"}));
        assert_eq!(msg.classify(), MessageClass::JidRemap {
            old_jid: "A@x".into(),
            new_jid: "B@x".into(),
        });
    }

    #[test]
    fn remap_flagged_by_type() {
        let msg = message(serde_json::json!({
            "type": "jid_mapping",
            "old_jid": "A@x",
            "new_jid": "B@x",
            "message_text": "ignored",
        }));
        assert!(matches!(msg.classify(), MessageClass::JidRemap { .. }));
    }

    #[test]
    fn text_message_with_jids_is_deliverable() {
        let msg = message(serde_json::json!({
            "old_jid": "A@x",
            "new_jid": "B@x",
            "message_text": "hello",
        }));
        assert_eq!(msg.classify(), MessageClass::Deliverable);
    }

    #[test]
    fn empty_text_message_is_dropped() {
        let msg = message(serde_json::json!({"message_text": "", "message_type": "text"}));
        assert_eq!(msg.classify(), MessageClass::Empty);
    }

    #[test]
    fn media_without_text_is_deliverable() {
        let image = message(serde_json::json!({"message_type": "image"}));
        assert_eq!(image.classify(), MessageClass::Deliverable);

        let document = message(serde_json::json!({"message_type": "document"}));
        assert_eq!(document.classify(), MessageClass::Deliverable);

        let linked = message(serde_json::json!({
            "message_type": "sticker",
            "media_url": "/uploads/a.webp",
        }));
        assert_eq!(linked.classify(), MessageClass::Deliverable);
    }

    #[test]
    fn full_message_parses() {
        let msg = message(serde_json::json!({
            "message_id": "3EB0",
            "sender_jid": "62812@s.whatsapp.net",
            "chat_jid": "62812@s.whatsapp.net",
            "message_text": "halo",
            "message_type": "text",
            "timestamp": 1_700_000_000,
            "is_from_me": true,
        }));
        assert_eq!(msg.message_id, "3EB0");
        assert!(msg.is_from_me);
        assert_eq!(msg.timestamp, 1_700_000_000);
        assert_eq!(msg.chat_jid.as_deref(), Some("62812@s.whatsapp.net"));
    }

    // ── Pairing events ─────────────────────────────────────────────────

    #[test]
    fn pair_event_kinds() {
        let code: PairEvent =
            serde_json::from_str(r#"{"event":"code","code":"2@abc","qr_image":"data:image/png;base64,AA"}"#)
                .unwrap();
        assert_eq!(code.kind(), PairEventKind::Code);
        assert_eq!(code.image(), Some("data:image/png;base64,AA"));
        assert!(!code.kind().is_terminal());

        let success: PairEvent = serde_json::from_str(r#"{"event":"success"}"#).unwrap();
        assert!(success.kind().is_terminal());

        let other: PairEvent = serde_json::from_str(r#"{"event":"scanned"}"#).unwrap();
        assert_eq!(other.kind(), PairEventKind::Other("scanned".into()));
    }

    #[test]
    fn pair_event_kind_falls_back_to_record_name() {
        let event =
            PairEvent::from_record(Some("timeout"), r#"{"error":"QR code request timeout"}"#)
                .unwrap();
        assert_eq!(event.kind(), PairEventKind::Timeout);

        let event = PairEvent::from_record(Some("error"), r#"{"event":"success"}"#).unwrap();
        assert_eq!(event.kind(), PairEventKind::Success);

        assert!(PairEvent::from_record(None, "not json").is_err());
    }

    #[test]
    fn pair_error_message_defaults() {
        let err: PairEvent = serde_json::from_str(r#"{"event":"error","error":""}"#).unwrap();
        assert_eq!(err.error_message(), DEFAULT_PAIRING_ERROR);

        let err: PairEvent =
            serde_json::from_str(r#"{"event":"error","error":"device limit reached"}"#).unwrap();
        assert_eq!(err.error_message(), "device limit reached");
    }
}
