//! Frame classification: decide whether an inbound text frame is a control
//! frame or a displayable message, and normalize it into a [`ChatMessage`].

use serde_json::{Map, Value};

use crate::error::ClassifyError;
use crate::message::{ActionButton, ChatMessage, MessageKind, Role};

/// Session bookkeeping frames. Never shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    StoreChatId { chat_id: String },
}

/// Result of classifying one inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Classified {
    Control(ControlFrame),
    Message(ChatMessage),
}

/// Everything `classify` needs from the outside world.
pub struct FrameContext<'a> {
    /// Chat id of the session the frame arrived on.
    pub chat_id: &'a str,
    /// Receipt time in epoch milliseconds.
    pub received_at: i64,
    /// Generates ids for frames that carry none.
    pub new_id: &'a dyn Fn() -> String,
}

/// Whether a frame looks like a JSON object or array once trimmed.
pub fn looks_structured(raw: &str) -> bool {
    let trimmed = raw.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Classify a raw text frame.
///
/// Structured-looking frames that fail to parse are an error; the caller
/// drops the frame and logs the violation.
pub fn classify(raw: &str, ctx: &FrameContext<'_>) -> Result<Classified, ClassifyError> {
    let data = raw.trim();

    if !looks_structured(data) {
        return Ok(Classified::Message(ChatMessage::new(
            (ctx.new_id)(),
            Role::Agent,
            data,
            ctx.chat_id,
            ctx.received_at,
        )));
    }

    let parsed: Value = serde_json::from_str(data)?;
    let record = match parsed {
        Value::Object(map) => map,
        // Arrays carry no recognized fields.
        _ => Map::new(),
    };

    let kind = record
        .get("type")
        .and_then(Value::as_str)
        .map(MessageKind::from);

    if kind == Some(MessageKind::StoreChatId) {
        let chat_id = record
            .get("chat_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClassifyError::MissingField {
                kind: MessageKind::StoreChatId.as_str().to_string(),
                field: "chat_id",
            })?;
        return Ok(Classified::Control(ControlFrame::StoreChatId {
            chat_id: chat_id.to_string(),
        }));
    }

    Ok(Classified::Message(normalize(record, kind, ctx)))
}

fn normalize(
    mut record: Map<String, Value>,
    kind: Option<MessageKind>,
    ctx: &FrameContext<'_>,
) -> ChatMessage {
    let id = record
        .remove("id")
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| (ctx.new_id)());

    let content = take_text(&mut record, "content");
    let message = take_text(&mut record, "message");
    let content = content.or(message).unwrap_or_default();

    let role = record
        .remove("role")
        .and_then(|v| v.as_str().and_then(Role::parse))
        .unwrap_or(Role::Agent);

    let chat_id = take_text(&mut record, "chat_id").unwrap_or_else(|| ctx.chat_id.to_string());

    let buttons = record.remove("buttons").and_then(|v| {
        serde_json::from_value::<Vec<ActionButton>>(v)
            .map_err(|e| tracing::debug!("Ignoring malformed buttons: {}", e))
            .ok()
    });

    let agent_id = take_text(&mut record, "agent_id");

    // Server timestamps are not trusted.
    record.remove("created_at");
    record.remove("type");

    ChatMessage {
        id,
        content,
        role,
        created_at: ctx.received_at,
        chat_id,
        kind,
        buttons,
        agent_id,
        extra: record,
    }
}

/// Remove `key` and return it when it holds a non-empty string.
fn take_text(record: &mut Map<String, Value>, key: &str) -> Option<String> {
    match record.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(new_id: &dyn Fn() -> String) -> FrameContext<'_> {
        FrameContext {
            chat_id: "chat-1",
            received_at: 1_700_000_000_000,
            new_id,
        }
    }

    fn fixed_id() -> String {
        "generated".to_string()
    }

    fn message(raw: &str) -> ChatMessage {
        match classify(raw, &ctx(&fixed_id)).unwrap() {
            Classified::Message(msg) => msg,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn structured_heuristic() {
        assert!(looks_structured("  {\"a\":1} "));
        assert!(looks_structured("[1,2]"));
        assert!(!looks_structured("{ not closed"));
        assert!(!looks_structured("hello"));
        assert!(!looks_structured("[1}"));
        assert!(!looks_structured(""));
    }

    #[test]
    fn plain_text_becomes_agent_message() {
        let msg = message("  hello  ");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.role, Role::Agent);
        assert_eq!(msg.id, "generated");
        assert_eq!(msg.chat_id, "chat-1");
        assert_eq!(msg.created_at, 1_700_000_000_000);
    }

    #[test]
    fn store_chat_id_is_control() {
        let out = classify(
            r#"{"type":"store_chat_id","chat_id":"abc123"}"#,
            &ctx(&fixed_id),
        )
        .unwrap();
        assert_eq!(
            out,
            Classified::Control(ControlFrame::StoreChatId {
                chat_id: "abc123".into()
            })
        );
    }

    #[test]
    fn store_chat_id_without_id_is_violation() {
        let err = classify(r#"{"type":"store_chat_id"}"#, &ctx(&fixed_id)).unwrap_err();
        assert!(matches!(err, ClassifyError::MissingField { field: "chat_id", .. }));
    }

    #[test]
    fn malformed_structured_frame_is_error() {
        let err = classify("{not json}", &ctx(&fixed_id)).unwrap_err();
        assert!(matches!(err, ClassifyError::Malformed(_)));
    }

    #[test]
    fn structured_message_fields() {
        let msg = message(
            r#"{"id":"m-9","content":"Pick one","role":"assistant","type":"show_rating_ui",
                "buttons":[{"label":"Yes","action":"confirm","value":"yes","resolution_id":"r1"}],
                "agent_id":"agent-7","created_at":5,"priority":"high"}"#,
        );
        assert_eq!(msg.id, "m-9");
        assert_eq!(msg.content, "Pick one");
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.kind, Some(MessageKind::ShowRatingUi));
        assert_eq!(msg.agent_id.as_deref(), Some("agent-7"));
        assert_eq!(msg.created_at, 1_700_000_000_000);
        assert_eq!(msg.buttons.as_ref().map(Vec::len), Some(1));
        assert_eq!(msg.extra.get("priority"), Some(&Value::from("high")));
        assert!(!msg.extra.contains_key("created_at"));
    }

    #[test]
    fn content_falls_back_to_message_field() {
        assert_eq!(message(r#"{"message":"from message"}"#).content, "from message");
        assert_eq!(
            message(r#"{"content":"","message":"fallback"}"#).content,
            "fallback"
        );
    }

    #[test]
    fn missing_fields_yield_empty_agent_message() {
        let msg = message("{}");
        assert_eq!(msg.content, "");
        assert_eq!(msg.role, Role::Agent);
        assert_eq!(msg.id, "generated");

        let from_array = message("[1, 2, 3]");
        assert_eq!(from_array.content, "");
        assert_eq!(from_array.role, Role::Agent);
    }

    #[test]
    fn unknown_role_falls_back_to_agent() {
        assert_eq!(message(r#"{"content":"x","role":"robot"}"#).role, Role::Agent);
        assert_eq!(message(r#"{"content":"x","role":7}"#).role, Role::Agent);
    }

    #[test]
    fn numeric_id_is_stringified() {
        assert_eq!(message(r#"{"id":42,"content":"x"}"#).id, "42");
    }

    #[test]
    fn frame_chat_id_overrides_session() {
        assert_eq!(message(r#"{"content":"x","chat_id":"other"}"#).chat_id, "other");
    }

    #[test]
    fn malformed_buttons_are_dropped() {
        let msg = message(r#"{"content":"x","buttons":[{"label":"only"}]}"#);
        assert!(msg.buttons.is_none());
    }
}
