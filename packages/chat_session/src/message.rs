//! Canonical message model shared by inbound and outbound traffic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who authored a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Agent,
    User,
    Assistant,
    System,
}

impl Role {
    /// Parse a wire role. Unknown roles are `None`; callers fall back to `Agent`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Role::Agent),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `type` tag of a frame. Open-ended: the server may introduce new kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    StoreChatId,
    RegistrationRequired,
    ShowRatingUi,
    RatingPrompt,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::StoreChatId => "store_chat_id",
            MessageKind::RegistrationRequired => "registration_required",
            MessageKind::ShowRatingUi => "show_rating_ui",
            MessageKind::RatingPrompt => "rating_prompt",
            MessageKind::Other(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "store_chat_id" => MessageKind::StoreChatId,
            "registration_required" => MessageKind::RegistrationRequired,
            "show_rating_ui" => MessageKind::ShowRatingUi,
            "rating_prompt" => MessageKind::RatingPrompt,
            _ => MessageKind::Other(s),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(s: &str) -> Self {
        MessageKind::from(s.to_string())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

/// An actionable button attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub label: String,
    pub action: String,
    pub value: String,
    pub resolution_id: String,
}

/// Normalized representation of any inbound or outbound chat event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub role: Role,
    /// Epoch milliseconds, assigned locally at receipt or send time.
    pub created_at: i64,
    pub chat_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<ActionButton>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Fields of a structured frame this model does not know about.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(
        id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        chat_id: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            role,
            created_at,
            chat_id: chat_id.into(),
            kind: None,
            buttons: None,
            agent_id: None,
            extra: Map::new(),
        }
    }

    pub fn is_outbound(&self) -> bool {
        self.role == Role::User
    }

    pub fn has_buttons(&self) -> bool {
        self.buttons.as_ref().is_some_and(|b| !b.is_empty())
    }
}

/// Answer to an action button, sent as a structured frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "resolution_response")]
pub struct ResolutionResponse {
    pub action: String,
    pub value: String,
    pub resolution_id: String,
}

impl ResolutionResponse {
    pub fn from_button(button: &ActionButton) -> Self {
        Self {
            action: button.action.clone(),
            value: button.value.clone(),
            resolution_id: button.resolution_id.clone(),
        }
    }
}

/// What a caller hands to `send`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(String),
    Resolution(ResolutionResponse),
}

impl OutboundPayload {
    /// The exact frame put on the wire.
    pub fn wire_text(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundPayload::Text(text) => Ok(text.clone()),
            OutboundPayload::Resolution(resolution) => serde_json::to_string(resolution),
        }
    }

    /// Content of the locally built canonical message.
    pub fn display_content(&self) -> String {
        match self {
            OutboundPayload::Text(text) => text.clone(),
            OutboundPayload::Resolution(resolution) => capitalize_first(&resolution.value),
        }
    }
}

impl From<String> for OutboundPayload {
    fn from(text: String) -> Self {
        OutboundPayload::Text(text)
    }
}

impl From<&str> for OutboundPayload {
    fn from(text: &str) -> Self {
        OutboundPayload::Text(text.to_string())
    }
}

impl From<ResolutionResponse> for OutboundPayload {
    fn from(resolution: ResolutionResponse) -> Self {
        OutboundPayload::Resolution(resolution)
    }
}

/// Uppercase the first character, leaving the rest untouched.
pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_and_display() {
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("bot"), None);
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::default(), Role::Agent);
    }

    #[test]
    fn message_kind_keeps_unknown_tags() {
        assert_eq!(MessageKind::from("store_chat_id"), MessageKind::StoreChatId);
        let custom = MessageKind::from("typing_indicator");
        assert_eq!(custom, MessageKind::Other("typing_indicator".into()));
        assert_eq!(String::from(custom), "typing_indicator");
        assert_eq!(
            serde_json::to_value(MessageKind::ShowRatingUi).unwrap(),
            "show_rating_ui"
        );
    }

    #[test]
    fn resolution_response_wire_shape() {
        let payload = OutboundPayload::Resolution(ResolutionResponse {
            action: "confirm".into(),
            value: "yes please".into(),
            resolution_id: "r-1".into(),
        });
        let wire: Value = serde_json::from_str(&payload.wire_text().unwrap()).unwrap();
        assert_eq!(wire["type"], "resolution_response");
        assert_eq!(wire["action"], "confirm");
        assert_eq!(wire["value"], "yes please");
        assert_eq!(wire["resolution_id"], "r-1");
        assert_eq!(payload.display_content(), "Yes please");
    }

    #[test]
    fn text_payload_is_sent_verbatim() {
        let payload = OutboundPayload::from("  hello ");
        assert_eq!(payload.wire_text().unwrap(), "  hello ");
        assert_eq!(payload.display_content(), "  hello ");
    }

    #[test]
    fn capitalize_first_handles_edges() {
        assert_eq!(capitalize_first(""), "");
        assert_eq!(capitalize_first("a"), "A");
        assert_eq!(capitalize_first("élan vital"), "Élan vital");
        assert_eq!(capitalize_first("Already"), "Already");
    }

    #[test]
    fn chat_message_serializes_kind_as_type() {
        let mut msg = ChatMessage::new("1", Role::Agent, "hi", "c", 0);
        msg.kind = Some(MessageKind::RegistrationRequired);
        msg.extra.insert("priority".into(), Value::from(3));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "registration_required");
        assert_eq!(json["priority"], 3);
        assert!(json.get("buttons").is_none());
    }
}
