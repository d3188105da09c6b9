use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unread message count per peer user id.
pub type UnreadCounts = BTreeMap<String, u64>;

/// A user as seen by the presence side channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Public profile returned by user lookups and token verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    /// Direct rooms carry no name.
    pub name: Option<String>,
    pub is_private: bool,
    pub is_direct: bool,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
}

/// Producer category of a message. `LlmResponse` is written by the assistant
/// integration like any other sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    #[default]
    Text,
    System,
    LlmResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::System => "SYSTEM",
            Self::LlmResponse => "LLM_RESPONSE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessageKind(pub String);

impl fmt::Display for UnknownMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type '{}'", self.0)
    }
}

impl std::error::Error for UnknownMessageKind {}

impl FromStr for MessageKind {
    type Err = UnknownMessageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(Self::Text),
            "SYSTEM" => Ok(Self::System),
            "LLM_RESPONSE" => Ok(Self::LlmResponse),
            other => Err(UnknownMessageKind(other.to_string())),
        }
    }
}

/// A message as handed to clients. `content` is always plaintext here;
/// the ciphertext form never leaves the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_username: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_wire_names() {
        assert_eq!(serde_json::to_string(&MessageKind::LlmResponse).unwrap(), "\"LLM_RESPONSE\"");
        assert_eq!("SYSTEM".parse::<MessageKind>().unwrap(), MessageKind::System);
        assert!("shout".parse::<MessageKind>().is_err());
    }

    #[test]
    fn message_serializes_type_field() {
        let msg = Message {
            id: "m1".into(),
            room_id: "r1".into(),
            sender_id: "u1".into(),
            sender_username: "alice".into(),
            kind: MessageKind::Text,
            content: "hi".into(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "TEXT");
        assert_eq!(value["roomId"], "r1");
    }
}
