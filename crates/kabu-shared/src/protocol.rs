//! Wire protocol for the realtime relay.
//!
//! Events are JSON frames of the shape `{"event": "...", "data": {...}}`,
//! matching what the mobile clients emit over their socket connection.
//! The relay is a pure transport: it assigns ids and timestamps when
//! re-emitting a `sendMessage` as `newMessage`, and holds no history.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, UserId};

/// Events a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Registers the connection's user for presence tracking.
    #[serde(rename_all = "camelCase")]
    UserConnected { user_id: UserId },

    /// Joins the room for a chat channel.
    #[serde(rename_all = "camelCase")]
    JoinChat { chat_id: ChannelId },

    /// Asks the relay to fan a message out to the room. The relay re-emits
    /// it as [`ServerEvent::NewMessage`] with a server-assigned id and
    /// timestamp; the client-supplied timestamp is only its local echo.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        chat_id: ChannelId,
        text: String,
        sender_id: UserId,
        timestamp: i64,
    },

    /// Typing indicator, relayed to everyone in the room except the sender.
    #[serde(rename_all = "camelCase")]
    Typing {
        chat_id: ChannelId,
        user_id: UserId,
        is_typing: bool,
    },
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message broadcast to every room member, the sender included (the
    /// sender reconciles it against its optimistic local echo by id).
    #[serde(rename_all = "camelCase")]
    NewMessage {
        id: String,
        text: String,
        sender_id: UserId,
        /// Server-assigned timestamp, milliseconds since the Unix epoch.
        timestamp: i64,
        read: bool,
    },

    #[serde(rename_all = "camelCase")]
    UserTyping { user_id: UserId, is_typing: bool },
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_round_trip() {
        let event = ClientEvent::SendMessage {
            chat_id: ChannelId("ride_abc".to_string()),
            text: "on my way".to_string(),
            sender_id: UserId::new("u1"),
            timestamp: 1_700_000_000_000,
        };

        let json = event.to_json().unwrap();
        let restored = ClientEvent::from_json(&json).unwrap();

        assert_eq!(event, restored);
    }

    #[test]
    fn test_wire_shape_matches_clients() {
        let event = ClientEvent::Typing {
            chat_id: ChannelId("ride_abc".to_string()),
            user_id: UserId::new("u1"),
            is_typing: true,
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "typing");
        assert_eq!(value["data"]["chatId"], "ride_abc");
        assert_eq!(value["data"]["isTyping"], true);
    }

    #[test]
    fn test_new_message_shape() {
        let event = ServerEvent::NewMessage {
            id: "m1".to_string(),
            text: "hello".to_string(),
            sender_id: UserId::new("u2"),
            timestamp: 42,
            read: false,
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "newMessage");
        assert_eq!(value["data"]["senderId"], "u2");
        assert_eq!(value["data"]["read"], false);
    }
}
