//! Frames exchanged over the realtime socket.
//!
//! Both directions use `{"event": "<name>", "data": {...}}` JSON text frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domains::conversation::{Message, MessageType};
use crate::domains::notification::Notification;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendMessagePayload {
    #[serde(alias = "conversationId")]
    pub conversation_id: i32,
    pub content: String,
    #[serde(default, alias = "messageType")]
    pub message_type: MessageType,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Payload of events that carry no fields. Accepts `{}` and ignores any keys.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation {
        #[serde(alias = "conversationId")]
        conversation_id: i32,
    },
    LeaveConversation {
        #[serde(alias = "conversationId")]
        conversation_id: i32,
    },
    SendMessage(SendMessagePayload),
    TypingStart {
        #[serde(alias = "conversationId")]
        conversation_id: i32,
    },
    TypingStop {
        #[serde(alias = "conversationId")]
        conversation_id: i32,
    },
    /// `data` may be omitted, null or an empty object.
    GetUnreadNotifications(Option<EmptyPayload>),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinConversation { .. } => "join_conversation",
            Self::LeaveConversation { .. } => "leave_conversation",
            Self::SendMessage(_) => "send_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::GetUnreadNotifications(_) => "get_unread_notifications",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        user_id: i32,
        connection_id: u64,
    },
    JoinedConversation {
        conversation_id: i32,
        marked_read: usize,
    },
    LeftConversation {
        conversation_id: i32,
    },
    NewMessage(Message),
    MessagesRead {
        conversation_id: i32,
        reader_id: i32,
        count: usize,
        read_at: i64,
    },
    UserTyping {
        conversation_id: i32,
        user_id: i32,
        name: String,
        typing: bool,
    },
    Notification {
        kind: String,
        title: String,
        body: String,
        data: Option<Value>,
    },
    UnreadNotifications {
        notifications: Vec<Notification>,
    },
    Error {
        code: String,
        message: String,
        event: Option<String>,
    },
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"error","data":{"code":"internal","message":"unserializable event","event":null}}"#
                .to_string()
        })
    }
}
