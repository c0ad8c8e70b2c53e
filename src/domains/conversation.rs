use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParcelExchangeError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i32,
    pub parcel_id: Option<i32>,
    pub trip_id: Option<i32>,
    pub participants: Vec<i32>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Location,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Location => "location",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "location" => Ok(Self::Location),
            "system" => Ok(Self::System),
            other => Err(ParcelExchangeError::Validation(format!(
                "unknown message type '{other}'"
            ))),
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Text
    }
}

/// Delivery state of a stored message. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(ParcelExchangeError::Validation(format!(
                "unknown message status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i32,
    pub conversation_id: i32,
    pub sender_id: i32,
    pub content: String,
    pub message_type: MessageType,
    pub metadata: Option<Value>,
    pub status: MessageStatus,
    pub read_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i32,
    pub sender_id: i32,
    pub content: String,
    pub message_type: MessageType,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub parcel_id: Option<i32>,
    pub trip_id: Option<i32>,
    pub participants: Vec<i32>,
}
