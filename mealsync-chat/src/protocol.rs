//! Socket.IO event names and payload shapes.
//!
//! Payload fields are camelCase on the wire. Inbound payloads accept the
//! legacy `chatId`/`message` spellings still sent by older widgets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::{ChatRoom, Message, MessageKind, Sender};
use crate::service::{RoomContext, SendRequest};

pub mod events {
    // client -> server
    pub const JOIN_ROOM: &str = "joinRoom";
    pub const LEAVE_ROOM: &str = "leaveRoom";
    pub const JOIN_ADMIN_ROOM: &str = "joinAdminRoom";
    pub const SEND_MESSAGE: &str = "sendMessage";

    // server -> client
    pub const RECEIVE_MESSAGE: &str = "receiveMessage";
    pub const NEW_MESSAGE_NOTIFICATION: &str = "newMessageNotification";
    pub const ERROR: &str = "error";
}

/// A persisted message as relayed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message_id: Uuid,
    pub room_id: String,
    pub sender: Sender,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub kind: MessageKind,
    /// Server persistence time, never the client clock.
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Uuid>,
}

impl MessagePayload {
    /// Relay payload for `message`, carrying room identity so admin
    /// subscribers can render rooms they have never listed.
    pub fn new(message: &Message, room: Option<&RoomContext>) -> Self {
        Self {
            message_id: message.message_id,
            room_id: message.room_id.clone(),
            sender: message.sender,
            content: message.content.clone(),
            attachment: message.attachment.clone(),
            kind: message.kind,
            time: message.created_at,
            product_id: room.map(|r| r.product_id.clone()),
            product_name: room.map(|r| r.product_name.clone()),
            user_name: room.map(|r| r.customer_name.clone()),
            email: room.map(|r| r.customer_email.clone()),
            nonce: message.nonce,
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            message_id: self.message_id,
            room_id: self.room_id,
            sender: self.sender,
            content: self.content,
            attachment: self.attachment,
            kind: self.kind,
            nonce: self.nonce,
            is_deleted: false,
            created_at: self.time,
        }
    }

    /// Room entry for an admin console that has not listed this room yet.
    pub fn to_room(&self, restaurant_id: &str) -> ChatRoom {
        ChatRoom {
            room_id: self.room_id.clone(),
            product_id: self.product_id.clone().unwrap_or_default(),
            product_name: self.product_name.clone().unwrap_or_default(),
            restaurant_id: restaurant_id.to_string(),
            customer_name: self.user_name.clone().unwrap_or_default(),
            customer_email: self.email.clone().unwrap_or_default(),
            is_read: self.sender == Sender::Owner,
            is_deleted: false,
            last_message_at: Some(self.time),
            created_at: self.time,
        }
    }
}

/// `sendMessage` body, also the body of `POST /chats/:room_id/messages`
/// where the path supplies the room.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default, alias = "chatId")]
    pub room_id: String,
    pub sender: Sender,
    #[serde(default, alias = "message")]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment: Option<String>,
    /// Client clock. Accepted for compatibility, ignored.
    #[serde(default, skip_serializing)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub restaurant_id: Option<String>,
    #[serde(default)]
    pub nonce: Option<Uuid>,
}

impl From<SendMessagePayload> for SendRequest {
    fn from(p: SendMessagePayload) -> Self {
        let context = match (p.product_id, p.email) {
            (Some(product_id), Some(email)) => Some(RoomContext {
                product_id,
                product_name: p.product_name.unwrap_or_default(),
                customer_name: p.user_name.unwrap_or_default(),
                customer_email: email,
                restaurant_id: p.restaurant_id,
            }),
            _ => None,
        };
        SendRequest {
            room_id: p.room_id,
            sender: p.sender,
            content: p.content,
            attachment: p.attachment,
            nonce: p.nonce,
            context,
        }
    }
}

impl From<SendRequest> for SendMessagePayload {
    fn from(r: SendRequest) -> Self {
        let ctx = r.context;
        Self {
            room_id: r.room_id,
            sender: r.sender,
            content: r.content,
            attachment: r.attachment,
            time: None,
            product_id: ctx.as_ref().map(|c| c.product_id.clone()),
            product_name: ctx.as_ref().map(|c| c.product_name.clone()),
            user_name: ctx.as_ref().map(|c| c.customer_name.clone()),
            email: ctx.as_ref().map(|c| c.customer_email.clone()),
            restaurant_id: ctx.and_then(|c| c.restaurant_id),
            nonce: r.nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<&ChatError> for ErrorPayload {
    fn from(err: &ChatError) -> Self {
        let message = match err {
            ChatError::Persistence(_) => "message could not be saved".to_string(),
            ChatError::Transport(_) => "realtime gateway unavailable".to_string(),
            other => other.to_string(),
        };
        Self {
            code: err.reason().to_uppercase(),
            message,
        }
    }
}

/// Acknowledgement for `sendMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl SendAck {
    pub fn accepted(message: MessagePayload) -> Self {
        Self { ok: true, message: Some(message), error: None }
    }

    pub fn rejected(err: &ChatError) -> Self {
        Self { ok: false, message: None, error: Some(err.into()) }
    }
}
