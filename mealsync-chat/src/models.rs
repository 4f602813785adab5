use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::schema::{chat_messages, chat_rooms};

// --- Sender ---

/// Who wrote a message. Older clients send `"user"` / `"restaurant"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    #[serde(alias = "user")]
    Customer,
    #[serde(alias = "restaurant")]
    Owner,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Customer => "customer",
            Sender::Owner => "owner",
        }
    }
}

impl FromStr for Sender {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" | "user" => Ok(Sender::Customer),
            "owner" | "restaurant" => Ok(Sender::Owner),
            other => Err(ChatError::validation(format!("unknown sender '{other}'"))),
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- MessageKind ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn for_attachment(attachment: Option<&str>) -> Self {
        match attachment {
            Some(_) => MessageKind::Image,
            None => MessageKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            other => Err(ChatError::Persistence(format!("unknown message kind '{other}'"))),
        }
    }
}

// --- Room identity ---

/// Deterministic room id for a (product, customer) pair: `"{product_id}-{email}"`.
pub fn derive_room_id(product_id: &str, customer_email: &str) -> String {
    format!("{}-{}", product_id.trim(), normalize_email(customer_email))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// --- ChatRoom ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = chat_rooms, primary_key(room_id))]
pub struct ChatRoom {
    pub room_id: String,
    pub product_id: String,
    pub product_name: String,
    pub restaurant_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub is_read: bool,
    pub is_deleted: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    /// Listing order key: most recent activity, or creation for never-messaged rooms.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// Identity a room is created with. Immutable once the room exists.
#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = chat_rooms)]
pub struct NewRoom {
    pub room_id: String,
    pub product_id: String,
    pub product_name: String,
    pub restaurant_id: String,
    pub customer_name: String,
    pub customer_email: String,
}

impl NewRoom {
    /// Room for a customer opening the chat widget on a product.
    pub fn for_customer(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        customer_name: impl Into<String>,
        customer_email: &str,
        restaurant_id: impl Into<String>,
    ) -> Self {
        let product_id = product_id.into();
        Self {
            room_id: derive_room_id(&product_id, customer_email),
            product_id,
            product_name: product_name.into(),
            restaurant_id: restaurant_id.into(),
            customer_name: customer_name.into(),
            customer_email: normalize_email(customer_email),
        }
    }

    pub fn validate(&self) -> ChatResult<()> {
        let required = [
            ("room_id", &self.room_id),
            ("product_id", &self.product_id),
            ("restaurant_id", &self.restaurant_id),
            ("customer_name", &self.customer_name),
            ("customer_email", &self.customer_email),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ChatError::validation(format!("{field} is required")));
            }
        }
        if !self.customer_email.contains('@') {
            return Err(ChatError::validation("customer_email is not an email address"));
        }
        Ok(())
    }
}

/// Listing filter. `search` matches customer name, email or product name, case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomFilter {
    pub restaurant_id: Option<String>,
    pub search: Option<String>,
}

impl RoomFilter {
    pub fn for_restaurant(restaurant_id: impl Into<String>) -> Self {
        Self {
            restaurant_id: Some(restaurant_id.into()),
            search: None,
        }
    }

    /// Search needle, lower-cased; blank searches are ignored.
    pub fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, room: &ChatRoom) -> bool {
        if let Some(restaurant_id) = &self.restaurant_id {
            if &room.restaurant_id != restaurant_id {
                return false;
            }
        }
        match self.needle() {
            Some(needle) => [&room.customer_name, &room.customer_email, &room.product_name]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle)),
            None => true,
        }
    }
}

// --- Message ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub room_id: String,
    pub sender: Sender,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub kind: MessageKind,
    /// Client idempotency key of the send that produced this message.
    pub nonce: Option<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = chat_messages)]
pub struct MessageRow {
    pub message_id: Uuid,
    pub room_id: String,
    pub sender: String,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub kind: String,
    pub nonce: Option<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = ChatError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let sender = row
            .sender
            .parse::<Sender>()
            .map_err(|_| ChatError::Persistence(format!("corrupt sender '{}'", row.sender)))?;
        Ok(Message {
            message_id: row.message_id,
            room_id: row.room_id,
            sender,
            content: row.content,
            attachment: row.attachment,
            kind: row.kind.parse()?,
            nonce: row.nonce,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewMessageRow<'a> {
    pub message_id: Uuid,
    pub room_id: &'a str,
    pub sender: &'static str,
    pub content: Option<&'a str>,
    pub attachment: Option<&'a str>,
    pub kind: &'static str,
    pub nonce: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Append input. Built by the send pipeline, validated before any store call.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub room_id: String,
    pub sender: Sender,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub nonce: Option<Uuid>,
}

impl NewMessage {
    pub fn text(room_id: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            sender,
            content: Some(content.into()),
            attachment: None,
            nonce: None,
        }
    }

    /// Trim the body, drop blank fields, and reject messages with nothing to show.
    pub fn normalized(mut self) -> ChatResult<Self> {
        self.room_id = self.room_id.trim().to_string();
        if self.room_id.is_empty() {
            return Err(ChatError::validation("room_id is required"));
        }
        self.content = self
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self.attachment = self
            .attachment
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        if self.content.is_none() && self.attachment.is_none() {
            return Err(ChatError::validation(
                "message must have content or an attachment",
            ));
        }
        Ok(self)
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::for_attachment(self.attachment.as_deref())
    }

    /// The persisted record for this input, stamped with server-side id and time.
    pub fn into_message(self, created_at: DateTime<Utc>) -> Message {
        let kind = self.kind();
        Message {
            message_id: Uuid::now_v7(),
            room_id: self.room_id,
            sender: self.sender,
            content: self.content,
            attachment: self.attachment,
            kind,
            nonce: self.nonce,
            is_deleted: false,
            created_at,
        }
    }
}
