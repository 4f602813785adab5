//! Send pipeline and room operations shared by HTTP routes, socket handlers
//! and in-process clients.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::gateway::{Delivery, GatewayHandle};
use crate::models::{normalize_email, ChatRoom, Message, NewMessage, NewRoom, RoomFilter, Sender};
use crate::protocol::MessagePayload;
use crate::store::{AppendMode, ChatStore};
use crate::uploads::ImageUpload;

/// Room identity a sender can attach so a missing room is created on first message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomContext {
    pub product_id: String,
    pub product_name: String,
    pub customer_name: String,
    pub customer_email: String,
    /// Falls back to the service's default restaurant when absent.
    pub restaurant_id: Option<String>,
}

impl From<&ChatRoom> for RoomContext {
    fn from(room: &ChatRoom) -> Self {
        Self {
            product_id: room.product_id.clone(),
            product_name: room.product_name.clone(),
            customer_name: room.customer_name.clone(),
            customer_email: room.customer_email.clone(),
            restaurant_id: Some(room.restaurant_id.clone()),
        }
    }
}

impl From<&NewRoom> for RoomContext {
    fn from(room: &NewRoom) -> Self {
        Self {
            product_id: room.product_id.clone(),
            product_name: room.product_name.clone(),
            customer_name: room.customer_name.clone(),
            customer_email: room.customer_email.clone(),
            restaurant_id: Some(room.restaurant_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub room_id: String,
    pub sender: Sender,
    pub content: Option<String>,
    pub attachment: Option<String>,
    /// Client idempotency key, echoed back in the relay.
    pub nonce: Option<Uuid>,
    pub context: Option<RoomContext>,
}

impl SendRequest {
    pub fn text(room_id: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            sender,
            content: Some(content.into()),
            attachment: None,
            nonce: None,
            context: None,
        }
    }

    pub fn with_context(mut self, context: RoomContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_nonce(mut self, nonce: Uuid) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Upsert when the sender supplied room identity, strict otherwise.
    pub fn mode(&self, default_restaurant_id: &str) -> AppendMode {
        let Some(ctx) = &self.context else {
            return AppendMode::Strict;
        };
        let restaurant_id = ctx
            .restaurant_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(default_restaurant_id);
        let customer_email = normalize_email(&ctx.customer_email);
        let customer_name = match ctx.customer_name.trim() {
            "" => customer_email.clone(),
            name => name.to_string(),
        };
        AppendMode::UpsertRoom(NewRoom {
            room_id: self.room_id.trim().to_string(),
            product_id: ctx.product_id.trim().to_string(),
            product_name: ctx.product_name.clone(),
            restaurant_id: restaurant_id.to_string(),
            customer_name,
            customer_email,
        })
    }

    pub fn new_message(&self) -> NewMessage {
        NewMessage {
            room_id: self.room_id.clone(),
            sender: self.sender,
            content: self.content.clone(),
            attachment: self.attachment.clone(),
            nonce: self.nonce,
        }
    }
}

/// Serializes append+publish per room so relay order matches persistence order.
#[derive(Default, Clone)]
struct RoomTurns {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RoomTurns {
    async fn acquire(&self, room_id: &str) -> RoomTurn {
        let lock = self.locks.entry(room_id.to_string()).or_default().clone();
        RoomTurn {
            guard: Some(lock.lock_owned().await),
            room_id: room_id.to_string(),
            locks: self.locks.clone(),
        }
    }
}

/// Held for one append+publish. Dropping it frees the room's entry once
/// nobody else holds or waits on it.
struct RoomTurn {
    guard: Option<OwnedMutexGuard<()>>,
    room_id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for RoomTurn {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.room_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    gateway: GatewayHandle,
    uploads: Arc<dyn ImageUpload>,
    default_restaurant_id: String,
    turns: RoomTurns,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        gateway: GatewayHandle,
        uploads: Arc<dyn ImageUpload>,
        default_restaurant_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            uploads,
            default_restaurant_id: default_restaurant_id.into(),
            turns: RoomTurns::default(),
        }
    }

    pub fn gateway(&self) -> &GatewayHandle {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn default_restaurant_id(&self) -> &str {
        &self.default_restaurant_id
    }

    /// Persist, then relay. Nothing is relayed unless the append committed.
    pub async fn send(&self, request: SendRequest) -> ChatResult<Message> {
        let mode = request.mode(&self.default_restaurant_id);
        let new_message = match request.new_message().normalized() {
            Ok(m) => m,
            Err(e) => return Err(self.rejected(&request.room_id, e)),
        };
        let room_id = new_message.room_id.clone();

        // Detached from the caller: a dropped request must not stop a
        // committed append short of its relay.
        let service = self.clone();
        let context = request.context;
        let pipeline = tokio::spawn(async move {
            let _turn = service.turns.acquire(&new_message.room_id).await;
            service.append_and_publish(new_message, mode, context).await
        });
        let result = match pipeline.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::from(e)),
        };

        match result {
            Ok((message, delivery)) => {
                counter!("chat_messages_sent_total", "sender" => message.sender.as_str()).increment(1);
                tracing::info!(
                    room_id = %message.room_id,
                    message_id = %message.message_id,
                    sender = %message.sender,
                    room_deliveries = delivery.room,
                    admin_deliveries = delivery.admin,
                    "message sent"
                );
                Ok(message)
            }
            Err(e) => Err(self.rejected(&room_id, e)),
        }
    }

    fn rejected(&self, room_id: &str, err: ChatError) -> ChatError {
        counter!("chat_send_failures_total", "reason" => err.reason()).increment(1);
        match &err {
            ChatError::Persistence(_) | ChatError::Transport(_) => {
                tracing::error!(room_id = %room_id, error = %err, "send failed")
            }
            _ => tracing::warn!(room_id = %room_id, error = %err, "send rejected"),
        }
        err
    }

    async fn append_and_publish(
        &self,
        new_message: NewMessage,
        mode: AppendMode,
        context: Option<RoomContext>,
    ) -> ChatResult<(Message, Delivery)> {
        let message = self.store.append(new_message, mode).await?;

        let context = match self.store.get_room(&message.room_id).await {
            Ok(room) => Some(RoomContext::from(&room)),
            Err(e) => {
                tracing::warn!(room_id = %message.room_id, error = %e, "room lookup for relay failed");
                context
            }
        };

        // The message is durable at this point; a dead gateway only costs the
        // live relay and clients recover it from history when they reconnect.
        let delivery = match self
            .gateway
            .publish(MessagePayload::new(&message, context.as_ref()))
            .await
        {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::error!(message_id = %message.message_id, error = %e, "relay failed after persist");
                Delivery::default()
            }
        };
        Ok((message, delivery))
    }

    pub async fn list_rooms(&self, filter: &RoomFilter) -> ChatResult<Vec<ChatRoom>> {
        self.store.list_rooms(filter).await
    }

    pub async fn get_room(&self, room_id: &str) -> ChatResult<ChatRoom> {
        self.store.get_room(room_id).await
    }

    pub async fn get_or_create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom> {
        let room = self.store.get_or_create_room(room).await?;
        tracing::debug!(room_id = %room.room_id, "room opened");
        Ok(room)
    }

    pub async fn history(&self, room_id: &str) -> ChatResult<Vec<Message>> {
        self.store.history(room_id).await
    }

    pub async fn mark_read(&self, room_id: &str) -> ChatResult<()> {
        self.store.mark_read(room_id).await
    }

    pub async fn mark_all_read(&self, room_ids: &[String]) -> ChatResult<usize> {
        let changed = self.store.mark_all_read(room_ids).await?;
        tracing::info!(rooms = room_ids.len(), changed, "rooms marked read");
        Ok(changed)
    }

    /// Mark every unread room matching `filter` read.
    pub async fn mark_all_read_matching(&self, filter: &RoomFilter) -> ChatResult<usize> {
        let unread: Vec<String> = self
            .store
            .list_rooms(filter)
            .await?
            .into_iter()
            .filter(|r| !r.is_read)
            .map(|r| r.room_id)
            .collect();
        if unread.is_empty() {
            return Ok(0);
        }
        self.mark_all_read(&unread).await
    }

    pub async fn soft_delete_room(&self, room_id: &str) -> ChatResult<()> {
        self.store.soft_delete_room(room_id).await?;
        tracing::info!(room_id = %room_id, "room deleted");
        Ok(())
    }

    pub async fn soft_delete_message(&self, message_id: Uuid) -> ChatResult<Message> {
        let message = self.store.soft_delete_message(message_id).await?;
        tracing::info!(message_id = %message_id, room_id = %message.room_id, "message deleted");
        Ok(message)
    }

    pub async fn unread_count(&self, filter: &RoomFilter) -> ChatResult<u64> {
        self.store.unread_count(filter).await
    }

    pub async fn upload_image(&self, bytes: Vec<u8>, content_type: &str) -> ChatResult<String> {
        self.uploads.store(bytes, content_type).await
    }
}
