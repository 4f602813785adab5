use async_trait::async_trait;

use super::{ChatBackend, GatewayLink};
use crate::error::{ChatError, ChatResult};
use crate::gateway::{Connection, ConnectionId, GatewayHandle, ServerEvent};
use crate::models::{ChatRoom, Message, NewRoom, RoomFilter};
use crate::service::{ChatService, SendRequest};

#[async_trait]
impl ChatBackend for ChatService {
    async fn list_rooms(&self, filter: &RoomFilter) -> ChatResult<Vec<ChatRoom>> {
        ChatService::list_rooms(self, filter).await
    }

    async fn get_or_create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom> {
        ChatService::get_or_create_room(self, room).await
    }

    async fn history(&self, room_id: &str) -> ChatResult<Vec<Message>> {
        ChatService::history(self, room_id).await
    }

    async fn send(&self, request: SendRequest) -> ChatResult<Message> {
        ChatService::send(self, request).await
    }

    async fn mark_read(&self, room_id: &str) -> ChatResult<()> {
        ChatService::mark_read(self, room_id).await
    }

    async fn mark_all_read(&self, room_ids: &[String]) -> ChatResult<usize> {
        ChatService::mark_all_read(self, room_ids).await
    }

    async fn soft_delete_room(&self, room_id: &str) -> ChatResult<()> {
        ChatService::soft_delete_room(self, room_id).await
    }

    async fn upload_image(&self, bytes: Vec<u8>, content_type: &str) -> ChatResult<String> {
        ChatService::upload_image(self, bytes, content_type).await
    }
}

/// A gateway connection inside the server process.
pub struct LocalLink {
    gateway: GatewayHandle,
    conn: Option<Connection>,
}

impl LocalLink {
    pub fn new(gateway: GatewayHandle) -> Self {
        Self { gateway, conn: None }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(|c| c.id)
    }

    fn id(&self) -> ChatResult<ConnectionId> {
        self.connection_id()
            .ok_or_else(|| ChatError::Transport("not connected to the gateway".into()))
    }
}

#[async_trait]
impl GatewayLink for LocalLink {
    async fn connect(&mut self) -> ChatResult<()> {
        if self.conn.is_none() {
            self.conn = Some(self.gateway.connect().await?);
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.gateway.disconnect(conn.id);
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn join_room(&mut self, room_id: &str) -> ChatResult<()> {
        let id = self.id()?;
        self.gateway.join(id, room_id).await
    }

    async fn leave_room(&mut self) -> ChatResult<()> {
        let id = self.id()?;
        self.gateway.leave(id).await
    }

    async fn join_admin(&mut self) -> ChatResult<()> {
        let id = self.id()?;
        self.gateway.subscribe_admin(id).await
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        let conn = self.conn.as_mut()?;
        let event = conn.events.recv().await;
        if event.is_none() {
            tracing::debug!("gateway connection closed");
            self.conn = None;
        }
        event
    }
}
