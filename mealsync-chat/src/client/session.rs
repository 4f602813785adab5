use std::collections::HashSet;

use uuid::Uuid;

use super::{ChatBackend, GatewayLink};
use crate::error::{ChatError, ChatResult};
use crate::gateway::ServerEvent;
use crate::models::{ChatRoom, Message, NewRoom, Sender};
use crate::protocol::MessagePayload;
use crate::service::{RoomContext, SendRequest};
use crate::uploads::check_image;

/// What handling one gateway event did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A relayed message for the open room, now at the end of the buffer.
    Appended(Message),
    /// A relay already in the buffer (history overlap or redelivery).
    Duplicate(Uuid),
    /// Admin broadcast about any room.
    Notification(MessagePayload),
    /// Relay for a room other than the open one.
    Elsewhere(MessagePayload),
}

/// One participant's view of one room at a time.
///
/// The buffer only grows from relays, so both sides of a conversation see
/// the same messages in the same order. Sends carry a nonce; a send stays
/// pending until its relay comes back.
pub struct ChatSession<B, L> {
    backend: B,
    link: L,
    role: Sender,
    room: Option<ChatRoom>,
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
    pending: HashSet<Uuid>,
    admin: bool,
}

impl<B: ChatBackend, L: GatewayLink> ChatSession<B, L> {
    pub fn new(backend: B, link: L, role: Sender) -> Self {
        Self {
            backend,
            link,
            role,
            room: None,
            messages: Vec::new(),
            seen: HashSet::new(),
            pending: HashSet::new(),
            admin: false,
        }
    }

    pub fn role(&self) -> Sender {
        self.role
    }

    pub fn room(&self) -> Option<&ChatRoom> {
        self.room.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Sends accepted by the backend whose relay has not arrived yet.
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    async fn ensure_connected(&mut self) -> ChatResult<()> {
        if !self.link.is_connected() {
            self.link.connect().await?;
            if self.admin {
                self.link.join_admin().await?;
            }
        }
        Ok(())
    }

    /// Receive notifications for every room on this connection.
    pub async fn subscribe_admin(&mut self) -> ChatResult<()> {
        self.admin = true;
        if self.link.is_connected() {
            self.link.join_admin().await
        } else {
            self.ensure_connected().await
        }
    }

    /// Customer entry point: create the room on first use, then open it.
    pub async fn open_for_customer(&mut self, room: &NewRoom) -> ChatResult<&[Message]> {
        room.validate()?;
        let room = self.backend.get_or_create_room(room).await?;
        self.open(room).await
    }

    /// Join the room, then load its history.
    ///
    /// Joining first means nothing sent in between is missed; relays that
    /// overlap the history are dropped as duplicates.
    pub async fn open(&mut self, room: ChatRoom) -> ChatResult<&[Message]> {
        self.ensure_connected().await?;
        self.link.join_room(&room.room_id).await?;
        let history = self.backend.history(&room.room_id).await?;
        tracing::debug!(room_id = %room.room_id, messages = history.len(), "room opened");
        self.replace(room, history);
        Ok(&self.messages)
    }

    pub async fn close(&mut self) -> ChatResult<()> {
        if self.room.take().is_some() && self.link.is_connected() {
            self.link.leave_room().await?;
        }
        self.messages.clear();
        self.seen.clear();
        self.pending.clear();
        Ok(())
    }

    fn replace(&mut self, room: ChatRoom, history: Vec<Message>) {
        self.seen = history.iter().map(|m| m.message_id).collect();
        let confirmed: HashSet<Uuid> = history.iter().filter_map(|m| m.nonce).collect();
        self.pending.retain(|nonce| !confirmed.contains(nonce));
        self.messages = history;
        self.room = Some(room);
    }

    pub async fn send(&mut self, content: &str) -> ChatResult<Message> {
        self.send_parts(Some(content.to_string()), None).await
    }

    /// Upload an image and send it as an attachment.
    pub async fn send_image(
        &mut self,
        bytes: Vec<u8>,
        content_type: &str,
        caption: Option<&str>,
    ) -> ChatResult<Message> {
        if self.room.is_none() {
            return Err(ChatError::validation("no room is open"));
        }
        check_image(bytes.len(), content_type)?;
        let url = self.backend.upload_image(bytes, content_type).await?;
        self.send_parts(caption.map(str::to_string), Some(url)).await
    }

    async fn send_parts(&mut self, content: Option<String>, attachment: Option<String>) -> ChatResult<Message> {
        let room = self
            .room
            .as_ref()
            .ok_or_else(|| ChatError::validation("no room is open"))?;

        let nonce = Uuid::new_v4();
        let mut request = SendRequest {
            room_id: room.room_id.clone(),
            sender: self.role,
            content,
            attachment,
            nonce: Some(nonce),
            context: None,
        };
        if self.role == Sender::Customer {
            request.context = Some(RoomContext::from(room));
        }

        // Nothing leaves the client for a message the server would reject.
        request.new_message().normalized()?;

        self.pending.insert(nonce);
        match self.backend.send(request).await {
            Ok(message) => Ok(message),
            Err(e) => {
                self.pending.remove(&nonce);
                tracing::warn!(error = %e, "send failed");
                Err(e)
            }
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent) -> SessionUpdate {
        match event {
            ServerEvent::NewMessageNotification(payload) => SessionUpdate::Notification(payload),
            ServerEvent::ReceiveMessage(payload) => {
                let open = self.room.as_ref().map(|r| r.room_id.as_str());
                if open != Some(payload.room_id.as_str()) {
                    return SessionUpdate::Elsewhere(payload);
                }
                let duplicate_nonce = payload
                    .nonce
                    .is_some_and(|n| self.messages.iter().any(|m| m.nonce == Some(n)));
                if self.seen.contains(&payload.message_id) || duplicate_nonce {
                    return SessionUpdate::Duplicate(payload.message_id);
                }
                if let Some(nonce) = payload.nonce {
                    self.pending.remove(&nonce);
                }
                let message = payload.into_message();
                self.seen.insert(message.message_id);
                self.messages.push(message.clone());
                SessionUpdate::Appended(message)
            }
        }
    }

    /// Wait for the next gateway event and apply it.
    pub async fn next_update(&mut self) -> ChatResult<SessionUpdate> {
        match self.link.next_event().await {
            Some(event) => Ok(self.handle_event(event)),
            None => Err(ChatError::Transport("gateway connection lost".into())),
        }
    }

    /// Re-establish the gateway connection after a drop.
    ///
    /// Rejoins the open room and the admin channel and replaces the buffer
    /// with fresh history. Returns how many pending sends never showed up in
    /// it; those were not persisted and are dropped.
    pub async fn reconnect(&mut self) -> ChatResult<usize> {
        self.link.disconnect().await;
        self.ensure_connected().await?;

        // The room stays open through failures so a later reconnect can retry.
        let Some(room) = self.room.clone() else {
            return Ok(std::mem::take(&mut self.pending).len());
        };
        self.link.join_room(&room.room_id).await?;
        let history = self.backend.history(&room.room_id).await?;
        self.replace(room, history);

        let dropped = std::mem::take(&mut self.pending).len();
        tracing::info!(
            room_id = ?self.room.as_ref().map(|r| &r.room_id),
            messages = self.messages.len(),
            dropped,
            "session reconnected"
        );
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::client::LocalLink;
    use crate::gateway::GatewayHandle;
    use crate::models::NewMessage;
    use crate::service::ChatService;
    use crate::store::MemoryStore;
    use crate::uploads::MemoryUpload;

    fn service() -> ChatService {
        ChatService::new(
            Arc::new(MemoryStore::new()),
            GatewayHandle::spawn(),
            Arc::new(MemoryUpload::new()),
            "rest-1",
        )
    }

    fn session(service: &ChatService, role: Sender) -> ChatSession<ChatService, LocalLink> {
        ChatSession::new(service.clone(), LocalLink::new(service.gateway().clone()), role)
    }

    fn burger() -> NewRoom {
        NewRoom::for_customer("p1", "Burger", "Ann", "a@x.com", "rest-1")
    }

    #[tokio::test]
    async fn own_message_arrives_once_through_relay() {
        let service = service();
        let mut customer = session(&service, Sender::Customer);
        customer.open_for_customer(&burger()).await.unwrap();

        let sent = customer.send("Is this in stock?").await.unwrap();
        assert!(customer.messages().is_empty());
        assert_eq!(customer.pending_sends(), 1);

        let update = customer.next_update().await.unwrap();
        assert_eq!(update, SessionUpdate::Appended(sent.clone()));
        assert_eq!(customer.messages(), &[sent.clone()]);
        assert_eq!(customer.pending_sends(), 0);

        let redelivered = ServerEvent::ReceiveMessage(MessagePayload::new(&sent, None));
        assert_eq!(customer.handle_event(redelivered), SessionUpdate::Duplicate(sent.message_id));
        assert_eq!(customer.messages().len(), 1);
    }

    #[tokio::test]
    async fn empty_send_never_reaches_backend() {
        let service = service();
        let mut customer = session(&service, Sender::Customer);
        customer.open_for_customer(&burger()).await.unwrap();

        assert!(matches!(customer.send("   ").await, Err(ChatError::Validation(_))));
        assert_eq!(customer.pending_sends(), 0);
        assert!(service.history("p1-a@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_without_open_room_fails() {
        let service = service();
        let mut owner = session(&service, Sender::Owner);
        assert!(matches!(owner.send("hi").await, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn relays_for_other_rooms_are_not_buffered() {
        let service = service();
        let mut customer = session(&service, Sender::Customer);
        customer.open_for_customer(&burger()).await.unwrap();

        let other = NewMessage::text("p2-a@x.com", Sender::Owner, "hello").into_message(chrono::Utc::now());
        let update = customer.handle_event(ServerEvent::ReceiveMessage(MessagePayload::new(&other, None)));
        assert!(matches!(update, SessionUpdate::Elsewhere(_)));
        assert!(customer.messages().is_empty());
    }

    #[tokio::test]
    async fn reconnect_rejoins_and_refetches() {
        let service = service();
        let mut customer = session(&service, Sender::Customer);
        customer.open_for_customer(&burger()).await.unwrap();

        let first = customer.send("first").await.unwrap();
        customer.next_update().await.unwrap();

        // server drops the connection
        let conn = customer.link().connection_id().unwrap();
        service.gateway().disconnect(conn);
        assert!(matches!(customer.next_update().await, Err(ChatError::Transport(_))));

        // owner replies while the customer is offline
        service
            .send(SendRequest::text("p1-a@x.com", Sender::Owner, "Yes!"))
            .await
            .unwrap();

        assert_eq!(customer.reconnect().await.unwrap(), 0);
        let contents: Vec<_> = customer.messages().iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, [Some("first".to_string()), Some("Yes!".to_string())]);
        assert_eq!(customer.messages()[0], first);

        // live relay works again after rejoin
        let reply = service
            .send(SendRequest::text("p1-a@x.com", Sender::Owner, "Anything else?"))
            .await
            .unwrap();
        assert_eq!(customer.next_update().await.unwrap(), SessionUpdate::Appended(reply));
    }

    /// Local link whose room joins fail while `failures` is above zero.
    struct FlakyLink {
        inner: LocalLink,
        failures: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GatewayLink for FlakyLink {
        async fn connect(&mut self) -> ChatResult<()> {
            self.inner.connect().await
        }
        async fn disconnect(&mut self) {
            self.inner.disconnect().await
        }
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
        async fn join_room(&mut self, room_id: &str) -> ChatResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(ChatError::Transport("join refused".into()));
            }
            self.inner.join_room(room_id).await
        }
        async fn leave_room(&mut self) -> ChatResult<()> {
            self.inner.leave_room().await
        }
        async fn join_admin(&mut self) -> ChatResult<()> {
            self.inner.join_admin().await
        }
        async fn next_event(&mut self) -> Option<ServerEvent> {
            self.inner.next_event().await
        }
    }

    #[tokio::test]
    async fn failed_rejoin_keeps_the_room_for_the_next_attempt() {
        let service = service();
        let failures = Arc::new(AtomicUsize::new(0));
        let link = FlakyLink {
            inner: LocalLink::new(service.gateway().clone()),
            failures: failures.clone(),
        };
        let mut customer = ChatSession::new(service.clone(), link, Sender::Customer);
        customer.open_for_customer(&burger()).await.unwrap();

        failures.store(1, Ordering::SeqCst);
        assert!(matches!(customer.reconnect().await, Err(ChatError::Transport(_))));
        assert_eq!(customer.room().unwrap().room_id, "p1-a@x.com");

        assert_eq!(customer.reconnect().await.unwrap(), 0);
        assert_eq!(customer.room().unwrap().room_id, "p1-a@x.com");

        let reply = service
            .send(SendRequest::text("p1-a@x.com", Sender::Owner, "Yes!"))
            .await
            .unwrap();
        assert_eq!(customer.next_update().await.unwrap(), SessionUpdate::Appended(reply));
    }

    #[tokio::test]
    async fn image_send_uploads_first() {
        let service = service();
        let mut customer = session(&service, Sender::Customer);
        customer.open_for_customer(&burger()).await.unwrap();

        let sent = customer.send_image(vec![1, 2, 3], "image/png", None).await.unwrap();
        assert_eq!(sent.kind, crate::models::MessageKind::Image);
        assert!(sent.attachment.unwrap().starts_with("memory://chat/"));
        assert!(customer.send_image(vec![1], "text/plain", None).await.is_err());
    }
}
