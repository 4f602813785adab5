use super::session::{ChatSession, SessionUpdate};
use super::unread::UnreadTracker;
use super::{ChatBackend, GatewayLink};
use crate::error::{ChatError, ChatResult};
use crate::models::{ChatRoom, Message, RoomFilter, Sender};
use crate::protocol::MessagePayload;

/// Restaurant owner's chat dashboard: room list, unread badge and one open room.
pub struct OwnerConsole<B, L> {
    session: ChatSession<B, L>,
    tracker: UnreadTracker,
    rooms: Vec<ChatRoom>,
    filter: RoomFilter,
}

impl<B: ChatBackend, L: GatewayLink> OwnerConsole<B, L> {
    /// Subscribe to admin notifications and load the room list.
    pub async fn start(backend: B, link: L, filter: RoomFilter) -> ChatResult<Self> {
        let mut session = ChatSession::new(backend, link, Sender::Owner);
        session.subscribe_admin().await?;
        let mut console = Self {
            session,
            tracker: UnreadTracker::new(),
            rooms: Vec::new(),
            filter,
        };
        console.refresh().await?;
        Ok(console)
    }

    pub fn rooms(&self) -> &[ChatRoom] {
        &self.rooms
    }

    pub fn unread_count(&self) -> usize {
        self.tracker.count()
    }

    pub fn is_unread(&self, room_id: &str) -> bool {
        self.tracker.is_unread(room_id)
    }

    pub fn session(&self) -> &ChatSession<B, L> {
        &self.session
    }

    pub fn messages(&self) -> &[Message] {
        self.session.messages()
    }

    /// Reload the listing from the backend, bypassing caches.
    pub async fn refresh(&mut self) -> ChatResult<()> {
        self.rooms = self.session.backend().list_rooms(&self.filter).await?;
        self.tracker.reconcile(&self.rooms);
        self.sync_flags();
        Ok(())
    }

    pub async fn search(&mut self, search: Option<String>) -> ChatResult<()> {
        self.filter.search = search;
        self.refresh().await
    }

    fn sync_flags(&mut self) {
        for room in &mut self.rooms {
            room.is_read = !self.tracker.is_unread(&room.room_id);
        }
    }

    /// Open a room: mark it read on the server, then load its history.
    pub async fn open_room(&mut self, room_id: &str) -> ChatResult<&[Message]> {
        let room = self
            .rooms
            .iter()
            .find(|r| r.room_id == room_id)
            .cloned()
            .ok_or_else(|| ChatError::room_not_found(room_id))?;

        if self.tracker.is_unread(room_id) {
            match self.session.backend().mark_read(room_id).await {
                Ok(()) => {
                    self.tracker.mark_read(room_id);
                }
                // The badge stays until the server agrees.
                Err(e) => tracing::warn!(room_id = %room_id, error = %e, "mark read failed"),
            }
        }
        self.tracker.set_open(Some(room_id));
        self.sync_flags();
        self.session.open(room).await
    }

    pub async fn close_room(&mut self) -> ChatResult<()> {
        self.tracker.set_open(None);
        self.session.close().await
    }

    pub async fn reply(&mut self, content: &str) -> ChatResult<Message> {
        self.session.send(content).await
    }

    pub async fn reply_with_image(&mut self, bytes: Vec<u8>, content_type: &str) -> ChatResult<Message> {
        self.session.send_image(bytes, content_type, None).await
    }

    /// Mark every unread room read. Local state only changes once the backend
    /// has committed the whole batch.
    pub async fn mark_all_read(&mut self) -> ChatResult<usize> {
        let room_ids = self.tracker.unread_rooms();
        if room_ids.is_empty() {
            return Ok(0);
        }
        let marked = self.session.backend().mark_all_read(&room_ids).await?;
        self.tracker.mark_all_read();
        self.sync_flags();
        Ok(marked)
    }

    pub async fn delete_room(&mut self, room_id: &str) -> ChatResult<()> {
        self.session.backend().soft_delete_room(room_id).await?;
        self.rooms.retain(|r| r.room_id != room_id);
        let was_open = self.tracker.open_room() == Some(room_id);
        self.tracker.remove(room_id);
        if was_open {
            self.session.close().await?;
        }
        Ok(())
    }

    /// Wait for the next gateway event and apply it to the session and the room list.
    pub async fn next_update(&mut self) -> ChatResult<SessionUpdate> {
        let update = self.session.next_update().await?;
        if let SessionUpdate::Notification(payload) = &update {
            self.on_notification(payload).await;
        }
        Ok(update)
    }

    async fn on_notification(&mut self, payload: &MessagePayload) {
        self.tracker.on_message(&payload.room_id, payload.sender);

        let room = match self.rooms.iter().position(|r| r.room_id == payload.room_id) {
            Some(i) => {
                let mut room = self.rooms.remove(i);
                room.last_message_at = Some(payload.time);
                room
            }
            None => {
                let restaurant_id = self.filter.restaurant_id.clone().unwrap_or_default();
                tracing::debug!(room_id = %payload.room_id, "notification for unlisted room");
                payload.to_room(&restaurant_id)
            }
        };
        self.rooms.insert(0, room);
        self.sync_flags();

        // The owner is looking at this room: keep the server flag read too.
        let open = self.tracker.open_room() == Some(payload.room_id.as_str());
        if open && payload.sender == Sender::Customer {
            if let Err(e) = self.session.backend().mark_read(&payload.room_id).await {
                tracing::warn!(room_id = %payload.room_id, error = %e, "mark read failed");
            }
        }
    }

    pub async fn reconnect(&mut self) -> ChatResult<usize> {
        let dropped = self.session.reconnect().await?;
        self.refresh().await?;
        Ok(dropped)
    }
}
