use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{prepare_append, AppendMode, MessageStore, RoomDirectory};
use crate::error::{ChatError, ChatResult};
use crate::models::{ChatRoom, Message, NewMessage, NewRoom, RoomFilter, Sender};

/// In-process store used for local development and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, ChatRoom>,
    messages: Vec<Message>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Server timestamp, strictly after the previous one.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn upsert_room(&mut self, room: &NewRoom) -> ChatRoom {
        let created_at = self.stamp();
        let entry = self
            .rooms
            .entry(room.room_id.clone())
            .or_insert_with(|| ChatRoom {
                room_id: room.room_id.clone(),
                product_id: room.product_id.clone(),
                product_name: room.product_name.clone(),
                restaurant_id: room.restaurant_id.clone(),
                customer_name: room.customer_name.clone(),
                customer_email: room.customer_email.clone(),
                is_read: false,
                is_deleted: false,
                last_message_at: None,
                created_at,
            });
        entry.is_deleted = false;
        entry.clone()
    }

    fn room_mut(&mut self, room_id: &str) -> ChatResult<&mut ChatRoom> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::room_not_found(room_id))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ChatResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| ChatError::Persistence("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl RoomDirectory for MemoryStore {
    async fn list_rooms(&self, filter: &RoomFilter) -> ChatResult<Vec<ChatRoom>> {
        let inner = self.lock()?;
        let mut rooms: Vec<ChatRoom> = inner
            .rooms
            .values()
            .filter(|r| !r.is_deleted && filter.matches(r))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
        Ok(rooms)
    }

    async fn get_room(&self, room_id: &str) -> ChatResult<ChatRoom> {
        let inner = self.lock()?;
        inner
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| ChatError::room_not_found(room_id))
    }

    async fn get_or_create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom> {
        room.validate()?;
        let mut inner = self.lock()?;
        Ok(inner.upsert_room(room))
    }

    async fn mark_read(&self, room_id: &str) -> ChatResult<()> {
        let mut inner = self.lock()?;
        inner.room_mut(room_id)?.is_read = true;
        Ok(())
    }

    async fn mark_all_read(&self, room_ids: &[String]) -> ChatResult<usize> {
        let mut inner = self.lock()?;
        if let Some(missing) = room_ids.iter().find(|id| !inner.rooms.contains_key(*id)) {
            return Err(ChatError::room_not_found(missing.clone()));
        }
        let ids: HashSet<&String> = room_ids.iter().collect();
        let mut changed = 0;
        for id in ids {
            let room = inner.room_mut(id)?;
            if !room.is_read {
                room.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn soft_delete_room(&self, room_id: &str) -> ChatResult<()> {
        let mut inner = self.lock()?;
        inner.room_mut(room_id)?.is_deleted = true;
        Ok(())
    }

    async fn unread_count(&self, filter: &RoomFilter) -> ChatResult<u64> {
        let inner = self.lock()?;
        let count = inner
            .rooms
            .values()
            .filter(|r| !r.is_deleted && !r.is_read && filter.matches(r))
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage, mode: AppendMode) -> ChatResult<Message> {
        let message = prepare_append(message, &mode)?;
        let mut inner = self.lock()?;

        match &mode {
            AppendMode::Strict => {
                inner.room_mut(&message.room_id)?;
            }
            AppendMode::UpsertRoom(room) => {
                inner.upsert_room(room);
            }
        }

        let created_at = inner.stamp();
        let sender = message.sender;
        let message = message.into_message(created_at);

        let room = inner.room_mut(&message.room_id)?;
        room.last_message_at = Some(created_at);
        room.is_deleted = false;
        if sender == Sender::Customer {
            room.is_read = false;
        }

        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn history(&self, room_id: &str) -> ChatResult<Vec<Message>> {
        let inner = self.lock()?;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.room_id == room_id && !m.is_deleted)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> ChatResult<Message> {
        let mut inner = self.lock()?;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        message.is_deleted = true;
        Ok(message.clone())
    }
}
