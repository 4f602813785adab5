//! Room directory and message log.
//!
//! The realtime gateway never owns history: every message a client can see
//! went through [`MessageStore::append`] first.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ChatResult;
use crate::models::{ChatRoom, Message, NewMessage, NewRoom, RoomFilter};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// How `append` treats a room that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendMode {
    /// The room must already exist; unknown rooms fail with NotFound.
    Strict,
    /// Create the room (or resurrect a soft-deleted one) in the same unit of work.
    UpsertRoom(NewRoom),
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Non-deleted rooms, most recent activity first.
    async fn list_rooms(&self, filter: &RoomFilter) -> ChatResult<Vec<ChatRoom>>;

    async fn get_room(&self, room_id: &str) -> ChatResult<ChatRoom>;

    /// Idempotent upsert on `room_id`. Clears the soft-delete flag of an existing room.
    async fn get_or_create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom>;

    async fn mark_read(&self, room_id: &str) -> ChatResult<()>;

    /// Marks every listed room read, or none of them if any id is unknown.
    /// Returns how many rooms were unread before the call.
    async fn mark_all_read(&self, room_ids: &[String]) -> ChatResult<usize>;

    async fn soft_delete_room(&self, room_id: &str) -> ChatResult<()>;

    /// Number of non-deleted rooms with `is_read = false`.
    async fn unread_count(&self, filter: &RoomFilter) -> ChatResult<u64>;

    async fn health_check(&self) -> ChatResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and bump the room's `last_message_at`.
    ///
    /// Any accepted message clears the room's soft-delete flag; a customer
    /// message also marks the room unread.
    async fn append(&self, message: NewMessage, mode: AppendMode) -> ChatResult<Message>;

    /// Visible messages of a room, oldest first. Unknown rooms have no history.
    async fn history(&self, room_id: &str) -> ChatResult<Vec<Message>>;

    async fn soft_delete_message(&self, message_id: Uuid) -> ChatResult<Message>;
}

/// Both halves of the backing store, for `Arc<dyn ChatStore>`.
pub trait ChatStore: RoomDirectory + MessageStore {}

impl<T: RoomDirectory + MessageStore> ChatStore for T {}

/// Checks shared by every store before touching data.
pub(crate) fn prepare_append(message: NewMessage, mode: &AppendMode) -> ChatResult<NewMessage> {
    let message = message.normalized()?;
    if let AppendMode::UpsertRoom(room) = mode {
        room.validate()?;
        if room.room_id != message.room_id {
            return Err(crate::error::ChatError::validation(format!(
                "room identity '{}' does not match message room '{}'",
                room.room_id, message.room_id
            )));
        }
    }
    Ok(message)
}
