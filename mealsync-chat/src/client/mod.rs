//! Client-side chat logic: the customer widget session, the owner console and
//! unread accounting, written against two seams so they run the same over
//! HTTP or in process.

use async_trait::async_trait;

use crate::error::ChatResult;
use crate::gateway::ServerEvent;
use crate::models::{ChatRoom, Message, NewRoom, RoomFilter};
use crate::service::SendRequest;

pub mod console;
pub mod http;
pub mod local;
pub mod session;
pub mod unread;

pub use console::OwnerConsole;
pub use http::HttpBackend;
pub use local::LocalLink;
pub use session::{ChatSession, SessionUpdate};
pub use unread::UnreadTracker;

/// Request/response side of the chat API.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Always a fresh listing; implementations must bypass any response cache.
    async fn list_rooms(&self, filter: &RoomFilter) -> ChatResult<Vec<ChatRoom>>;
    async fn get_or_create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom>;
    async fn history(&self, room_id: &str) -> ChatResult<Vec<Message>>;
    /// Persist and relay. The sender sees its own message through the relay.
    async fn send(&self, request: SendRequest) -> ChatResult<Message>;
    async fn mark_read(&self, room_id: &str) -> ChatResult<()>;
    async fn mark_all_read(&self, room_ids: &[String]) -> ChatResult<usize>;
    async fn soft_delete_room(&self, room_id: &str) -> ChatResult<()>;
    async fn upload_image(&self, bytes: Vec<u8>, content_type: &str) -> ChatResult<String>;
}

/// Realtime side: one gateway connection.
#[async_trait]
pub trait GatewayLink: Send {
    async fn connect(&mut self) -> ChatResult<()>;
    async fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    async fn join_room(&mut self, room_id: &str) -> ChatResult<()>;
    async fn leave_room(&mut self) -> ChatResult<()>;
    async fn join_admin(&mut self) -> ChatResult<()>;
    /// Next event addressed to this connection; `None` once it is gone.
    async fn next_event(&mut self) -> Option<ServerEvent>;
}
