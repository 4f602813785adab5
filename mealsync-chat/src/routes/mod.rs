use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};

use mealsync_shared::middleware::metrics_middleware;

use crate::AppState;

pub mod health;
pub mod messages;
pub mod rooms;
pub mod uploads;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Rooms
        .route("/chats", get(rooms::list_rooms).post(rooms::create_room))
        .route("/chats/unread-count", get(rooms::unread_count))
        .route("/chats/read-all", post(rooms::mark_all_read))
        .route("/chats/:room_id", delete(rooms::delete_room))
        .route("/chats/:room_id/read", put(rooms::mark_read))
        // Messages
        .route("/chats/:room_id/messages", get(messages::history).post(messages::send_message))
        .route("/messages/:message_id", delete(messages::delete_message))
        // Image attachments
        .route(
            "/uploads",
            post(uploads::upload_image).layer(DefaultBodyLimit::max(uploads::BODY_LIMIT)),
        )
        .route_layer(middleware::from_fn(metrics_middleware))
        .with_state(state)
}
