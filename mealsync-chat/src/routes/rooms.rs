use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use mealsync_shared::errors::AppResult;
use mealsync_shared::types::ApiResponse;

use crate::models::{derive_room_id, normalize_email, ChatRoom, NewRoom, RoomFilter};
use crate::AppState;

// --- Request DTOs ---

/// Body of `POST /chats`. `roomId` defaults to the derived product/email id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub room_id: Option<String>,
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(alias = "userName")]
    pub customer_name: String,
    #[serde(alias = "email", alias = "userEmail")]
    pub customer_email: String,
    #[serde(default)]
    pub restaurant_id: Option<String>,
}

impl CreateRoomRequest {
    pub fn into_room(self, default_restaurant_id: &str) -> NewRoom {
        let room_id = self
            .room_id
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| derive_room_id(&self.product_id, &self.customer_email));
        NewRoom {
            room_id,
            product_id: self.product_id.trim().to_string(),
            product_name: self.product_name,
            restaurant_id: self
                .restaurant_id
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| default_restaurant_id.to_string()),
            customer_name: self.customer_name.trim().to_string(),
            customer_email: normalize_email(&self.customer_email),
        }
    }
}

impl From<&NewRoom> for CreateRoomRequest {
    fn from(room: &NewRoom) -> Self {
        Self {
            room_id: Some(room.room_id.clone()),
            product_id: room.product_id.clone(),
            product_name: room.product_name.clone(),
            customer_name: room.customer_name.clone(),
            customer_email: room.customer_email.clone(),
            restaurant_id: Some(room.restaurant_id.clone()),
        }
    }
}

/// Body of `POST /chats/read-all`. Without `roomIds`, every unread room
/// matching `restaurantId` is marked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAllRequest {
    #[serde(default)]
    pub room_ids: Option<Vec<String>>,
    #[serde(default)]
    pub restaurant_id: Option<String>,
}

// --- Response DTOs ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_rooms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadAllResponse {
    pub marked: usize,
}

// --- Handlers ---

/// Listings must never come from a cache: unread flags change on every message.
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<RoomFilter>,
) -> AppResult<impl IntoResponse> {
    let rooms = state.service.list_rooms(&filter).await?;
    Ok((
        [
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Json(ApiResponse::ok(rooms)),
    ))
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<Json<ApiResponse<ChatRoom>>> {
    let room = req.into_room(state.service.default_restaurant_id());
    let room = state.service.get_or_create_room(&room).await?;
    Ok(Json(ApiResponse::ok(room)))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<RoomFilter>,
) -> AppResult<Json<ApiResponse<UnreadCountResponse>>> {
    let unread_rooms = state.service.unread_count(&filter).await?;
    Ok(Json(ApiResponse::ok(UnreadCountResponse { unread_rooms })))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.service.mark_read(&room_id).await?;
    Ok(Json(ApiResponse::ok_with_message((), "room marked read")))
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReadAllRequest>,
) -> AppResult<Json<ApiResponse<ReadAllResponse>>> {
    let marked = match req.room_ids {
        Some(room_ids) => state.service.mark_all_read(&room_ids).await?,
        None => {
            let filter = RoomFilter {
                restaurant_id: req.restaurant_id,
                search: None,
            };
            state.service.mark_all_read_matching(&filter).await?
        }
    };
    Ok(Json(ApiResponse::ok(ReadAllResponse { marked })))
}

pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.service.soft_delete_room(&room_id).await?;
    Ok(Json(ApiResponse::ok_with_message((), "room deleted")))
}
