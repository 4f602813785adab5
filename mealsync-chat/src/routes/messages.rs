use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use mealsync_shared::errors::AppResult;
use mealsync_shared::types::ApiResponse;

use crate::models::Message;
use crate::protocol::SendMessagePayload;
use crate::service::SendRequest;
use crate::AppState;

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Message>>>> {
    let messages = state.service.history(&room_id).await?;
    Ok(Json(ApiResponse::ok(messages)))
}

/// Same pipeline as the `sendMessage` socket event: persist, then relay.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(mut body): Json<SendMessagePayload>,
) -> AppResult<(StatusCode, Json<ApiResponse<Message>>)> {
    body.room_id = room_id;
    let message = state.service.send(SendRequest::from(body)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Message>>> {
    let message = state.service.soft_delete_message(message_id).await?;
    Ok(Json(ApiResponse::ok(message)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::gateway::ServerEvent;
    use crate::routes::test_support::{app, call, empty, json};

    #[tokio::test]
    async fn customer_post_creates_room_and_relays() {
        let (app, state) = app();
        let mut conn = state.service.gateway().connect().await.unwrap();
        state.service.gateway().subscribe_admin(conn.id).await.unwrap();

        let body = json!({
            "sender": "customer",
            "content": "Is this in stock?",
            "productId": "p1",
            "productName": "Burger",
            "userName": "Ann",
            "email": "a@x.com"
        });
        let (status, value) = call(&app, json("POST", "/chats/p1-a@x.com/messages", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value["data"]["content"], "Is this in stock?");
        assert_eq!(value["data"]["kind"], "text");

        let ServerEvent::NewMessageNotification(payload) = conn.events.recv().await.unwrap() else {
            panic!("expected admin notification");
        };
        assert_eq!(payload.room_id, "p1-a@x.com");
        assert_eq!(payload.user_name.as_deref(), Some("Ann"));

        let (_, value) = call(&app, empty("GET", "/chats/p1-a@x.com/messages")).await;
        assert_eq!(value["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn owner_post_to_unknown_room_is_not_found() {
        let (app, _) = app();
        let body = json!({ "sender": "owner", "content": "Yes!" });
        let (status, value) = call(&app, json("POST", "/chats/ghost/messages", body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["error"]["code"], "E4001");
    }

    #[tokio::test]
    async fn empty_message_is_a_bad_request() {
        let (app, _) = app();
        let body = json!({ "sender": "customer", "content": "  ", "productId": "p1", "email": "a@x.com" });
        let (status, value) = call(&app, json("POST", "/chats/p1-a@x.com/messages", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "E0002");
    }

    #[tokio::test]
    async fn unknown_room_has_empty_history() {
        let (app, _) = app();
        let (status, value) = call(&app, empty("GET", "/chats/ghost/messages")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"], json!([]));
    }

    #[tokio::test]
    async fn deleted_message_leaves_history() {
        let (app, _) = app();
        let body = json!({ "sender": "customer", "content": "oops", "productId": "p1", "email": "a@x.com" });
        let (_, value) = call(&app, json("POST", "/chats/p1-a@x.com/messages", body)).await;
        let id = value["data"]["message_id"].as_str().unwrap().to_string();

        let (status, value) = call(&app, empty("DELETE", &format!("/messages/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"]["is_deleted"], true);

        let (_, value) = call(&app, empty("GET", "/chats/p1-a@x.com/messages")).await;
        assert_eq!(value["data"], json!([]));

        let missing = uuid::Uuid::now_v7();
        let (status, value) = call(&app, empty("DELETE", &format!("/messages/{missing}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["error"]["code"], "E4003");
    }
}
