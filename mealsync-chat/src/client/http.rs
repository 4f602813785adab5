use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;

use mealsync_shared::types::{ApiEnvelope, ApiErrorResponse};

use super::ChatBackend;
use crate::error::{ChatError, ChatResult, Missing};
use crate::models::{ChatRoom, Message, NewRoom, RoomFilter};
use crate::protocol::SendMessagePayload;
use crate::routes::rooms::{CreateRoomRequest, ReadAllRequest, ReadAllResponse};
use crate::routes::uploads::UploadResponse;
use crate::service::SendRequest;
use crate::uploads::check_image;

/// Chat API over HTTP, for clients outside the server process.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> ChatResult<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> ChatResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| ChatError::validation(format!("invalid chat api url '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ChatError::validation(format!("chat api url '{base_url}' cannot be a base")));
        }
        Ok(Self { client, base })
    }

    /// `base` + path segments, each percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read<T: DeserializeOwned>(response: Response, missing: Option<Missing>) -> ChatResult<T> {
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        match serde_json::from_slice::<ApiEnvelope<T>>(&body) {
            Ok(ApiEnvelope::Ok(ok)) => Ok(ok.data),
            Ok(ApiEnvelope::Err(err)) => Err(api_error(err, missing)),
            Err(e) => Err(ChatError::Transport(format!(
                "unexpected response ({status}): {e}"
            ))),
        }
    }
}

fn transport(err: reqwest::Error) -> ChatError {
    ChatError::Transport(err.to_string())
}

/// What the server reported missing, read from the error details.
fn missing_from_details(code: &str, details: Option<&serde_json::Value>) -> Option<Missing> {
    let details = details?;
    match code {
        "E4001" => details["room_id"].as_str().map(|id| Missing::Room(id.to_string())),
        "E4003" => details["message_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .map(Missing::Message),
        _ => None,
    }
}

fn api_error(err: ApiErrorResponse, missing: Option<Missing>) -> ChatError {
    let code = err.error.code;
    let message = err.error.message;
    let missing = missing_from_details(&code, err.error.details.as_ref()).or(missing);
    match (code.as_str(), missing) {
        ("E4001" | "E4003" | "E0003", Some(missing)) => ChatError::NotFound(missing),
        ("E0002" | "E0008" | "E0009" | "E4005" | "E8001", _) => ChatError::Validation(message),
        ("E0007" | "E8002", _) => ChatError::Persistence(message),
        (code, _) => ChatError::Transport(format!("{code}: {message}")),
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_rooms(&self, filter: &RoomFilter) -> ChatResult<Vec<ChatRoom>> {
        let response = self
            .client
            .get(self.url(&["chats"]))
            .query(filter)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(transport)?;
        Self::read(response, None).await
    }

    async fn get_or_create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom> {
        room.validate()?;
        let response = self
            .client
            .post(self.url(&["chats"]))
            .json(&CreateRoomRequest::from(room))
            .send()
            .await
            .map_err(transport)?;
        Self::read(response, None).await
    }

    async fn history(&self, room_id: &str) -> ChatResult<Vec<Message>> {
        let response = self
            .client
            .get(self.url(&["chats", room_id, "messages"]))
            .send()
            .await
            .map_err(transport)?;
        Self::read(response, Some(Missing::Room(room_id.to_string()))).await
    }

    async fn send(&self, request: SendRequest) -> ChatResult<Message> {
        let room_id = request.room_id.clone();
        let response = self
            .client
            .post(self.url(&["chats", &room_id, "messages"]))
            .json(&SendMessagePayload::from(request))
            .send()
            .await
            .map_err(transport)?;
        Self::read(response, Some(Missing::Room(room_id))).await
    }

    async fn mark_read(&self, room_id: &str) -> ChatResult<()> {
        let response = self
            .client
            .put(self.url(&["chats", room_id, "read"]))
            .send()
            .await
            .map_err(transport)?;
        Self::read(response, Some(Missing::Room(room_id.to_string()))).await
    }

    async fn mark_all_read(&self, room_ids: &[String]) -> ChatResult<usize> {
        let body = ReadAllRequest {
            room_ids: Some(room_ids.to_vec()),
            restaurant_id: None,
        };
        let response = self
            .client
            .post(self.url(&["chats", "read-all"]))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let marked: ReadAllResponse = Self::read(response, None).await?;
        Ok(marked.marked)
    }

    async fn soft_delete_room(&self, room_id: &str) -> ChatResult<()> {
        let response = self
            .client
            .delete(self.url(&["chats", room_id]))
            .send()
            .await
            .map_err(transport)?;
        Self::read(response, Some(Missing::Room(room_id.to_string()))).await
    }

    async fn upload_image(&self, bytes: Vec<u8>, content_type: &str) -> ChatResult<String> {
        let ext = check_image(bytes.len(), content_type)?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(format!("image.{ext}"))
            .mime_str(content_type)
            .map_err(|e| ChatError::validation(format!("bad content type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(&["uploads"]))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let uploaded: UploadResponse = Self::read(response, None).await?;
        Ok(uploaded.url)
    }
}
