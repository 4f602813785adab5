use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use mealsync_shared::clients::minio::MinioClient;

use crate::error::{ChatError, ChatResult};

/// Largest accepted chat image.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// File extension for an accepted image content type.
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Reject images the chat does not accept, returning the object extension.
pub fn check_image(len: usize, content_type: &str) -> ChatResult<&'static str> {
    let ext = image_extension(content_type).ok_or_else(|| {
        ChatError::validation(format!(
            "unsupported image type '{content_type}', accepted: jpeg, png, webp, gif"
        ))
    })?;
    if len == 0 {
        return Err(ChatError::validation("image is empty"));
    }
    if len > MAX_IMAGE_BYTES {
        return Err(ChatError::validation(format!(
            "image is {len} bytes, limit is {MAX_IMAGE_BYTES}"
        )));
    }
    Ok(ext)
}

fn object_key(ext: &str) -> String {
    format!("chat/{}.{ext}", Uuid::now_v7())
}

/// Where chat images go. Returns the public URL stored as the message attachment.
#[async_trait]
pub trait ImageUpload: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> ChatResult<String>;
}

pub struct MinioUpload {
    client: MinioClient,
}

impl MinioUpload {
    pub fn new(client: MinioClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageUpload for MinioUpload {
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> ChatResult<String> {
        let ext = check_image(bytes.len(), content_type)?;
        let key = object_key(ext);
        let size = bytes.len();
        let url = self
            .client
            .upload(&key, bytes, content_type)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
        tracing::info!(key = %key, size, "chat image uploaded");
        Ok(url)
    }
}

/// Keeps images in process. For local development and tests.
#[derive(Default)]
pub struct MemoryUpload {
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryUpload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ImageUpload for MemoryUpload {
    async fn store(&self, bytes: Vec<u8>, content_type: &str) -> ChatResult<String> {
        let ext = check_image(bytes.len(), content_type)?;
        let key = object_key(ext);
        let url = format!("memory://{key}");
        self.objects
            .lock()
            .map_err(|_| ChatError::Persistence("upload store poisoned".into()))?
            .insert(key, (content_type.to_string(), bytes));
        Ok(url)
    }
}
