//! Plain CRUD over the portal's published content. Unlike moderation there is no
//! workflow: validate, write, invalidate the list (and the dashboard counts).

pub mod dashboard;
pub mod events;
pub mod news;
pub mod photos;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info};

use crate::{
    attachment::AttachmentFile,
    cache::{CacheKey, ViewCache},
    compression::{CompressionOptions, compress},
    gateway::{GatewayError, ObjectStore, Order, Patch, RecordId, RowStore, decode_rows},
};

/// Upper bound for any content image before compression.
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ContentError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

pub type ContentResult<T> = Result<T, ContentError>;

/// Require at least `min` visible characters.
fn require_text(field: &'static str, value: &str, min: usize) -> ContentResult<String> {
    let trimmed = value.trim();
    if trimmed.chars().count() < min {
        return Err(ContentError::validation(
            field,
            format!("must be at least {min} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn require_image(field: &'static str, file: &AttachmentFile, max_bytes: u64) -> ContentResult<()> {
    if file.bytes.is_empty() {
        return Err(ContentError::validation(field, "file is empty"));
    }
    if !file.is_image() {
        return Err(ContentError::validation(field, "please select an image file"));
    }
    if file.size() > max_bytes {
        return Err(ContentError::validation(
            field,
            format!("file must be smaller than {} MB", max_bytes / (1024 * 1024)),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ContentService {
    rows: Arc<dyn RowStore>,
    objects: Arc<dyn ObjectStore>,
    cache: ViewCache,
    compression: CompressionOptions,
}

impl ContentService {
    pub fn new(
        rows: Arc<dyn RowStore>,
        objects: Arc<dyn ObjectStore>,
        cache: ViewCache,
        compression: CompressionOptions,
    ) -> Self {
        Self {
            rows,
            objects,
            cache,
            compression,
        }
    }

    async fn cached_list<T: DeserializeOwned>(
        &self,
        key: CacheKey,
        table: &'static str,
        order: Order,
    ) -> ContentResult<Vec<T>> {
        let rows = self
            .cache
            .get_or_load(key, || async {
                self.rows.select(table, order).await.map(Value::Array)
            })
            .await?;
        Ok(decode_rows(&rows)?)
    }

    async fn fetch<T: DeserializeOwned>(&self, table: &str, id: &RecordId) -> ContentResult<T> {
        let row = self.rows.select_one(table, id).await?;
        Ok(serde_json::from_value(row).map_err(GatewayError::from)?)
    }

    /// Insert when `id` is absent, otherwise upsert the row carrying it.
    async fn save<T: DeserializeOwned>(
        &self,
        table: &str,
        id: Option<&RecordId>,
        mut values: Patch,
        keys: &[CacheKey],
    ) -> ContentResult<T> {
        let row = match id {
            Some(id) => {
                let id = serde_json::to_value(id).map_err(GatewayError::from)?;
                values.insert("id".to_string(), id);
                self.rows.upsert(table, values).await
            }
            None => self.rows.insert(table, values).await,
        }
        .inspect_err(|err| error!(?err, table, "failed to save content row"))?;

        self.cache.invalidate(keys).await;
        info!(table, id = ?RecordId::of_row(&row), "content saved");
        Ok(serde_json::from_value(row).map_err(GatewayError::from)?)
    }

    async fn remove(&self, table: &str, id: &RecordId, keys: &[CacheKey]) -> ContentResult<()> {
        self.rows
            .delete(table, id)
            .await
            .inspect_err(|err| error!(?err, table, %id, "failed to delete content row"))?;
        self.cache.invalidate(keys).await;
        info!(table, %id, "content deleted");
        Ok(())
    }

    /// Upload an image to `bucket/path`, compressing it first, and return its public URL.
    async fn upload_image(
        &self,
        bucket: &str,
        path: impl FnOnce(&AttachmentFile) -> String,
        file: AttachmentFile,
    ) -> ContentResult<String> {
        let file = compress(file, self.compression).await.file;
        let path = path(&file);
        self.objects
            .upload(bucket, &path, file.bytes, &file.content_type)
            .await
            .inspect_err(|err| error!(?err, bucket, %path, "image upload failed"))?;
        Ok(self.objects.public_url(bucket, &path))
    }
}
