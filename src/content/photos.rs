use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::{ContentResult, ContentService, MAX_IMAGE_BYTES, optional_text, require_image};
use crate::{
    attachment::AttachmentFile,
    cache::CacheKey,
    gateway::{Order, RecordId, to_patch},
};

pub const PHOTOS_TABLE: &str = "photos";
pub const PHOTOS_BUCKET: &str = "photos";
const PHOTOS_PREFIX: &str = "photos";
const PHOTO_KEYS: &[CacheKey] = &[CacheKey::Photos, CacheKey::Dashboard];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: RecordId,
    pub image_url: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct NewPhoto {
    image_url: String,
    alt_text: Option<String>,
}

/// `photos/<unix-millis>_<random>.<ext>`
fn photo_path(file: &AttachmentFile, now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let extension = file.extension().unwrap_or_else(|| "jpg".to_string());
    format!(
        "{PHOTOS_PREFIX}/{}_{}.{extension}",
        now.timestamp_millis(),
        &token[..8]
    )
}

impl ContentService {
    pub async fn list_photos(&self) -> ContentResult<Vec<Photo>> {
        self.cached_list(CacheKey::Photos, PHOTOS_TABLE, Order::desc("created_at"))
            .await
    }

    pub async fn add_photo(&self, file: AttachmentFile, alt_text: Option<String>) -> ContentResult<Photo> {
        require_image("photo", &file, MAX_IMAGE_BYTES)?;
        let now = Utc::now();
        let image_url = self
            .upload_image(PHOTOS_BUCKET, |file| photo_path(file, now), file)
            .await?;
        let row = NewPhoto {
            image_url,
            alt_text: optional_text(alt_text),
        };
        self.save(PHOTOS_TABLE, None, to_patch(&row)?, PHOTO_KEYS).await
    }

    /// Remove the stored object first, best effort, then the row.
    pub async fn delete_photo(&self, id: &RecordId) -> ContentResult<()> {
        let photo: Photo = self.fetch(PHOTOS_TABLE, id).await?;
        let path = self
            .objects
            .object_path(PHOTOS_BUCKET, &photo.image_url)
            .or_else(|| {
                photo
                    .image_url
                    .rsplit('/')
                    .next()
                    .filter(|name| !name.is_empty())
                    .map(|name| format!("{PHOTOS_PREFIX}/{name}"))
            });

        match path {
            Some(path) => {
                if let Err(err) = self.objects.remove(PHOTOS_BUCKET, &[path.clone()]).await {
                    warn!(?err, %id, %path, "failed to delete photo from storage");
                }
            }
            None => warn!(%id, url = %photo.image_url, "photo URL has no object path"),
        }

        self.remove(PHOTOS_TABLE, id, PHOTO_KEYS).await
    }
}
