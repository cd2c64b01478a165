use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::{
    ContentError, ContentResult, ContentService, MAX_IMAGE_BYTES, optional_text, require_image,
    require_text,
};
use crate::{
    attachment::{AttachmentFile, storage_file_name},
    cache::CacheKey,
    gateway::{Order, RecordId, null_as_default, to_patch},
};

pub const NEWS_TABLE: &str = "news";
pub const NEWS_BUCKET: &str = "news-images";
const NEWS_PREFIX: &str = "news";
const NEWS_KEYS: &[CacheKey] = &[CacheKey::News, CacheKey::Dashboard];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsPost {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_published: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Editor form for a news post.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewsInput {
    pub title: String,
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct NewsRow {
    title: String,
    summary: String,
    content: String,
    image_url: Option<String>,
    is_published: bool,
    published_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl NewsInput {
    fn into_row(self, now: DateTime<Utc>) -> ContentResult<NewsRow> {
        let image_url = optional_text(self.image_url);
        if let Some(url) = &image_url {
            let valid = Url::parse(url).is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
            if !valid {
                return Err(ContentError::validation("image_url", "invalid URL"));
            }
        }

        Ok(NewsRow {
            title: require_text("title", &self.title, 3)?,
            summary: require_text("summary", &self.summary, 3)?,
            content: require_text("content", &self.content, 3)?,
            image_url,
            is_published: self.is_published,
            // Publishing without a date stamps it now; unpublishing clears it.
            published_at: self
                .is_published
                .then(|| self.published_at.unwrap_or(now)),
            updated_at: now,
        })
    }
}

impl ContentService {
    pub async fn list_news(&self) -> ContentResult<Vec<NewsPost>> {
        self.cached_list(CacheKey::News, NEWS_TABLE, Order::desc("published_at"))
            .await
    }

    pub async fn get_news(&self, id: &RecordId) -> ContentResult<NewsPost> {
        self.fetch(NEWS_TABLE, id).await
    }

    pub async fn save_news(&self, id: Option<&RecordId>, input: NewsInput) -> ContentResult<NewsPost> {
        let row = input.into_row(Utc::now())?;
        self.save(NEWS_TABLE, id, to_patch(&row)?, NEWS_KEYS).await
    }

    pub async fn delete_news(&self, id: &RecordId) -> ContentResult<()> {
        self.remove(NEWS_TABLE, id, NEWS_KEYS).await
    }

    /// Store an image for the news editor and return its public URL.
    pub async fn upload_news_image(&self, file: AttachmentFile) -> ContentResult<String> {
        require_image("image", &file, MAX_IMAGE_BYTES)?;
        let millis = Utc::now().timestamp_millis();
        self.upload_image(
            NEWS_BUCKET,
            |file| format!("{NEWS_PREFIX}/{millis}_{}", storage_file_name(&file.file_name)),
            file,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        cache::ViewCache,
        compression::CompressionOptions,
        gateway::memory::{MemoryObjectStore, MemoryRowStore},
    };

    fn input() -> NewsInput {
        NewsInput {
            title: "Water supply schedule".into(),
            summary: "Revised timings".into(),
            content: "Ward 4 receives water from 6am.".into(),
            ..NewsInput::default()
        }
    }

    fn service() -> (ContentService, Arc<MemoryRowStore>, Arc<MemoryObjectStore>) {
        let rows = Arc::new(MemoryRowStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let service = ContentService::new(
            rows.clone(),
            objects.clone(),
            ViewCache::new(),
            CompressionOptions::default(),
        );
        (service, rows, objects)
    }

    #[test]
    fn publishing_without_a_date_stamps_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let row = NewsInput {
            is_published: true,
            ..input()
        }
        .into_row(now)
        .unwrap();
        assert_eq!(row.published_at, Some(now));
    }

    #[test]
    fn explicit_publish_date_is_kept_and_unpublishing_clears_it() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let scheduled = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let published = NewsInput {
            is_published: true,
            published_at: Some(scheduled),
            ..input()
        }
        .into_row(now)
        .unwrap();
        assert_eq!(published.published_at, Some(scheduled));

        let draft = NewsInput {
            is_published: false,
            published_at: Some(scheduled),
            ..input()
        }
        .into_row(now)
        .unwrap();
        assert_eq!(draft.published_at, None);
    }

    #[test]
    fn short_fields_and_bad_urls_are_rejected() {
        let short = NewsInput {
            summary: "ok".into(),
            ..input()
        };
        assert!(matches!(
            short.into_row(Utc::now()),
            Err(ContentError::Validation { field: "summary", .. })
        ));

        let bad_url = NewsInput {
            image_url: Some("not a url".into()),
            ..input()
        };
        assert!(matches!(
            bad_url.into_row(Utc::now()),
            Err(ContentError::Validation { field: "image_url", .. })
        ));

        let blank_url = NewsInput {
            image_url: Some("  ".into()),
            ..input()
        };
        assert_eq!(blank_url.into_row(Utc::now()).unwrap().image_url, None);
    }

    #[tokio::test]
    async fn create_update_and_delete_round_trip_through_the_list() {
        let (service, rows, _) = service();
        let created = service.save_news(None, input()).await.unwrap();
        assert_eq!(service.list_news().await.unwrap().len(), 1);

        let edited = service
            .save_news(
                Some(&created.id),
                NewsInput {
                    title: "Water supply schedule (updated)".into(),
                    ..input()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.title, "Water supply schedule (updated)");
        let listed = service.list_news().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, edited.title);

        service.delete_news(&created.id).await.unwrap();
        assert!(service.list_news().await.unwrap().is_empty());
        assert_eq!(rows.calls_of("select"), 3);
    }

    #[tokio::test]
    async fn news_images_land_under_the_news_prefix() {
        let (service, _, objects) = service();
        let url = service
            .upload_news_image(AttachmentFile::from_name("ward map.png", b"not really".to_vec()))
            .await
            .unwrap();
        let (bucket, path) = objects.uploads().remove(0);
        assert_eq!(bucket, NEWS_BUCKET);
        assert!(path.starts_with("news/"));
        assert!(path.ends_with("_ward_map.png"));
        assert!(url.ends_with(&path));
    }
}
