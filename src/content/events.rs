use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ContentResult, ContentService, MAX_IMAGE_BYTES, optional_text, require_image, require_text,
};
use crate::{
    attachment::{AttachmentFile, storage_file_name},
    cache::CacheKey,
    gateway::{Order, RecordId, null_as_default, to_patch},
};

pub const EVENTS_TABLE: &str = "events";
pub const EVENTS_BUCKET: &str = "events";
const EVENT_KEYS: &[CacheKey] = &[CacheKey::Events];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_published: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventInput {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Existing image, kept unless a new file is uploaded.
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Serialize)]
struct EventRow {
    title: String,
    subtitle: Option<String>,
    description: Option<String>,
    content: Option<String>,
    image_url: Option<String>,
    date: Option<NaiveDate>,
    time: Option<String>,
    venue: Option<String>,
    is_published: bool,
    updated_at: DateTime<Utc>,
}

impl EventInput {
    fn into_row(self, now: DateTime<Utc>) -> ContentResult<EventRow> {
        Ok(EventRow {
            title: require_text("title", &self.title, 3)?,
            subtitle: optional_text(self.subtitle),
            description: optional_text(self.description),
            content: optional_text(self.content),
            image_url: optional_text(self.image_url),
            date: self.date,
            time: optional_text(self.time),
            venue: optional_text(self.venue),
            is_published: self.is_published,
            updated_at: now,
        })
    }
}

impl ContentService {
    pub async fn list_events(&self) -> ContentResult<Vec<Event>> {
        self.cached_list(CacheKey::Events, EVENTS_TABLE, Order::desc("date"))
            .await
    }

    pub async fn get_event(&self, id: &RecordId) -> ContentResult<Event> {
        self.fetch(EVENTS_TABLE, id).await
    }

    /// Validate the form, upload a replacement image if one was given, then save.
    pub async fn save_event(
        &self,
        id: Option<&RecordId>,
        input: EventInput,
        image: Option<AttachmentFile>,
    ) -> ContentResult<Event> {
        let now = Utc::now();
        let mut row = input.into_row(now)?;

        if let Some(file) = image {
            require_image("image", &file, MAX_IMAGE_BYTES)?;
            let millis = now.timestamp_millis();
            let url = self
                .upload_image(
                    EVENTS_BUCKET,
                    |file| format!("{millis}-{}", storage_file_name(&file.file_name)),
                    file,
                )
                .await?;
            row.image_url = Some(url);
        }

        self.save(EVENTS_TABLE, id, to_patch(&row)?, EVENT_KEYS).await
    }

    pub async fn delete_event(&self, id: &RecordId) -> ContentResult<()> {
        self.remove(EVENTS_TABLE, id, EVENT_KEYS).await
    }
}
