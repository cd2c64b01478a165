use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttachmentPolicy, ModerationDomain, ModerationStatus, ModerationUpdate};
use crate::{
    cache::CacheKey,
    gateway::{Order, RecordId, null_as_default},
};

pub const GRIEVANCES_TABLE: &str = "grievances";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrievanceStatus {
    #[default]
    New,
    InProgress,
    Resolved,
    Rejected,
}

impl ModerationStatus for GrievanceStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "new" => Some(Self::New),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    fn accepts_attachment(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grievance {
    pub id: RecordId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub grievance_type: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: GrievanceStatus,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Grievance updates only touch remarks when new ones are given.
#[derive(Debug, Serialize)]
pub struct GrievancePatch {
    pub status: GrievanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct Grievances;

impl ModerationDomain for Grievances {
    const NAME: &'static str = "grievances";
    const TABLE: &'static str = GRIEVANCES_TABLE;
    const ORDER: Order = Order::desc("created_at");
    const LIST_KEY: CacheKey = CacheKey::Grievances;
    const CACHE_KEYS: &'static [CacheKey] = &[CacheKey::Grievances];
    const ATTACHMENT: Option<AttachmentPolicy> = None;

    type Status = GrievanceStatus;
    type Extra = ();
    type Record = Grievance;
    type Patch = GrievancePatch;

    fn build_patch(update: ModerationUpdate<Self>) -> GrievancePatch {
        GrievancePatch {
            status: update.status,
            remarks: update.remarks,
            updated_at: update.now,
        }
    }
}

/// Narrow a grievance list to one status; `None` and `"all"` keep every row.
pub fn filter_by_status(grievances: Vec<Grievance>, status: Option<&str>) -> Vec<Grievance> {
    match status.map(str::trim).filter(|raw| !raw.is_empty() && *raw != "all") {
        None => grievances,
        Some(raw) => match GrievanceStatus::parse(raw) {
            Some(wanted) => grievances
                .into_iter()
                .filter(|grievance| grievance.status == wanted)
                .collect(),
            None => Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        attachment::AttachmentFile,
        cache::ViewCache,
        compression::CompressionOptions,
        gateway::memory::{MemoryObjectStore, MemoryRowStore},
        moderation::{AttachmentInput, ModerationEngine, ModerationError, ModerationRequest},
    };

    fn engine(rows: Arc<MemoryRowStore>) -> ModerationEngine {
        ModerationEngine::new(
            rows,
            Arc::new(MemoryObjectStore::new()),
            ViewCache::new(),
            CompressionOptions::default(),
        )
    }

    fn store() -> Arc<MemoryRowStore> {
        Arc::new(MemoryRowStore::new().with_rows(
            GRIEVANCES_TABLE,
            vec![
                json!({"id": 1, "name": "Kiran", "status": "new", "remarks": "call back", "created_at": "2024-01-01T00:00:00+00:00"}),
                json!({"id": 2, "name": "Lata", "status": "resolved", "created_at": "2024-01-02T00:00:00+00:00"}),
            ],
        ))
    }

    #[tokio::test]
    async fn status_change_stamps_updated_at_and_keeps_remarks() {
        let rows = store();
        let engine = engine(rows.clone());
        let updated = engine
            .apply(ModerationRequest::<Grievances>::new("1", "in_progress"))
            .await
            .unwrap();

        assert_eq!(updated.status, GrievanceStatus::InProgress);
        assert!(updated.updated_at.is_some());
        assert_eq!(updated.remarks.as_deref(), Some("call back"));
    }

    #[tokio::test]
    async fn grievances_reject_attachments() {
        let rows = store();
        let engine = engine(rows.clone());
        let request = ModerationRequest::<Grievances>::new("1", "resolved").attachment(
            AttachmentInput::Upload(AttachmentFile::from_name("photo.jpg", vec![1, 2, 3])),
        );
        let err = engine.apply(request).await.unwrap_err();
        assert!(matches!(err, ModerationError::Validation { field: "attachment", .. }));
        assert!(rows.calls().is_empty());
    }

    #[tokio::test]
    async fn payment_statuses_are_not_grievance_statuses() {
        let rows = store();
        let engine = engine(rows.clone());
        let err = engine
            .apply(ModerationRequest::<Grievances>::new("1", "approved"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Validation { field: "status", .. }));
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let engine = engine(store());
        let all = engine.list::<Grievances>().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id.as_str(), "2");

        let resolved = filter_by_status(all.clone(), Some("resolved"));
        assert_eq!(resolved.len(), 1);
        assert_eq!(filter_by_status(all.clone(), Some("all")).len(), 2);
        assert!(filter_by_status(all, Some("bogus")).is_empty());
    }
}
