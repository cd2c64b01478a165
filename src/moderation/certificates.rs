use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttachmentChange, AttachmentPolicy, ModerationDomain, ModerationUpdate, ReviewStatus};
use crate::{
    cache::CacheKey,
    gateway::{Order, RecordId, null_as_default},
};

pub const CERTIFICATES_TABLE: &str = "certificate_applications";

pub const ISSUED_CERTIFICATE_POLICY: AttachmentPolicy = AttachmentPolicy {
    bucket: "certificate_uploads",
    prefix: "issued_certificates",
    kind: "certificate",
    allowed_extensions: &["pdf", "jpg", "jpeg", "png", "webp"],
    max_bytes: 5 * 1024 * 1024,
    compress: true,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateApplication {
    pub id: RecordId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub certificate_type: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub payment_screenshot_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payment_verified: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ReviewStatus,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub issued_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields a certificate action may set besides status and remarks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificateExtra {
    pub payment_verified: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CertificatePatch {
    pub status: ReviewStatus,
    pub remarks: Option<String>,
    #[serde(skip_serializing_if = "AttachmentChange::is_keep")]
    pub issued_url: AttachmentChange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_verified: Option<bool>,
}

pub struct Certificates;

impl ModerationDomain for Certificates {
    const NAME: &'static str = "certificates";
    const TABLE: &'static str = CERTIFICATES_TABLE;
    const ORDER: Order = Order::desc("created_at");
    const LIST_KEY: CacheKey = CacheKey::CertificateApplications;
    const CACHE_KEYS: &'static [CacheKey] = &[CacheKey::CertificateApplications];
    const ATTACHMENT: Option<AttachmentPolicy> = Some(ISSUED_CERTIFICATE_POLICY);

    type Status = ReviewStatus;
    type Extra = CertificateExtra;
    type Record = CertificateApplication;
    type Patch = CertificatePatch;

    fn build_patch(update: ModerationUpdate<Self>) -> CertificatePatch {
        CertificatePatch {
            status: update.status,
            remarks: update.remarks,
            issued_url: update.attachment,
            payment_verified: update.extra.payment_verified,
        }
    }
}
