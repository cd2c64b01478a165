use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttachmentChange, AttachmentPolicy, ModerationDomain, ModerationUpdate, ReviewStatus};
use crate::{
    cache::CacheKey,
    gateway::{Order, RecordId, null_as_default},
};

pub const PAYMENTS_TABLE: &str = "tax_payments";

pub const RECEIPT_POLICY: AttachmentPolicy = AttachmentPolicy {
    bucket: "receipts",
    prefix: "receipts",
    kind: "receipt",
    allowed_extensions: &["pdf", "jpg", "jpeg", "png"],
    max_bytes: 256 * 1024,
    compress: false,
};

/// Tax payment submitted by a citizen, verified by staff against an issued receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: RecordId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ReviewStatus,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PaymentPatch {
    pub status: ReviewStatus,
    pub remarks: Option<String>,
    #[serde(skip_serializing_if = "AttachmentChange::is_keep")]
    pub receipt_url: AttachmentChange,
}

pub struct Payments;

impl ModerationDomain for Payments {
    const NAME: &'static str = "payments";
    const TABLE: &'static str = PAYMENTS_TABLE;
    const ORDER: Order = Order::desc("created_at");
    const LIST_KEY: CacheKey = CacheKey::Payments;
    const CACHE_KEYS: &'static [CacheKey] = &[CacheKey::Payments, CacheKey::Dashboard];
    const ATTACHMENT: Option<AttachmentPolicy> = Some(RECEIPT_POLICY);

    type Status = ReviewStatus;
    type Extra = ();
    type Record = Payment;
    type Patch = PaymentPatch;

    fn attachment_required(status: ReviewStatus) -> bool {
        status == ReviewStatus::Approved
    }

    fn build_patch(update: ModerationUpdate<Self>) -> PaymentPatch {
        PaymentPatch {
            status: update.status,
            remarks: update.remarks,
            receipt_url: update.attachment,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gateway::to_patch;

    #[test]
    fn patch_without_new_receipt_writes_status_and_remarks_only() {
        let patch = to_patch(&Payments::build_patch(ModerationUpdate {
            status: ReviewStatus::NeedsInfo,
            remarks: None,
            attachment: AttachmentChange::Keep,
            extra: (),
            now: Utc::now(),
        }))
        .unwrap();
        let keys: Vec<_> = patch.keys().map(String::as_str).collect();
        assert_eq!(keys, ["remarks", "status"]);
        assert_eq!(patch["status"], "needs-info");
        assert!(patch["remarks"].is_null());
    }

    #[test]
    fn rows_with_null_status_read_as_pending() {
        let payment: Payment = serde_json::from_value(json!({
            "id": 3,
            "status": null,
            "created_at": "2024-01-05T08:30:00.123456+00:00"
        }))
        .unwrap();
        assert_eq!(payment.status, ReviewStatus::Pending);
        assert_eq!(payment.id.as_str(), "3");
        assert!(payment.created_at.is_some());
    }
}
