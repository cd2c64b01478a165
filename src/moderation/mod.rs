//! Moderation workflow shared by tax payments, certificate applications and grievances.
//!
//! An action validates locally, optionally uploads one attachment, resolves its public
//! URL, writes a single row update and invalidates the cached views the domain declares.
//! Each step runs at most once and the first failure ends the action.

pub mod certificates;
pub mod grievances;
pub mod payments;

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer, de::DeserializeOwned};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    attachment::{AttachmentFile, storage_file_name},
    cache::{CacheKey, ViewCache},
    compression::{CompressionOptions, compress},
    gateway::{GatewayError, ObjectStore, Order, RecordId, RowStore, decode_rows, to_patch},
};

/// Status set of one moderation domain.
pub trait ModerationStatus: Copy + fmt::Debug + PartialEq + Send + Sync + 'static {
    fn parse(raw: &str) -> Option<Self>;

    fn as_str(&self) -> &'static str;

    /// Whether an attachment may accompany a transition into this status.
    fn accepts_attachment(&self) -> bool;
}

pub trait ModerationDomain: Sized + Send + Sync + 'static {
    /// Short name used in logs and the in-flight guard.
    const NAME: &'static str;
    const TABLE: &'static str;
    const ORDER: Order;
    const LIST_KEY: CacheKey;
    /// Every view refreshed after a successful action.
    const CACHE_KEYS: &'static [CacheKey];
    const ATTACHMENT: Option<AttachmentPolicy>;

    type Status: ModerationStatus;
    type Extra: Default + Send + Sync;
    type Record: DeserializeOwned + Serialize + Send + Sync;
    type Patch: Serialize;

    fn attachment_required(_status: Self::Status) -> bool {
        false
    }

    fn build_patch(update: ModerationUpdate<Self>) -> Self::Patch;
}

/// Review states shared by payments and certificate applications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    NeedsInfo,
}

impl ModerationStatus for ReviewStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "needs-info" => Some(Self::NeedsInfo),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsInfo => "needs-info",
        }
    }

    fn accepts_attachment(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Where and what a domain accepts as its attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentPolicy {
    pub bucket: &'static str,
    pub prefix: &'static str,
    /// Names both the form field and the object-name prefix.
    pub kind: &'static str,
    pub allowed_extensions: &'static [&'static str],
    pub max_bytes: u64,
    pub compress: bool,
}

impl AttachmentPolicy {
    /// `<prefix>/<kind>_<id>_<unix-millis>_<sanitised-name>`
    pub fn object_path(&self, id: &RecordId, file_name: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}_{}_{}_{}",
            self.prefix,
            self.kind,
            id,
            now.timestamp_millis(),
            storage_file_name(file_name)
        )
    }

    fn check(&self, file: &AttachmentFile) -> Result<(), ModerationError> {
        if file.bytes.is_empty() {
            return Err(ModerationError::validation(self.kind, "file is empty"));
        }
        let extension = file.extension().unwrap_or_default();
        if !self.allowed_extensions.contains(&extension.as_str()) {
            return Err(ModerationError::validation(
                self.kind,
                format!(
                    "unsupported file type; allowed: {}",
                    self.allowed_extensions.join(", ")
                ),
            ));
        }
        if file.size() > self.max_bytes {
            return Err(ModerationError::validation(
                self.kind,
                format!("file exceeds the {} KiB limit", self.max_bytes / 1024),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub enum AttachmentInput {
    #[default]
    Keep,
    Upload(AttachmentFile),
    Clear,
}

/// What the persisted patch does with the attachment URL column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AttachmentChange {
    /// Column omitted from the patch.
    #[default]
    Keep,
    Set(String),
    Clear,
}

impl AttachmentChange {
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

impl Serialize for AttachmentChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Set(url) => serializer.serialize_str(url),
            Self::Keep | Self::Clear => serializer.serialize_none(),
        }
    }
}

pub struct ModerationRequest<D: ModerationDomain> {
    pub id: RecordId,
    pub status: String,
    pub remarks: Option<String>,
    pub attachment: AttachmentInput,
    pub extra: D::Extra,
}

impl<D: ModerationDomain> ModerationRequest<D> {
    pub fn new(id: impl Into<RecordId>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            remarks: None,
            attachment: AttachmentInput::Keep,
            extra: D::Extra::default(),
        }
    }

    pub fn remarks(mut self, remarks: Option<String>) -> Self {
        self.remarks = remarks;
        self
    }

    pub fn attachment(mut self, attachment: AttachmentInput) -> Self {
        self.attachment = attachment;
        self
    }

    pub fn extra(mut self, extra: D::Extra) -> Self {
        self.extra = extra;
        self
    }
}

/// Validated input handed to [`ModerationDomain::build_patch`].
pub struct ModerationUpdate<D: ModerationDomain> {
    pub status: D::Status,
    pub remarks: Option<String>,
    pub attachment: AttachmentChange,
    pub extra: D::Extra,
    pub now: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("attachment upload failed: {0}")]
    Upload(#[source] GatewayError),
    #[error("failed to save record: {0}")]
    Persistence(#[source] GatewayError),
}

impl ModerationError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Upload(_) => "upload",
            Self::Persistence(_) => "persistence",
        }
    }
}

struct Validated<S> {
    status: S,
    remarks: Option<String>,
    upload: Option<(AttachmentPolicy, AttachmentFile)>,
    clear: bool,
}

fn validate<D: ModerationDomain>(
    request: &ModerationRequest<D>,
) -> Result<Validated<D::Status>, ModerationError> {
    let status = D::Status::parse(&request.status).ok_or_else(|| {
        ModerationError::validation("status", format!("unknown status `{}`", request.status))
    })?;

    let remarks = request
        .remarks
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    let (upload, clear) = match (&request.attachment, D::ATTACHMENT) {
        (AttachmentInput::Keep, _) => (None, false),
        (_, None) => {
            return Err(ModerationError::validation(
                "attachment",
                format!("{} records do not take attachments", D::NAME),
            ));
        }
        (AttachmentInput::Clear, Some(_)) => (None, true),
        (AttachmentInput::Upload(file), Some(policy)) => {
            if !status.accepts_attachment() {
                return Err(ModerationError::validation(
                    policy.kind,
                    format!("attachments are not accepted with status `{}`", status.as_str()),
                ));
            }
            policy.check(file)?;
            (Some((policy, file.clone())), false)
        }
    };

    if D::attachment_required(status) && upload.is_none() {
        let field = D::ATTACHMENT.map(|policy| policy.kind).unwrap_or("attachment");
        return Err(ModerationError::validation(
            field,
            format!("a {field} file is required for status `{}`", status.as_str()),
        ));
    }

    Ok(Validated {
        status,
        remarks,
        upload,
        clear,
    })
}

#[derive(Clone)]
pub struct ModerationEngine {
    rows: Arc<dyn RowStore>,
    objects: Arc<dyn ObjectStore>,
    cache: ViewCache,
    compression: CompressionOptions,
}

impl ModerationEngine {
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

    /// Cached list of a domain's records, newest first.
    pub async fn list<D: ModerationDomain>(&self) -> Result<Vec<D::Record>, GatewayError> {
        let rows = self
            .cache
            .get_or_load(D::LIST_KEY, || async {
                self.rows.select(D::TABLE, D::ORDER).await.map(Value::Array)
            })
            .await?;
        decode_rows(&rows)
    }

    pub async fn apply<D: ModerationDomain>(
        &self,
        request: ModerationRequest<D>,
    ) -> Result<D::Record, ModerationError> {
        let Validated {
            status,
            remarks,
            upload,
            clear,
        } = validate(&request)?;
        let ModerationRequest { id, extra, .. } = request;
        let now = Utc::now();

        let mut uploaded = None;
        let attachment = match upload {
            Some((policy, file)) => {
                let (path, url) = self.upload(&policy, &id, file, now).await?;
                uploaded = Some((policy.bucket, path));
                AttachmentChange::Set(url)
            }
            None if clear => AttachmentChange::Clear,
            None => AttachmentChange::Keep,
        };

        let patch = D::build_patch(ModerationUpdate {
            status,
            remarks,
            attachment,
            extra,
            now,
        });
        let patch = to_patch(&patch).map_err(ModerationError::Persistence)?;

        let row = match self.rows.update(D::TABLE, &id, patch).await {
            Ok(row) => row,
            Err(err) => {
                if let Some((bucket, path)) = &uploaded {
                    warn!(domain = D::NAME, %id, %bucket, %path, "uploaded attachment left orphaned");
                }
                error!(?err, domain = D::NAME, %id, "moderation update failed");
                return Err(ModerationError::Persistence(err));
            }
        };

        self.cache.invalidate(D::CACHE_KEYS).await;
        info!(
            domain = D::NAME,
            %id,
            status = status.as_str(),
            attachment = uploaded.is_some(),
            "moderation applied"
        );

        serde_json::from_value(row).map_err(|err| ModerationError::Persistence(err.into()))
    }

    async fn upload(
        &self,
        policy: &AttachmentPolicy,
        id: &RecordId,
        file: AttachmentFile,
        now: DateTime<Utc>,
    ) -> Result<(String, String), ModerationError> {
        let (file, compressed) = if policy.compress {
            let outcome = compress(file, self.compression).await;
            let compressed = outcome.was_compressed();
            (outcome.file, compressed)
        } else {
            (file, false)
        };

        let path = policy.object_path(id, &file.file_name, now);
        if let Err(err) = self
            .objects
            .upload(policy.bucket, &path, file.bytes, &file.content_type)
            .await
        {
            error!(?err, bucket = policy.bucket, %path, "attachment upload failed");
            return Err(ModerationError::Upload(err));
        }

        info!(bucket = policy.bucket, %path, compressed, "attachment uploaded");
        let url = self.objects.public_url(policy.bucket, &path);
        Ok((path, url))
    }
}
