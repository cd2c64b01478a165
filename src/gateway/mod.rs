//! Contracts for the hosted backend: the row store, the object store and the auth API.
//!
//! Rows travel as JSON documents so a single store implementation can serve every
//! table; domain modules own typed records and deserialize at the edge.

mod auth;
#[cfg(test)]
pub mod memory;
mod postgres;
mod storage;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::session::Session;

pub use auth::AuthClient;
pub use postgres::PgRowStore;
pub use storage::StorageClient;

pub type Row = Value;
pub type Patch = Map<String, Value>;
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("record not found")]
    NotFound,
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid patch: {0}")]
    InvalidPatch(String),
}

/// Opaque primary key. Tables may use numeric or UUID keys; both are carried as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the `id` of a JSON row.
    pub fn of_row(row: &Value) -> Option<Self> {
        match row.get("id")? {
            Value::String(text) => Some(Self(text.clone())),
            Value::Number(number) => Some(Self(number.to_string())),
            _ => None,
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        Self::of_row(row).is_some_and(|id| id == *self)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Integer(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => RecordId(text),
            RawId::Integer(number) => RecordId(number.to_string()),
        })
    }
}

/// Sort order for list reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub descending: bool,
}

impl Order {
    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, table: &str, order: Order) -> GatewayResult<Vec<Row>>;

    async fn select_one(&self, table: &str, id: &RecordId) -> GatewayResult<Row>;

    async fn count(&self, table: &str) -> GatewayResult<i64>;

    /// Apply `patch` to a single row as one statement and return the stored row.
    async fn update(&self, table: &str, id: &RecordId, patch: Patch) -> GatewayResult<Row>;

    async fn insert(&self, table: &str, values: Patch) -> GatewayResult<Row>;

    /// Insert, or update the row sharing the `id` carried in `values`.
    async fn upsert(&self, table: &str, values: Patch) -> GatewayResult<Row>;

    async fn delete(&self, table: &str, id: &RecordId) -> GatewayResult<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<()>;

    /// Publicly reachable URL of an object. Pure; no round trip.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn remove(&self, bucket: &str, paths: &[String]) -> GatewayResult<()>;

    /// Recover the object path from a URL produced by [`ObjectStore::public_url`].
    fn object_path(&self, bucket: &str, url: &str) -> Option<String> {
        let prefix = self.public_url(bucket, "");
        url.strip_prefix(&prefix)
            .filter(|path| !path.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session>;

    async fn sign_out(&self, session: &Session) -> GatewayResult<()>;

    async fn is_admin(&self, user_id: &str) -> GatewayResult<bool>;
}

/// Table and column names are interpolated into SQL, so they must be plain identifiers.
pub fn validate_identifier(name: &str) -> GatewayResult<&str> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|ch| ch.is_ascii_lowercase() || ch == '_');
    let valid_tail = chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');

    if valid_head && valid_tail && name.len() <= 63 {
        Ok(name)
    } else {
        Err(GatewayError::InvalidIdentifier(name.to_string()))
    }
}

/// Serialize a typed patch into the column map sent to the row store.
pub fn to_patch<T: Serialize>(value: &T) -> GatewayResult<Patch> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(GatewayError::InvalidPatch(format!(
            "expected an object, got {other}"
        ))),
    }
}

pub fn decode_rows<T: DeserializeOwned>(rows: &Value) -> GatewayResult<Vec<T>> {
    Ok(serde_json::from_value(rows.clone())?)
}

/// Read a nullable column as the type's default.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
