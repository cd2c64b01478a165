//! In-memory row and object stores used by unit tests. Both record every call so tests
//! can assert which round trips happened.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use super::{
    GatewayError, GatewayResult, ObjectStore, Order, Patch, RecordId, Row, RowStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCall {
    pub op: &'static str,
    pub table: String,
    pub id: Option<String>,
}

pub struct MemoryRowStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    calls: Mutex<Vec<RowCall>>,
    next_id: AtomicI64,
    fail_updates: AtomicBool,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1000),
            fail_updates: AtomicBool::new(false),
        }
    }

    pub fn with_rows(self, table: &str, rows: Vec<Row>) -> Self {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        self
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RowCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, op: &str) -> usize {
        self.calls().iter().filter(|call| call.op == op).count()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        let id = RecordId::new(id);
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.iter().find(|row| id.matches(row)).cloned())
    }

    fn record(&self, op: &'static str, table: &str, id: Option<&RecordId>) {
        self.calls.lock().unwrap().push(RowCall {
            op,
            table: table.to_string(),
            id: id.map(|id| id.to_string()),
        });
    }
}

fn merge(row: &mut Row, patch: Patch) {
    if let Value::Object(target) = row {
        for (key, value) in patch {
            target.insert(key, value);
        }
    }
}

fn sort_key(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => format!("{:020}", number.as_i64().unwrap_or_default()),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn select(&self, table: &str, order: Order) -> GatewayResult<Vec<Row>> {
        self.record("select", table, None);
        let mut rows = self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|row| sort_key(row, order.column));
        if order.descending {
            rows.reverse();
        }
        Ok(rows)
    }

    async fn select_one(&self, table: &str, id: &RecordId) -> GatewayResult<Row> {
        self.record("select_one", table, Some(id));
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.iter().find(|row| id.matches(row)).cloned())
            .ok_or(GatewayError::NotFound)
    }

    async fn count(&self, table: &str) -> GatewayResult<i64> {
        self.record("count", table, None);
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.len() as i64)
            .unwrap_or_default())
    }

    async fn update(&self, table: &str, id: &RecordId, patch: Patch) -> GatewayResult<Row> {
        self.record("update", table, Some(id));
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 500,
                message: "row store unavailable".to_string(),
            });
        }
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| id.matches(row)))
            .ok_or(GatewayError::NotFound)?;
        merge(row, patch);
        Ok(row.clone())
    }

    async fn insert(&self, table: &str, mut values: Patch) -> GatewayResult<Row> {
        self.record("insert", table, None);
        if !values.contains_key("id") {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            values.insert("id".to_string(), json!(id));
        }
        values
            .entry("created_at")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        let row = Value::Object(values);
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn upsert(&self, table: &str, values: Patch) -> GatewayResult<Row> {
        let existing = Value::Object(values.clone());
        let Some(id) = RecordId::of_row(&existing) else {
            return self.insert(table, values).await;
        };
        self.record("upsert", table, Some(&id));
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(row) = rows.iter_mut().find(|row| id.matches(row)) {
            merge(row, values);
            return Ok(row.clone());
        }
        let mut values = values;
        values
            .entry("created_at")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        let row = Value::Object(values);
        rows.push(row.clone());
        Ok(row)
    }

    async fn delete(&self, table: &str, id: &RecordId) -> GatewayResult<()> {
        self.record("delete", table, Some(id));
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.get_mut(table).ok_or(GatewayError::NotFound)?;
        let before = rows.len();
        rows.retain(|row| !id.matches(row));
        if rows.len() == before {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    uploads: Mutex<Vec<(String, String)>>,
    fail_uploads: AtomicBool,
    fail_removals: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(Vec::new()),
            fail_uploads: AtomicBool::new(false),
            fail_removals: AtomicBool::new(false),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }

    /// `(bucket, path)` of every upload attempt, including failed ones.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((bucket.to_string(), path.to_string()));
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 503,
                message: "storage unavailable".to_string(),
            });
        }
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.test/public/{bucket}/{path}")
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> GatewayResult<()> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 503,
                message: "storage unavailable".to_string(),
            });
        }
        let mut objects = self.objects.lock().unwrap();
        for path in paths {
            objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}
