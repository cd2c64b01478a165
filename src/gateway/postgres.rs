use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::{
    GatewayError, GatewayResult, Order, Patch, RecordId, Row, RowStore, validate_identifier,
};

/// Row store backed by the portal's Postgres database.
///
/// Patches are applied through `jsonb_populate_record`, which coerces each JSON value
/// to the column's declared type, so the store needs no per-table row structs.
#[derive(Clone)]
pub struct PgRowStore {
    pool: PgPool,
}

impl PgRowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn select(&self, table: &str, order: Order) -> GatewayResult<Vec<Row>> {
        let table = validate_identifier(table)?;
        let column = validate_identifier(order.column)?;
        let direction = if order.descending { "DESC" } else { "ASC" };

        let sql = format!(
            "SELECT to_jsonb(t) FROM {table} AS t ORDER BY t.{column} {direction} NULLS LAST"
        );
        let rows = sqlx::query_scalar::<_, Value>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn select_one(&self, table: &str, id: &RecordId) -> GatewayResult<Row> {
        let table = validate_identifier(table)?;
        let sql = format!("SELECT to_jsonb(t) FROM {table} AS t WHERE t.id::text = $1");
        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GatewayError::NotFound)
    }

    async fn count(&self, table: &str) -> GatewayResult<i64> {
        let table = validate_identifier(table)?;
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn update(&self, table: &str, id: &RecordId, patch: Patch) -> GatewayResult<Row> {
        let table = validate_identifier(table)?;
        let columns = patch_columns(&patch)?;
        if columns.is_empty() {
            return self.select_one(table, id).await;
        }

        let sql = format!(
            "UPDATE {table} AS t SET ({targets}) = (SELECT {sources} FROM jsonb_populate_record(NULL::{table}, $2) AS r) \
             WHERE t.id::text = $1 RETURNING to_jsonb(t)",
            targets = columns.join(", "),
            sources = prefixed(&columns, "r"),
        );

        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id.as_str())
            .bind(Value::Object(patch))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GatewayError::NotFound)
    }

    async fn insert(&self, table: &str, values: Patch) -> GatewayResult<Row> {
        let table = validate_identifier(table)?;
        let columns = patch_columns(&values)?;
        if columns.is_empty() {
            return Err(GatewayError::InvalidPatch(format!(
                "insert into {table} without columns"
            )));
        }

        let sql = format!(
            "INSERT INTO {table} AS t ({targets}) SELECT {sources} FROM jsonb_populate_record(NULL::{table}, $1) AS r \
             RETURNING to_jsonb(t)",
            targets = columns.join(", "),
            sources = prefixed(&columns, "r"),
        );

        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(values))
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn upsert(&self, table: &str, values: Patch) -> GatewayResult<Row> {
        if !values.contains_key("id") {
            return self.insert(table, values).await;
        }

        let table = validate_identifier(table)?;
        let columns = patch_columns(&values)?;
        let assignments: Vec<String> = columns
            .iter()
            .filter(|column| **column != "id")
            .map(|column| format!("{column} = EXCLUDED.{column}"))
            .collect();
        let conflict_action = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        let sql = format!(
            "INSERT INTO {table} AS t ({targets}) SELECT {sources} FROM jsonb_populate_record(NULL::{table}, $1) AS r \
             ON CONFLICT (id) {conflict_action} RETURNING to_jsonb(t)",
            targets = columns.join(", "),
            sources = prefixed(&columns, "r"),
        );

        sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(values))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(GatewayError::NotFound)
    }

    async fn delete(&self, table: &str, id: &RecordId) -> GatewayResult<()> {
        let table = validate_identifier(table)?;
        let sql = format!("DELETE FROM {table} WHERE id::text = $1");
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }
}

fn patch_columns(patch: &Patch) -> GatewayResult<Vec<&str>> {
    patch
        .keys()
        .map(|key| validate_identifier(key.as_str()))
        .collect()
}

fn prefixed(columns: &[&str], alias: &str) -> String {
    columns
        .iter()
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn patch_columns_follow_key_order() {
        let patch = json!({"status": "approved", "remarks": null, "receipt_url": "u"});
        let Value::Object(map) = patch else {
            unreachable!()
        };
        let columns = patch_columns(&map).unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns.contains(&"receipt_url"));
    }

    #[test]
    fn patch_columns_reject_unsafe_keys() {
        let patch = json!({"status = 'x'; --": "approved"});
        let Value::Object(map) = patch else {
            unreachable!()
        };
        assert!(matches!(
            patch_columns(&map),
            Err(GatewayError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn prefixed_columns_use_alias() {
        assert_eq!(prefixed(&["status", "remarks"], "r"), "r.status, r.remarks");
    }
}
