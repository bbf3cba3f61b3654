use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::{
    sqlite::{SqlitePoolOptions, SqliteRow},
    Column, Row, SqlitePool,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum DbError {
    #[error("failed to connect to database: {0}")]
    Connect(sqlx::Error),
    #[error("schema inspection failed: {0}")]
    Inspect(sqlx::Error),
    #[error("query execution failed: {0}")]
    Execute(sqlx::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct ForeignKeyDef {
    pub column: String,
    /// `referenced_table.referenced_column` form.
    pub references: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub(crate) struct TableSchema {
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

/// Table name → structure. A `BTreeMap` keeps the iteration order
/// deterministic within one inspection, so prompts are reproducible.
pub(crate) type DbSchema = BTreeMap<String, TableSchema>;

/// Serialized row set returned by the executor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Compact JSON rendering used inside prompts.
    pub(crate) fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Database capability consumed by the pipelines: read the schema, run an
/// already-validated SELECT. No retries at this layer; those belong to the
/// pipeline.
#[async_trait]
pub(crate) trait DataSource: Send + Sync {
    async fn inspect_schema(&self) -> Result<DbSchema, DbError>;
    async fn run_select(&self, sql: &str) -> Result<RowSet, DbError>;
}

#[derive(Clone)]
pub(crate) struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    pub(crate) async fn connect(url: &str) -> Result<Database, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(DbError::Connect)?;
        Ok(Database { pool })
    }
}

#[async_trait]
impl DataSource for Database {
    async fn inspect_schema(&self) -> Result<DbSchema, DbError> {
        let mut conn = self.pool.acquire().await.map_err(DbError::Inspect)?;

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(DbError::Inspect)?;

        let mut schema = DbSchema::new();
        for table in tables {
            let mut columns = Vec::new();
            let sql = format!("PRAGMA table_info(\"{table}\")");
            for row in sqlx::query(&sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(DbError::Inspect)?
            {
                columns.push(ColumnDef {
                    name: row.try_get("name").map_err(DbError::Inspect)?,
                    data_type: row.try_get("type").map_err(DbError::Inspect)?,
                });
            }

            let mut foreign_keys = Vec::new();
            let sql = format!("PRAGMA foreign_key_list(\"{table}\")");
            for row in sqlx::query(&sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(DbError::Inspect)?
            {
                let referred_table: String = row.try_get("table").map_err(DbError::Inspect)?;
                // "to" is NULL when the key implicitly references the primary key.
                let referred_column: Option<String> =
                    row.try_get("to").map_err(DbError::Inspect)?;
                let references = match referred_column {
                    Some(column) => format!("{referred_table}.{column}"),
                    None => referred_table,
                };
                foreign_keys.push(ForeignKeyDef {
                    column: row.try_get("from").map_err(DbError::Inspect)?,
                    references,
                });
            }

            schema.insert(
                table,
                TableSchema {
                    columns,
                    foreign_keys,
                },
            );
        }

        Ok(schema)
    }

    async fn run_select(&self, sql: &str) -> Result<RowSet, DbError> {
        // Scoped acquisition: the connection returns to the pool when `conn`
        // drops, on every exit path. Nothing is held across model calls.
        let mut conn = self.pool.acquire().await.map_err(DbError::Execute)?;
        let rows = sqlx::query(sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::Execute)?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let rows = rows.iter().map(row_values).collect();

        Ok(RowSet { columns, rows })
    }
}

fn row_values(row: &SqliteRow) -> Vec<Value> {
    (0..row.len()).map(|i| column_value(row, i)).collect()
}

/// SQLite values are dynamically typed; probe the common affinities in order.
fn column_value(row: &SqliteRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map_or(Value::Null, Value::from);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map_or(Value::Null, Value::from);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map_or(Value::Null, Value::from);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value.map_or(Value::Null, |blob| Value::from(format!("<{} bytes>", blob.len())));
    }
    Value::Null
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inspect_schema_lists_tables_columns_and_foreign_keys() {
        let db = test_db::seeded().await;
        let schema = db.inspect_schema().await.unwrap();

        let tables: Vec<_> = schema.keys().cloned().collect();
        assert_eq!(tables, ["orders", "products"]);

        let orders = &schema["orders"];
        let names: Vec<_> = orders.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "product_id", "amount", "order_date"]);
        assert_eq!(
            orders.foreign_keys,
            vec![ForeignKeyDef {
                column: "product_id".to_string(),
                references: "products.id".to_string(),
            }]
        );

        assert!(schema["products"].foreign_keys.is_empty());
    }

    #[tokio::test]
    async fn inspect_schema_is_deterministic() {
        let db = test_db::seeded().await;
        let first = db.inspect_schema().await.unwrap();
        let second = db.inspect_schema().await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn run_select_returns_typed_values() {
        let db = test_db::seeded().await;
        let rows = db
            .run_select("SELECT id, name FROM products ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.columns, ["id", "name"]);
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.rows[0][0], Value::from(1));
        assert_eq!(rows.rows[0][1], Value::from("Widget"));
    }

    #[tokio::test]
    async fn run_select_aggregates() {
        let db = test_db::seeded().await;
        let rows = db
            .run_select(
                "SELECT product_id, SUM(amount) AS total_sales \
                 FROM orders GROUP BY product_id ORDER BY product_id",
            )
            .await
            .unwrap();
        assert_eq!(rows.columns, ["product_id", "total_sales"]);
        assert_eq!(rows.rows[0][1], Value::from(25.5));
    }

    #[tokio::test]
    async fn run_select_surfaces_execution_errors() {
        let db = test_db::seeded().await;
        let err = db.run_select("SELECT * FROM missing_table").await;
        assert!(matches!(err, Err(DbError::Execute(_))));
    }
}
