use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use super::value::{quote_ident, SqlValue};
use super::StoreError;
use crate::models::{Record, SyncCounts, SyncWindow};
use crate::schema::{TableSchema, CREATED_COLUMN, ID_COLUMN, MODIFIED_COLUMN};

/// SQLite's default cap on bound parameters per statement, minus headroom.
const MAX_BIND_PARAMS: usize = 32_000;

/// Reads sync windows from and applies deltas to the relational store.
///
/// Clones share one write lock, so deltas for different tables are applied
/// one at a time while fetches and window reads stay concurrent.
#[derive(Clone)]
pub struct StoreGateway {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl StoreGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current max created/modified timestamps of the table.
    ///
    /// An empty table (or one whose timestamp columns are all NULL) yields
    /// an unset window.
    pub async fn window_for(&self, schema: &TableSchema) -> Result<SyncWindow, StoreError> {
        let sql = format!(
            "SELECT MAX({}), MAX({}) FROM {}",
            quote_ident(CREATED_COLUMN),
            quote_ident(MODIFIED_COLUMN),
            quote_ident(schema.table)
        );
        let (created, modified): (Option<String>, Option<String>) =
            sqlx::query_as(&sql).fetch_one(&self.pool).await?;

        Ok(SyncWindow::new(
            parse_timestamp(CREATED_COLUMN, created)?,
            parse_timestamp(MODIFIED_COLUMN, modified)?,
        ))
    }

    /// Applies one table's delta inside a single transaction.
    ///
    /// Inserts go in first, then updates are matched to stored rows by
    /// business key and written by internal id. Updates whose key matches
    /// no stored row are dropped. Any failure rolls back both phases.
    pub async fn apply_delta(
        &self,
        schema: &TableSchema,
        mut inserts: Vec<Record>,
        mut updates: Vec<Record>,
    ) -> Result<SyncCounts, StoreError> {
        for record in inserts.iter_mut().chain(updates.iter_mut()) {
            record.strip_transport_tag();
        }

        let _write = self.write_lock.lock().await;
        // Deferred transactions that read first fail with SQLITE_BUSY
        // instead of waiting out a concurrent commit.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let inserted = if inserts.is_empty() {
            0
        } else {
            insert_records(&mut tx, schema, &inserts).await?
        };
        tracing::debug!("Inserted {} row(s) into {}", inserted, schema.table);

        let updated = if updates.is_empty() {
            0
        } else {
            update_records(&mut tx, schema, &updates).await?
        };
        tracing::debug!("Updated {} row(s) in {}", updated, schema.table);

        tx.commit().await?;

        Ok(SyncCounts::new(inserted, updated))
    }
}

async fn insert_records(
    tx: &mut Transaction<'_, Sqlite>,
    schema: &TableSchema,
    records: &[Record],
) -> Result<u64, StoreError> {
    let fields = schema.fields();
    let rows = records
        .iter()
        .map(|record| {
            fields
                .iter()
                .map(|field| {
                    SqlValue::convert(field, record.get(field.name).unwrap_or(&Value::Null))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let columns = fields
        .iter()
        .map(|f| quote_ident(f.column))
        .collect::<Vec<_>>()
        .join(", ");
    let rows_per_statement = (MAX_BIND_PARAMS / fields.len().max(1)).max(1);

    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            quote_ident(schema.table),
            columns
        ));
        builder.push_values(chunk, |mut row_builder, row| {
            for value in row {
                value.clone().push_bind_separated(&mut row_builder);
            }
        });
        inserted += builder.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(inserted)
}

async fn update_records(
    tx: &mut Transaction<'_, Sqlite>,
    schema: &TableSchema,
    records: &[Record],
) -> Result<u64, StoreError> {
    // Resolve business keys to internal ids before writing anything.
    let mut resolved = Vec::with_capacity(records.len());
    for record in records {
        let assignments = record
            .iter()
            .filter_map(|(name, value)| schema.field(name).map(|field| (field, value)))
            .map(|(field, value)| SqlValue::convert(field, value).map(|v| (field.column, v)))
            .collect::<Result<Vec<_>, _>>()?;

        match resolve_id(tx, schema, record).await? {
            Some(id) => resolved.push((id, assignments)),
            None => {
                let key = record
                    .business_key(schema.business_key())
                    .map(|k| k.to_string())
                    .unwrap_or_default();
                tracing::debug!(
                    "No stored row in {} for key {}, dropping update",
                    schema.table,
                    key
                );
            }
        }
    }

    let mut updated = 0;
    for (id, assignments) in resolved {
        if assignments.is_empty() {
            continue;
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("UPDATE {} SET ", quote_ident(schema.table)));
        for (i, (column, value)) in assignments.into_iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(quote_ident(column));
            builder.push(" = ");
            value.push_bind(&mut builder);
        }
        builder.push(format!(" WHERE {} = ", quote_ident(ID_COLUMN)));
        builder.push_bind(id);
        updated += builder.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(updated)
}

/// Looks up the internal id of the stored row sharing `record`'s business
/// key. Key parts compare with `IS`, so NULL parts match NULL columns.
async fn resolve_id(
    tx: &mut Transaction<'_, Sqlite>,
    schema: &TableSchema,
    record: &Record,
) -> Result<Option<i64>, StoreError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM {} WHERE ",
        quote_ident(ID_COLUMN),
        quote_ident(schema.table)
    ));
    for (i, field) in schema.key_fields().enumerate() {
        let value = record
            .get(field.name)
            .ok_or_else(|| StoreError::MissingKey(field.name.to_string()))?;
        if i > 0 {
            builder.push(" AND ");
        }
        builder.push(quote_ident(field.column));
        builder.push(" IS ");
        SqlValue::convert(field, value)?.push_bind(&mut builder);
    }
    builder.push(" LIMIT 1");

    let row: Option<(i64,)> = builder
        .build_query_as::<(i64,)>()
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|(id,)| id))
}

fn parse_timestamp(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| StoreError::InvalidTimestamp {
                    column: column.to_string(),
                    value: s,
                })
        })
        .transpose()
}
