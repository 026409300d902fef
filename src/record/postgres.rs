//! PostgreSQL record store
//!
//! One JSONB-backed table per record type. Tables are created on first
//! write, so `table_exists` is false until a record of that type is saved.

use super::{Mapping, Query, Record, RecordId, RecordStore};
use crate::db::queries;
use crate::error::{validation_error, AppError, AppResult};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::RwLock;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};

/// Plain SQL identifier, used verbatim (quoted) as the table name
static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("table name pattern is valid")
});

/// Map a record type to its table name.
///
/// The record type is used as-is, so distinct types never share a table.
/// Types that are not plain identifiers are rejected.
pub fn table_name(record_type: &str) -> AppResult<String> {
    if !TABLE_NAME.is_match(record_type) {
        return Err(validation_error(format!(
            "Record type \"{}\" cannot be used as a table name",
            record_type
        )));
    }
    Ok(record_type.to_string())
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Record store backed by PostgreSQL
pub struct PgRecordStore {
    pool: Pool,
    /// Tables known to exist, so CREATE TABLE runs once per type
    known_tables: RwLock<HashSet<String>>,
}

impl PgRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            known_tables: RwLock::new(HashSet::new()),
        }
    }

    async fn ensure_table(&self, table: &str) -> AppResult<()> {
        if self.known_tables.read().await.contains(table) {
            return Ok(());
        }

        let client = self.pool.get().await?;
        client.execute(queries::create_table(table).as_str(), &[]).await?;
        self.known_tables.write().await.insert(table.to_string());

        info!("Created record table \"{}\"", table);
        Ok(())
    }

    fn row_to_record(record_type: &str, row: &tokio_postgres::Row) -> Record {
        let id_value: Value = row.get(0);
        let data: Value = row.get(1);
        Record {
            record_type: record_type.to_string(),
            id: RecordId::from_value(&id_value),
            data: super::decode_mapping(&data),
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn table_exists(&self, record_type: &str) -> AppResult<bool> {
        let table = table_name(record_type)?;
        if self.known_tables.read().await.contains(&table) {
            return Ok(true);
        }

        let client = self.pool.get().await?;
        let row = client.query_one(queries::TABLE_EXISTS, &[&table]).await?;
        let exists: bool = row.get(0);
        if exists {
            self.known_tables.write().await.insert(table);
        }
        Ok(exists)
    }

    async fn find(&self, record_type: &str, query: &Query) -> AppResult<Vec<Record>> {
        if !self.table_exists(record_type).await? {
            return Ok(Vec::new());
        }
        let table = table_name(record_type)?;

        let mut params: Vec<BoxedParam> = Vec::new();
        for (field, value) in query.filters() {
            params.push(Box::new(field.clone()));
            params.push(Box::new(value.clone()));
        }
        let directions: Vec<&'static str> = query
            .ordering()
            .iter()
            .map(|(field, direction)| {
                params.push(Box::new(field.clone()));
                direction.as_sql()
            })
            .collect();
        if let Some(limit) = query.limit_value() {
            params.push(Box::new(to_i64(limit)?));
        }
        params.push(Box::new(to_i64(query.offset_value())?));

        let sql = queries::select_matching(
            &table,
            query.filters().len(),
            &directions,
            query.limit_value().is_some(),
        );
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &refs).await?;
        debug!("Query on \"{}\" returned {} rows", table, rows.len());

        Ok(rows
            .iter()
            .map(|row| Self::row_to_record(record_type, row))
            .collect())
    }

    async fn load(&self, record_type: &str, id: &RecordId) -> AppResult<Record> {
        if !self.table_exists(record_type).await? {
            return Ok(Record::unresolved(record_type));
        }
        let table = table_name(record_type)?;

        let client = self.pool.get().await?;
        let row = client
            .query_opt(queries::select_by_id(&table).as_str(), &[&id.key()])
            .await?;

        Ok(match row {
            Some(row) => Self::row_to_record(record_type, &row),
            None => Record::unresolved(record_type),
        })
    }

    async fn save(&self, record: &Record, changed_fields: Option<&[String]>) -> AppResult<bool> {
        let (record_type, id) = record.identity()?;
        let table = table_name(record_type)?;

        match changed_fields {
            None => {
                self.ensure_table(&table).await?;
                let data = Value::Object(record.data.clone());
                let client = self.pool.get().await?;
                client
                    .execute(
                        queries::upsert(&table).as_str(),
                        &[&id.key(), &id.to_value(), &data],
                    )
                    .await?;
                debug!("Saved {} {}", record_type, id);
                Ok(true)
            }
            Some(fields) => {
                if fields.is_empty() {
                    return Err(validation_error("No fields given for a partial update"));
                }
                if !self.table_exists(record_type).await? {
                    return Ok(false);
                }

                let mut patch = Mapping::new();
                let mut dropped: Vec<String> = Vec::new();
                for field in fields {
                    match record.data.get(field) {
                        Some(value) => {
                            patch.insert(field.clone(), value.clone());
                        }
                        None => dropped.push(field.clone()),
                    }
                }
                let patch = Value::Object(patch);

                let client = self.pool.get().await?;
                let updated = client
                    .execute(
                        queries::merge_fields(&table).as_str(),
                        &[&id.key(), &patch, &dropped],
                    )
                    .await?;
                debug!("Updated {} {}: {:?} ({} rows)", record_type, id, fields, updated);
                Ok(updated > 0)
            }
        }
    }
}

fn to_i64(n: usize) -> AppResult<i64> {
    i64::try_from(n).map_err(|_| AppError::Internal(format!("Pagination value {} out of range", n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_keeps_identifiers() {
        assert_eq!(table_name("object_revisions").unwrap(), "object_revisions");
        assert_eq!(table_name("NewsItem").unwrap(), "NewsItem");
        assert_ne!(table_name("NewsItem").unwrap(), table_name("newsitem").unwrap());
    }

    #[test]
    fn test_table_name_rejects_unusable_types() {
        // Rewriting these would merge them into the news_item table
        assert!(table_name("news-item").is_err());
        assert!(table_name("news.item").is_err());
        assert!(table_name("App/News").is_err());
        assert!(table_name(" news").is_err());
        assert!(table_name("").is_err());
        assert!(table_name("9lives").is_err());
        assert!(table_name(&"x".repeat(80)).is_err());
    }
}
