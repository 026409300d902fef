//! In-memory record store
//!
//! Keeps every record type in its own table, created on first save.
//! Used by the worker when no database is configured, and by tests.

use super::{Mapping, Query, Record, RecordId, RecordStore};
use crate::error::{validation_error, AppResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A stored row: the original id plus its state
#[derive(Debug, Clone)]
struct Row {
    id: RecordId,
    data: Mapping,
}

/// Thread-safe in-memory store
pub struct MemoryRecordStore {
    /// Record type -> (id key -> row)
    tables: Arc<RwLock<HashMap<String, BTreeMap<String, Row>>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of rows stored for a record type
    pub async fn count(&self, record_type: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(record_type).map(BTreeMap::len).unwrap_or(0)
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn table_exists(&self, record_type: &str) -> AppResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.contains_key(record_type))
    }

    async fn find(&self, record_type: &str, query: &Query) -> AppResult<Vec<Record>> {
        let tables = self.tables.read().await;
        let rows: Vec<Record> = tables
            .get(record_type)
            .map(|table| {
                table
                    .values()
                    .map(|row| Record {
                        record_type: record_type.to_string(),
                        id: Some(row.id.clone()),
                        data: row.data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(query.apply(rows))
    }

    async fn load(&self, record_type: &str, id: &RecordId) -> AppResult<Record> {
        let tables = self.tables.read().await;
        let row = tables.get(record_type).and_then(|t| t.get(&id.key()));

        Ok(match row {
            Some(row) => Record {
                record_type: record_type.to_string(),
                id: Some(row.id.clone()),
                data: row.data.clone(),
            },
            None => Record::unresolved(record_type),
        })
    }

    async fn save(&self, record: &Record, changed_fields: Option<&[String]>) -> AppResult<bool> {
        let (record_type, id) = record.identity()?;
        let mut tables = self.tables.write().await;

        match changed_fields {
            None => {
                let table = tables.entry(record_type.to_string()).or_default();
                table.insert(
                    id.key(),
                    Row {
                        id: id.clone(),
                        data: record.data.clone(),
                    },
                );
                tracing::debug!("Saved {} {} ({} fields)", record_type, id, record.data.len());
                Ok(true)
            }
            Some(fields) => {
                if fields.is_empty() {
                    return Err(validation_error("No fields given for a partial update"));
                }
                let Some(row) = tables.get_mut(record_type).and_then(|t| t.get_mut(&id.key())) else {
                    tracing::debug!("Update skipped: {} {} does not exist", record_type, id);
                    return Ok(false);
                };
                for field in fields {
                    match record.data.get(field) {
                        Some(value) => {
                            row.data.insert(field.clone(), value.clone());
                        }
                        None => {
                            row.data.remove(field);
                        }
                    }
                }
                tracing::debug!("Updated {} {}: {:?}", record_type, id, fields);
                Ok(true)
            }
        }
    }
}
