//! Record store port
//!
//! The storage collaborator used by revisions and scheduled mutations.
//! Revisions and schedules are themselves records, keyed by their own type.

use super::{Query, Record, RecordId};
use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Generic record storage keyed by (record type, id)
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether any storage exists yet for this record type
    async fn table_exists(&self, record_type: &str) -> AppResult<bool>;

    /// All records of a type matching the query
    async fn find(&self, record_type: &str, query: &Query) -> AppResult<Vec<Record>>;

    /// First record of the query's ordering, or `None`
    async fn find_latest(&self, record_type: &str, query: &Query) -> AppResult<Option<Record>> {
        let query = query.clone().limit(1);
        Ok(self.find(record_type, &query).await?.into_iter().next())
    }

    /// Load one record. A missing row yields a record whose `id` is `None`.
    async fn load(&self, record_type: &str, id: &RecordId) -> AppResult<Record>;

    /// Persist a record.
    ///
    /// With `changed_fields = None` the whole record is upserted and the call
    /// returns `true`. With `Some(fields)` only those fields are merged into
    /// an existing row; `false` means no such row exists.
    async fn save(&self, record: &Record, changed_fields: Option<&[String]>) -> AppResult<bool>;
}

/// Type alias for a shared store handle
pub type SharedRecordStore = Arc<dyn RecordStore>;
