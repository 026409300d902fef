//! Revision Store
//!
//! Produces sequential revisions of target records and reads them back.
//! Think of this as "git commits" for a record's state.

use super::diff::{DataDiff, DiffEngine};
use super::model::{fields, Revision};
use crate::error::{not_found_error, persist_error, AppResult};
use crate::record::{Direction, Mapping, Query, Record, RecordId, SharedRecordStore};
use serde_json::Value;
use tracing::{debug, info};

/// Field of a target record naming the actor of its last change
pub const LAST_MODIFIED_BY: &str = "last_modified_by";

/// Store for creating and retrieving revisions
pub struct RevisionStore {
    store: SharedRecordStore,
    /// Record type revisions are persisted under
    record_type: String,
}

impl RevisionStore {
    pub fn new(store: SharedRecordStore, record_type: impl Into<String>) -> Self {
        Self {
            store,
            record_type: record_type.into(),
        }
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Create and persist the next revision of `target`.
    ///
    /// The previous revision's snapshot (or an empty one) becomes the
    /// "before" state; the target's current data is the "after" state.
    /// `actor` defaults to the target's `last_modified_by` field.
    pub async fn create_revision(&self, target: &Record, actor: Option<&str>) -> AppResult<Revision> {
        let (target_type, target_id) = target.identity()?;

        let previous = self.latest_revision(target_type, target_id).await?;
        let (prev_num, data_prev) = match &previous {
            Some(rev) => (rev.rev_num(), rev.data_obj().clone()),
            None => (0, Mapping::new()),
        };

        let rev_user = actor.map(str::to_string).or_else(|| match target.get(LAST_MODIFIED_BY) {
            Some(Value::String(user)) if !user.is_empty() => Some(user.clone()),
            _ => None,
        });

        let revision = Revision::builder(target_type, target_id.clone())
            .rev_num(prev_num + 1)
            .rev_user(rev_user)
            .data_prev(data_prev)
            .data_obj(target.data.clone())
            .build()?;

        let record = revision.to_record(&self.record_type);
        if !self.store.save(&record, None).await? {
            return Err(persist_error(format!(
                "Could not save revision {} of {} {}",
                revision.rev_num(),
                target_type,
                target_id
            )));
        }

        let summary = revision.data_diff().summary();
        info!(
            "Saved revision #{} for {} {}: {} added, {} removed, {} modified",
            revision.rev_num(),
            target_type,
            target_id,
            summary.added,
            summary.removed,
            summary.modified
        );

        Ok(revision)
    }

    /// The highest-numbered revision of a target, or `None` when there is
    /// no history (including when no revision was ever stored)
    pub async fn latest_revision(&self, target_type: &str, target_id: &RecordId) -> AppResult<Option<Revision>> {
        if !self.store.table_exists(&self.record_type).await? {
            debug!("No revision storage yet for {} {}", target_type, target_id);
            return Ok(None);
        }

        let query = Self::target_query(target_type, target_id)
            .order_by(fields::REV_NUM, Direction::Desc)
            .order_by(fields::REV_TS, Direction::Desc);

        self.store
            .find_latest(&self.record_type, &query)
            .await?
            .map(|record| Revision::from_record(&record))
            .transpose()
    }

    /// A specific revision by number, with the same absence policy as
    /// [`RevisionStore::latest_revision`]
    pub async fn revision_by_number(
        &self,
        target_type: &str,
        target_id: &RecordId,
        rev_num: u64,
    ) -> AppResult<Option<Revision>> {
        if !self.store.table_exists(&self.record_type).await? {
            return Ok(None);
        }

        let query = Self::target_query(target_type, target_id).filter(fields::REV_NUM, rev_num);

        self.store
            .find_latest(&self.record_type, &query)
            .await?
            .map(|record| Revision::from_record(&record))
            .transpose()
    }

    /// Revisions of a target, newest first, one page at a time
    pub async fn history(
        &self,
        target_type: &str,
        target_id: &RecordId,
        page: usize,
        per_page: usize,
    ) -> AppResult<Vec<Revision>> {
        if !self.store.table_exists(&self.record_type).await? {
            return Ok(Vec::new());
        }

        let query = Self::target_query(target_type, target_id)
            .order_by(fields::REV_NUM, Direction::Desc)
            .paginate(page, per_page);

        self.store
            .find(&self.record_type, &query)
            .await?
            .iter()
            .map(Revision::from_record)
            .collect()
    }

    /// Diff between the states at two revision numbers
    pub async fn compare(
        &self,
        target_type: &str,
        target_id: &RecordId,
        from_rev: u64,
        to_rev: u64,
    ) -> AppResult<DataDiff> {
        let from = self
            .revision_by_number(target_type, target_id, from_rev)
            .await?
            .ok_or_else(|| not_found_error(format!("Revision #{} of {} {} not found", from_rev, target_type, target_id)))?;

        let to = self
            .revision_by_number(target_type, target_id, to_rev)
            .await?
            .ok_or_else(|| not_found_error(format!("Revision #{} of {} {} not found", to_rev, target_type, target_id)))?;

        Ok(DiffEngine::diff(from.data_obj(), to.data_obj()))
    }

    fn target_query(target_type: &str, target_id: &RecordId) -> Query {
        Query::new()
            .filter(fields::TARGET_TYPE, target_type)
            .filter(fields::TARGET_ID, target_id.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::record::{mapping, MemoryRecordStore, RecordStore};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn revisions() -> (Arc<MemoryRecordStore>, RevisionStore) {
        let store = Arc::new(MemoryRecordStore::new());
        let revisions = RevisionStore::new(store.clone(), "object_revisions");
        (store, revisions)
    }

    #[tokio::test]
    async fn test_first_revision_starts_at_one_with_empty_before() {
        let (_, revisions) = revisions();
        let target = Record::new("news", 1, mapping(json!({"name": "A", "age": 1})));

        let rev = revisions.create_revision(&target, None).await.unwrap();

        assert_eq!(rev.rev_num(), 1);
        assert!(rev.data_prev().is_empty());
        assert_eq!(rev.data_obj(), &target.data);
        assert_eq!(rev.data_diff().added_or_changed, target.data);
    }

    #[tokio::test]
    async fn test_next_revision_diffs_against_previous_snapshot() {
        let (_, revisions) = revisions();
        let mut target = Record::new("news", 1, mapping(json!({"name": "A", "age": 1})));
        revisions.create_revision(&target, None).await.unwrap();

        target.data = mapping(json!({"name": "B", "age": 1, "city": "X"}));
        let rev = revisions.create_revision(&target, Some("editor")).await.unwrap();

        assert_eq!(rev.rev_num(), 2);
        assert_eq!(rev.rev_user(), Some("editor"));
        assert_eq!(rev.data_prev(), &mapping(json!({"name": "A", "age": 1})));
        assert_eq!(rev.data_diff().removed_or_changed, mapping(json!({"name": "A"})));
        assert_eq!(rev.data_diff().added_or_changed, mapping(json!({"name": "B", "city": "X"})));
    }

    #[tokio::test]
    async fn test_revision_numbers_are_per_target() {
        let (_, revisions) = revisions();
        let a = Record::new("news", 1, mapping(json!({"v": 1})));
        let b = Record::new("news", 2, mapping(json!({"v": 1})));
        let c = Record::new("event", 1, mapping(json!({"v": 1})));

        let mut seen = Vec::new();
        for target in [&a, &b, &a, &c, &a, &b] {
            let rev = revisions.create_revision(target, None).await.unwrap();
            seen.push(rev.rev_num());
        }

        assert_eq!(seen, vec![1, 1, 2, 1, 3, 2]);
    }

    #[tokio::test]
    async fn test_actor_defaults_to_last_modified_by() {
        let (_, revisions) = revisions();
        let target = Record::new("news", 1, mapping(json!({"title": "a", "last_modified_by": "alice"})));

        let rev = revisions.create_revision(&target, None).await.unwrap();
        assert_eq!(rev.rev_user(), Some("alice"));
    }

    #[tokio::test]
    async fn test_target_without_identity_is_rejected() {
        let (store, revisions) = revisions();

        let err = revisions
            .create_revision(&Record::unresolved("news"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = revisions
            .create_revision(&Record::new("", 1, Mapping::new()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.count("object_revisions").await, 0);
    }

    #[tokio::test]
    async fn test_lookups_without_history_are_absent() {
        let (_, revisions) = revisions();
        let id = RecordId::Int(1);

        assert!(revisions.latest_revision("news", &id).await.unwrap().is_none());
        assert!(revisions.revision_by_number("news", &id, 1).await.unwrap().is_none());
        assert!(revisions.history("news", &id, 1, 10).await.unwrap().is_empty());

        // Storage exists, but not for this target
        let other = Record::new("news", 2, mapping(json!({"v": 1})));
        revisions.create_revision(&other, None).await.unwrap();
        assert!(revisions.latest_revision("news", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revision_by_number_and_history() {
        let (_, revisions) = revisions();
        let mut target = Record::new("news", "n1", Mapping::new());
        for v in 1..=4 {
            target.data = mapping(json!({"v": v}));
            revisions.create_revision(&target, None).await.unwrap();
        }
        let id = RecordId::from("n1");

        let rev = revisions.revision_by_number("news", &id, 3).await.unwrap().unwrap();
        assert_eq!(rev.data_obj(), &mapping(json!({"v": 3})));

        let latest = revisions.latest_revision("news", &id).await.unwrap().unwrap();
        assert_eq!(latest.rev_num(), 4);

        let page: Vec<u64> = revisions
            .history("news", &id, 1, 3)
            .await
            .unwrap()
            .iter()
            .map(Revision::rev_num)
            .collect();
        assert_eq!(page, vec![4, 3, 2]);

        let diff = revisions.compare("news", &id, 1, 4).await.unwrap();
        assert_eq!(diff.removed_or_changed, mapping(json!({"v": 1})));
        assert_eq!(diff.added_or_changed, mapping(json!({"v": 4})));

        let missing = revisions.compare("news", &id, 1, 9).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_latest_uses_revision_number_not_timestamp() {
        let (store, revisions) = revisions();
        let ts = crate::timestamp::parse_timestamp("2024-05-01T10:00:00Z").unwrap();

        // Same timestamp for every revision: coarse clock
        for n in 1..=3u64 {
            let rev = Revision::builder("news", RecordId::Int(1))
                .rev_num(n)
                .rev_ts(ts)
                .data_obj(mapping(json!({"n": n})))
                .build()
                .unwrap();
            store.save(&rev.to_record("object_revisions"), None).await.unwrap();
        }

        let target = Record::new("news", 1, mapping(json!({"n": 4})));
        let rev = revisions.create_revision(&target, None).await.unwrap();
        assert_eq!(rev.rev_num(), 4);
        assert_eq!(rev.data_prev(), &mapping(json!({"n": 3})));
    }

    /// Store whose writes are always rejected
    struct RejectingStore(MemoryRecordStore);

    #[async_trait]
    impl RecordStore for RejectingStore {
        async fn table_exists(&self, record_type: &str) -> AppResult<bool> {
            self.0.table_exists(record_type).await
        }

        async fn find(&self, record_type: &str, query: &Query) -> AppResult<Vec<Record>> {
            self.0.find(record_type, query).await
        }

        async fn load(&self, record_type: &str, id: &RecordId) -> AppResult<Record> {
            self.0.load(record_type, id).await
        }

        async fn save(&self, _record: &Record, _changed_fields: Option<&[String]>) -> AppResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_rejected_save_is_a_persist_error() {
        let revisions = RevisionStore::new(Arc::new(RejectingStore(MemoryRecordStore::new())), "object_revisions");
        let target = Record::new("news", 1, mapping(json!({"v": 1})));

        let err = revisions.create_revision(&target, None).await.unwrap_err();
        assert!(matches!(err, AppError::Persist(_)));
    }
}
