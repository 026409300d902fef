//! Schedule Store
//!
//! Persists scheduled mutations and finds the ones that are due.

use super::model::{fields, ScheduledMutation};
use crate::error::{persist_error, AppResult};
use crate::record::{Direction, Query, RecordId, SharedRecordStore};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Storage of scheduled mutations under one record type
pub struct ScheduleStore {
    store: SharedRecordStore,
    record_type: String,
}

impl ScheduleStore {
    pub fn new(store: SharedRecordStore, record_type: impl Into<String>) -> Self {
        Self {
            store,
            record_type: record_type.into(),
        }
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Queue a mutation. Whatever its state, it is stored as pending.
    pub async fn schedule(&self, mut mutation: ScheduledMutation) -> AppResult<ScheduledMutation> {
        mutation.reset_pending();

        let record = mutation.to_record(&self.record_type);
        if !self.store.save(&record, None).await? {
            return Err(persist_error(format!("Could not save scheduled mutation {}", mutation.id())));
        }

        info!(
            "Scheduled mutation {} for {} {} at {}",
            mutation.id(),
            mutation.target_type().unwrap_or("?"),
            mutation.target_id().map(RecordId::key).unwrap_or_default(),
            mutation
                .scheduled_at()
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "once due".to_string())
        );
        Ok(mutation)
    }

    pub async fn get(&self, id: &RecordId) -> AppResult<Option<ScheduledMutation>> {
        let record = self.store.load(&self.record_type, id).await?;
        if record.id.is_none() {
            return Ok(None);
        }
        ScheduledMutation::from_record(&record).map(Some)
    }

    /// Pending mutations due at `now`, earliest first (unscheduled ones
    /// before any dated one), at most `limit` of them.
    ///
    /// The processed flag is judged on the decoded row, so loosely stored
    /// flags (`0`, `"0"`, null, missing) count as pending. Rows that no
    /// longer decode, and mutations that can never be applied, are logged
    /// and left out so they cannot hold up the queue.
    pub async fn due(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Vec<ScheduledMutation>> {
        if !self.store.table_exists(&self.record_type).await? {
            return Ok(Vec::new());
        }

        let query = Query::new().order_by(fields::SCHEDULED_DATE, Direction::Asc);
        let records = self.store.find(&self.record_type, &query).await?;

        let due: Vec<ScheduledMutation> = records
            .iter()
            .filter_map(|record| match ScheduledMutation::from_record(record) {
                Ok(mutation) => Some(mutation),
                Err(e) => {
                    warn!(
                        "Ignoring unreadable scheduled mutation {}: {}",
                        record.id.as_ref().map(RecordId::key).unwrap_or_default(),
                        e
                    );
                    None
                }
            })
            .filter(|mutation| mutation.is_due(now))
            .filter(|mutation| match mutation.applicable_target() {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        "Ignoring scheduled mutation {} for {} {}: {}",
                        mutation.id(),
                        mutation.target_type().unwrap_or("?"),
                        mutation.target_id().map(RecordId::key).unwrap_or_default(),
                        e
                    );
                    false
                }
            })
            .take(limit)
            .collect();

        debug!("{} scheduled mutations due at {}", due.len(), now);
        Ok(due)
    }

    /// Every mutation ever queued for one target, earliest first
    pub async fn for_target(&self, target_type: &str, target_id: &RecordId) -> AppResult<Vec<ScheduledMutation>> {
        if !self.store.table_exists(&self.record_type).await? {
            return Ok(Vec::new());
        }

        let query = Query::new()
            .filter(fields::TARGET_TYPE, target_type)
            .filter(fields::TARGET_ID, target_id.to_value())
            .order_by(fields::SCHEDULED_DATE, Direction::Asc);

        self.store
            .find(&self.record_type, &query)
            .await?
            .iter()
            .map(ScheduledMutation::from_record)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{mapping, MemoryRecordStore, Record, RecordStore};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn schedules() -> (Arc<MemoryRecordStore>, ScheduleStore) {
        let store = Arc::new(MemoryRecordStore::new());
        let schedules = ScheduleStore::new(store.clone(), "object_schedules");
        (store, schedules)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn mutation(id: &str, when: Option<DateTime<Utc>>) -> ScheduledMutation {
        let builder = ScheduledMutation::builder()
            .id(id)
            .target_type("news")
            .target_id(1)
            .set("active", false);
        match when {
            Some(when) => builder.scheduled_at(when).build(),
            None => builder.build(),
        }
    }

    fn ids(mutations: &[ScheduledMutation]) -> Vec<String> {
        mutations.iter().map(|m| m.id().key()).collect()
    }

    #[tokio::test]
    async fn test_schedule_resets_processed_state() {
        let (_, schedules) = schedules();
        let mut m = mutation("s1", None);
        m.mark_processed(at(1));

        let stored = tokio_test::assert_ok!(schedules.schedule(m).await);
        assert!(!stored.processed());
        assert!(stored.processed_at().is_none());

        let loaded = schedules.get(&RecordId::from("s1")).await.unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_, schedules) = schedules();
        assert!(schedules.get(&RecordId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_without_storage_is_empty() {
        let (_, schedules) = schedules();
        assert!(schedules.due(at(12), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_orders_and_filters() {
        let (store, schedules) = schedules();
        schedules.schedule(mutation("late", Some(at(11)))).await.unwrap();
        schedules.schedule(mutation("future", Some(at(15)))).await.unwrap();
        schedules.schedule(mutation("now", None)).await.unwrap();
        schedules.schedule(mutation("early", Some(at(9)))).await.unwrap();

        // Already applied rows are not due
        let mut done = mutation("done", Some(at(8)));
        done.mark_processed(at(8));
        store.save(&done.to_record("object_schedules"), None).await.unwrap();

        let due = schedules.due(at(12), 10).await.unwrap();
        assert_eq!(ids(&due), vec!["now", "early", "late"]);

        let due = schedules.due(at(12), 2).await.unwrap();
        assert_eq!(ids(&due), vec!["now", "early"]);

        let due = schedules.due(at(12) + Duration::hours(4), 10).await.unwrap();
        assert_eq!(ids(&due), vec!["now", "early", "late", "future"]);
    }

    #[tokio::test]
    async fn test_due_skips_unreadable_rows() {
        let (store, schedules) = schedules();
        schedules.schedule(mutation("ok", None)).await.unwrap();
        let broken = Record::new(
            "object_schedules",
            "broken",
            mapping(json!({"processed": false, "scheduled_date": "someday"})),
        );
        store.save(&broken, None).await.unwrap();

        let due = schedules.due(at(12), 10).await.unwrap();
        assert_eq!(ids(&due), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_due_accepts_loosely_stored_pending_flags() {
        let (store, schedules) = schedules();
        for (id, flag) in [("int", json!(0)), ("text", json!("0")), ("null", json!(null))] {
            let row = Record::new(
                "object_schedules",
                id,
                mapping(json!({
                    "target_type": "news",
                    "target_id": 1,
                    "data_diff": {"active": false},
                    "processed": flag
                })),
            );
            store.save(&row, None).await.unwrap();
        }
        let done = Record::new(
            "object_schedules",
            "done",
            mapping(json!({
                "target_type": "news",
                "target_id": 1,
                "data_diff": {"active": false},
                "processed": 1
            })),
        );
        store.save(&done, None).await.unwrap();

        let mut found = ids(&schedules.due(at(12), 10).await.unwrap());
        found.sort();
        assert_eq!(found, vec!["int", "null", "text"]);
    }

    #[tokio::test]
    async fn test_due_leaves_out_unapplicable_mutations() {
        let (_, schedules) = schedules();
        let no_changes = ScheduledMutation::builder()
            .id("no-changes")
            .target_type("news")
            .target_id(1)
            .build();
        let no_target = ScheduledMutation::builder().id("no-target").set("active", true).build();
        schedules.schedule(no_changes).await.unwrap();
        schedules.schedule(no_target).await.unwrap();
        schedules.schedule(mutation("ok", Some(at(9)))).await.unwrap();

        let due = schedules.due(at(12), 1).await.unwrap();
        assert_eq!(ids(&due), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_for_target() {
        let (_, schedules) = schedules();
        schedules.schedule(mutation("a", Some(at(10)))).await.unwrap();
        schedules.schedule(mutation("b", Some(at(9)))).await.unwrap();
        let other = ScheduledMutation::builder()
            .id("c")
            .target_type("news")
            .target_id(2)
            .set("active", true)
            .build();
        schedules.schedule(other).await.unwrap();

        let found = schedules.for_target("news", &RecordId::Int(1)).await.unwrap();
        assert_eq!(ids(&found), vec!["b", "a"]);
    }
}
