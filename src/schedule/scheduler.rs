//! Scheduler loop
//!
//! Periodically asks every due mutation to apply itself.

use super::processor::{ApplyHooks, ApplyOutcome, MutationProcessor};
use super::model::ScheduledMutation;
use super::store::ScheduleStore;
use crate::config::SchedulerConfig;
use crate::error::AppResult;
use crate::record::{RecordId, SharedRecordStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Counts of one scheduler pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.failed
    }
}

pub struct Scheduler {
    schedules: ScheduleStore,
    processor: MutationProcessor,
    batch_size: usize,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(store: SharedRecordStore, config: &SchedulerConfig) -> Self {
        Self {
            schedules: ScheduleStore::new(store.clone(), config.schedule_type.clone()),
            processor: MutationProcessor::new(store, config.schedule_type.clone(), config.load_failure_policy),
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn schedules(&self) -> &ScheduleStore {
        &self.schedules
    }

    pub fn processor(&self) -> &MutationProcessor {
        &self.processor
    }

    /// Apply up to `batch_size` mutations due at `now`, one after another.
    ///
    /// A failing mutation stays pending for the next pass and does not use
    /// up the batch: the due list is read again past every mutation already
    /// tried in this pass, until the batch is full or nothing new is due.
    /// Only errors reading the due list abort the pass.
    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        let mut tried: HashSet<RecordId> = HashSet::new();

        while summary.applied + summary.skipped < self.batch_size {
            let wanted = tried.len() + (self.batch_size - summary.applied - summary.skipped);
            let fresh: Vec<ScheduledMutation> = self
                .schedules
                .due(now, wanted)
                .await?
                .into_iter()
                .filter(|mutation| !tried.contains(mutation.id()))
                .collect();
            if fresh.is_empty() {
                break;
            }

            for mut mutation in fresh {
                tried.insert(mutation.id().clone());
                match self.processor.apply(&mut mutation, &mut ApplyHooks::new()).await {
                    Ok(ApplyOutcome::Applied) => summary.applied += 1,
                    Ok(ApplyOutcome::Skipped) => summary.skipped += 1,
                    Err(e) => {
                        if e.is_permanent() {
                            warn!("Scheduled mutation {} can never be applied: {}", mutation.id(), e);
                        }
                        summary.failed += 1;
                    }
                }
            }
        }

        if summary.total() > 0 {
            info!(
                "Scheduler pass: {} applied, {} skipped, {} failed",
                summary.applied, summary.skipped, summary.failed
            );
        }
        Ok(summary)
    }

    /// Run passes every poll interval until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("⏱️  Scheduler polling every {:?}", self.poll_interval);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!(code = e.code(), "Scheduler pass failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{mapping, MemoryRecordStore, Record, RecordId, RecordStore};
    use crate::schedule::ScheduledMutation;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    async fn setup() -> (Arc<MemoryRecordStore>, Scheduler) {
        let store = Arc::new(MemoryRecordStore::new());
        for id in 1..=2 {
            let news = Record::new("news", id, mapping(json!({"title": "a", "active": true})));
            store.save(&news, None).await.unwrap();
        }
        let scheduler = Scheduler::new(store.clone(), &SchedulerConfig::default());
        (store, scheduler)
    }

    #[tokio::test]
    async fn test_run_once_applies_due_mutations_once() {
        let (store, scheduler) = setup().await;
        let now = Utc::now();

        let due = ScheduledMutation::new("news", 1, mapping(json!({"active": false})));
        let later = ScheduledMutation::builder()
            .target_type("news")
            .target_id(2)
            .set("title", "b")
            .scheduled_at(now + ChronoDuration::hours(1))
            .build();
        scheduler.schedules().schedule(due).await.unwrap();
        scheduler.schedules().schedule(later).await.unwrap();

        let summary = tokio_test::assert_ok!(scheduler.run_once(now).await);
        assert_eq!(summary, BatchSummary { applied: 1, skipped: 0, failed: 0 });

        let news = store.load("news", &RecordId::Int(1)).await.unwrap();
        assert_eq!(news.get("active"), Some(&json!(false)));
        let news = store.load("news", &RecordId::Int(2)).await.unwrap();
        assert_eq!(news.get("title"), Some(&json!("a")));

        // Processed state was persisted, so nothing is due again
        let summary = scheduler.run_once(now).await.unwrap();
        assert_eq!(summary.total(), 0);

        let summary = scheduler.run_once(now + ChronoDuration::hours(2)).await.unwrap();
        assert_eq!(summary.applied, 1);
        let news = store.load("news", &RecordId::Int(2)).await.unwrap();
        assert_eq!(news.get("title"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn test_failures_stay_pending_and_do_not_stop_the_batch() {
        let (_, scheduler) = setup().await;
        let now = Utc::now();

        scheduler
            .schedules()
            .schedule(ScheduledMutation::new("news", 404, mapping(json!({"active": false}))))
            .await
            .unwrap();
        scheduler
            .schedules()
            .schedule(ScheduledMutation::builder().target_type("news").target_id(1).build())
            .await
            .unwrap();
        scheduler
            .schedules()
            .schedule(ScheduledMutation::new("news", 2, mapping(json!({"active": false}))))
            .await
            .unwrap();

        // The change-less mutation is never picked up; the missing target is
        // retried on every pass
        let summary = scheduler.run_once(now).await.unwrap();
        assert_eq!(summary, BatchSummary { applied: 1, skipped: 0, failed: 1 });

        let summary = scheduler.run_once(now).await.unwrap();
        assert_eq!(summary, BatchSummary { applied: 0, skipped: 0, failed: 1 });
    }

    fn single_slot_scheduler(store: Arc<MemoryRecordStore>) -> Scheduler {
        let config = SchedulerConfig {
            batch_size: 1,
            ..SchedulerConfig::default()
        };
        Scheduler::new(store, &config)
    }

    #[tokio::test]
    async fn test_unapplicable_mutation_does_not_starve_the_queue() {
        let (store, _) = setup().await;
        let scheduler = single_slot_scheduler(store.clone());

        // Unscheduled, so it sorts ahead of everything else
        let broken = ScheduledMutation::builder().id("bad").target_type("news").target_id(1).build();
        let valid = ScheduledMutation::builder()
            .id("good")
            .target_type("news")
            .target_id(1)
            .set("active", false)
            .scheduled_date("2020-01-01 00:00:00")
            .unwrap()
            .build();
        scheduler.schedules().schedule(broken).await.unwrap();
        scheduler.schedules().schedule(valid).await.unwrap();

        let summary = scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary, BatchSummary { applied: 1, skipped: 0, failed: 0 });

        let news = store.load("news", &RecordId::Int(1)).await.unwrap();
        assert_eq!(news.get("active"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_retryable_failures_do_not_fill_the_batch() {
        let (store, _) = setup().await;
        let scheduler = single_slot_scheduler(store.clone());

        for missing in [404, 405] {
            scheduler
                .schedules()
                .schedule(ScheduledMutation::new("news", missing, mapping(json!({"active": false}))))
                .await
                .unwrap();
        }
        let valid = ScheduledMutation::builder()
            .target_type("news")
            .target_id(2)
            .set("active", false)
            .scheduled_date("2020-01-01")
            .unwrap()
            .build();
        scheduler.schedules().schedule(valid).await.unwrap();

        let summary = scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary, BatchSummary { applied: 1, skipped: 0, failed: 2 });

        let news = store.load("news", &RecordId::Int(2)).await.unwrap();
        assert_eq!(news.get("active"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_batch_size_limits_a_pass() {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .save(&Record::new("news", 1, mapping(json!({"n": 0}))), None)
            .await
            .unwrap();
        let config = SchedulerConfig {
            batch_size: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(store.clone(), &config);
        for n in 1..=3 {
            scheduler
                .schedules()
                .schedule(ScheduledMutation::new("news", 1, mapping(json!({"n": n}))))
                .await
                .unwrap();
        }

        assert_eq!(scheduler.run_once(Utc::now()).await.unwrap().applied, 2);
        assert_eq!(scheduler.run_once(Utc::now()).await.unwrap().applied, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (store, scheduler) = setup().await;
        scheduler
            .schedules()
            .schedule(ScheduledMutation::new("news", 1, mapping(json!({"active": false}))))
            .await
            .unwrap();

        // First tick fires immediately, then the shutdown future wins
        scheduler
            .run(tokio::time::sleep(std::time::Duration::from_millis(50)))
            .await;

        let news = store.load("news", &RecordId::Int(1)).await.unwrap();
        assert_eq!(news.get("active"), Some(&json!(false)));
    }
}
