//! Scheduled mutation processor
//!
//! Applies one due mutation to its target record, at most once.

use super::model::{fields, ScheduledMutation};
use crate::error::{not_found_error, persist_error, validation_error, AppError, AppResult};
use crate::record::{Record, RecordId, SharedRecordStore};
use chrono::Utc;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

/// What to do when a mutation's target record cannot be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadFailurePolicy {
    /// Report a failure and leave the mutation pending
    #[default]
    Abort,
    /// Log the failure and still attempt the write
    Proceed,
}

impl FromStr for LoadFailurePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(LoadFailurePolicy::Abort),
            "proceed" => Ok(LoadFailurePolicy::Proceed),
            other => Err(validation_error(format!(
                "Load failure policy must be \"abort\" or \"proceed\", got \"{}\"",
                other
            ))),
        }
    }
}

/// Non-error result of an apply call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The target was updated and the mutation is now processed
    Applied,
    /// The mutation had already been processed; nothing happened
    Skipped,
}

type Hook<'a> = Box<dyn FnMut(&ScheduledMutation) + Send + 'a>;

/// Optional observers of one apply call.
///
/// `on_success` or `on_failure` runs at most once, and `on_complete` runs
/// last whenever the target was looked up.
#[derive(Default)]
pub struct ApplyHooks<'a> {
    on_complete: Option<Hook<'a>>,
    on_success: Option<Hook<'a>>,
    on_failure: Option<Hook<'a>>,
}

impl<'a> ApplyHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_complete(mut self, f: impl FnMut(&ScheduledMutation) + Send + 'a) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnMut(&ScheduledMutation) + Send + 'a) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnMut(&ScheduledMutation) + Send + 'a) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    fn complete(&mut self, mutation: &ScheduledMutation) {
        if let Some(f) = self.on_complete.as_mut() {
            f(mutation);
        }
    }

    fn success(&mut self, mutation: &ScheduledMutation) {
        if let Some(f) = self.on_success.as_mut() {
            f(mutation);
        }
    }

    fn failure(&mut self, mutation: &ScheduledMutation) {
        if let Some(f) = self.on_failure.as_mut() {
            f(mutation);
        }
    }
}

/// Applies scheduled mutations to their targets
pub struct MutationProcessor {
    store: SharedRecordStore,
    /// Record type scheduled mutations are persisted under
    schedule_type: String,
    policy: LoadFailurePolicy,
}

impl MutationProcessor {
    pub fn new(store: SharedRecordStore, schedule_type: impl Into<String>, policy: LoadFailurePolicy) -> Self {
        Self {
            store,
            schedule_type: schedule_type.into(),
            policy,
        }
    }

    pub fn policy(&self) -> LoadFailurePolicy {
        self.policy
    }

    /// Apply `mutation` to its target record.
    ///
    /// Already-processed mutations are skipped. Missing target fields or an
    /// empty diff are validation errors raised before any store access. The
    /// target is loaded, the diff's keys are overwritten and only those keys
    /// are saved; on success the mutation is marked processed and that state
    /// is persisted. Failed attempts leave the mutation pending.
    pub async fn apply(&self, mutation: &mut ScheduledMutation, hooks: &mut ApplyHooks<'_>) -> AppResult<ApplyOutcome> {
        if mutation.processed() {
            debug!("Scheduled mutation {} already processed, skipping", mutation.id());
            return Ok(ApplyOutcome::Skipped);
        }

        let (target_type, target_id) = mutation.applicable_target().map_err(|e| {
            error!("Can not process scheduled mutation: {}", e);
            e
        })?;

        let result = self.apply_to_target(mutation, &target_type, &target_id).await;
        match &result {
            Ok(_) => hooks.success(mutation),
            Err(e) => {
                error!(
                    code = e.code(),
                    "Scheduled mutation {} of {} {} failed: {}",
                    mutation.id(),
                    target_type,
                    target_id,
                    e
                );
                hooks.failure(mutation);
            }
        }
        hooks.complete(mutation);

        result
    }

    async fn apply_to_target(
        &self,
        mutation: &mut ScheduledMutation,
        target_type: &str,
        target_id: &RecordId,
    ) -> AppResult<ApplyOutcome> {
        let mut target = self.store.load(target_type, target_id).await?;

        if target.id.is_none() {
            match self.policy {
                LoadFailurePolicy::Abort => {
                    return Err(not_found_error(format!(
                        "Can not load {} {} for scheduled mutation {}",
                        target_type,
                        target_id,
                        mutation.id()
                    )));
                }
                LoadFailurePolicy::Proceed => {
                    warn!(
                        "Can not load {} {} for scheduled mutation {}, attempting the update anyway",
                        target_type,
                        target_id,
                        mutation.id()
                    );
                    target = Record {
                        id: Some(target_id.clone()),
                        ..target
                    };
                }
            }
        }

        target.set_data(mutation.data_diff());
        let changed: Vec<String> = mutation.data_diff().keys().cloned().collect();

        if !self.store.save(&target, Some(&changed)).await? {
            return Err(persist_error(format!(
                "Could not save {} {} with scheduled changes {:?}",
                target_type, target_id, changed
            )));
        }

        mutation.mark_processed(Utc::now());
        self.persist_processed(mutation).await;

        info!(
            "Applied scheduled mutation {} to {} {}: {:?}",
            mutation.id(),
            target_type,
            target_id,
            changed
        );
        Ok(ApplyOutcome::Applied)
    }

    /// Store the processed flag and date. The target write already happened,
    /// so failures here are logged and do not change the outcome.
    async fn persist_processed(&self, mutation: &ScheduledMutation) {
        let record = mutation.to_record(&self.schedule_type);
        let changed = [fields::PROCESSED.to_string(), fields::PROCESSED_DATE.to_string()];

        match self.store.save(&record, Some(&changed)).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Scheduled mutation {} is not stored; processed state kept in memory only",
                mutation.id()
            ),
            Err(e) => error!(
                code = e.code(),
                "Could not store processed state of scheduled mutation {}: {}",
                mutation.id(),
                e
            ),
        }
    }
}
