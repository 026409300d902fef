//! Application state management
//!
//! Contains the shared stores the worker and library callers operate on.

use crate::config::Settings;
use crate::record::SharedRecordStore;
use crate::revision::RevisionStore;
use crate::schedule::Scheduler;
use std::sync::Arc;

/// Application state shared across tasks
pub struct AppState {
    /// Record storage backing targets, revisions and schedules
    pub store: SharedRecordStore,

    /// Revision history of target records
    pub revisions: RevisionStore,

    /// Scheduled mutation queue and its processor
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(store: SharedRecordStore, settings: &Settings) -> Self {
        Self {
            revisions: RevisionStore::new(store.clone(), settings.scheduler.revision_type.clone()),
            scheduler: Scheduler::new(store.clone(), &settings.scheduler),
            store,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
