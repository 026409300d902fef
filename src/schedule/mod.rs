//! Schedule Module
//!
//! Deferred, single-shot property updates of target records.
//! This module provides:
//! - Scheduled mutations (what to change, on which record, from when)
//! - The processor (load target, overwrite keys, save, mark processed)
//! - Schedule storage (queueing and finding due mutations)
//! - The scheduler loop that drives due mutations

pub mod model;
pub mod processor;
pub mod scheduler;
pub mod store;

pub use model::{MutationState, ScheduledMutation, ScheduledMutationBuilder};
pub use processor::{ApplyHooks, ApplyOutcome, LoadFailurePolicy, MutationProcessor};
pub use scheduler::{BatchSummary, Scheduler};
pub use store::ScheduleStore;
