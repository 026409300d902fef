//! Recordkeeper
//!
//! Revision history and scheduled mutations for generic typed records.
//! Revisions capture a record's full state after each change plus a
//! structural diff against the previous revision; scheduled mutations
//! overwrite chosen properties of a record once their due time passes.

pub mod config;
pub mod db;
pub mod error;
pub mod record;
pub mod revision;
pub mod schedule;
pub mod state;
pub mod timestamp;

pub use error::{AppError, AppResult};
pub use record::{Mapping, Record, RecordId, RecordStore};
pub use revision::{DataDiff, DiffEngine, Revision, RevisionStore};
pub use schedule::{ApplyHooks, ApplyOutcome, ScheduledMutation, Scheduler};
