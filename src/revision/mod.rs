//! Revision Module
//!
//! Sequential history of record state. This module provides:
//! - The structural diff engine (what was removed, what was added)
//! - Immutable revisions (before/after snapshots plus their diff)
//! - The revision store (create, latest, by number, history)

pub mod diff;
pub mod model;
pub mod store;

pub use diff::{DataDiff, DiffEngine, DiffSummary};
pub use model::{Revision, RevisionBuilder, RevisionMetadata};
pub use store::RevisionStore;
