//! Sync planning and storage recycling.
//!
//! - [`build_plan`] - walk the local tree, list the remote tree, and
//!   produce the upload jobs, deletions, and folder bookkeeping the
//!   pipeline consumes
//! - [`recycle_deleted`] - restore-and-redelete aging deleted files so
//!   the service keeps their revision history alive
//! - [`delete_paths`] - batch deletion with async-job polling

mod error;
mod plan;
mod recycle;

pub use error::PlannerError;
pub use plan::{build_plan, SyncPlan};
pub use recycle::{delete_paths, recycle_deleted, RECYCLE_MAX_AGE_DAYS, RECYCLE_MIN_AGE_DAYS};
