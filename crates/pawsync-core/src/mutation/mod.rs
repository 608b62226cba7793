//! Optimistic mutations.
//!
//! - `engine`: create/update/delete with snapshot and rollback
//! - `records`: in-place edits of cached records and lists
//! - `derived`: derived-view keys and the invalidation table

pub mod derived;
pub mod engine;
pub mod records;

pub use derived::{
    budget_alerts_key, budget_status_key, derived_invalidations, expense_stats_key,
    expenses_by_category_key,
};
pub use engine::{MutationEngine, MutationKind, MutationPhase, PendingMutation};
