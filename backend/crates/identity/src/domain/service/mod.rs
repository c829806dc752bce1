//! Domain Services
//!
//! Pure logic with no I/O: candidate scoring and merge planning.

pub mod merge;
pub mod scoring;

pub use merge::{MasterSelection, MergePlan, plan_merge};
pub use scoring::{best_above, rank, score_all, score_candidate};
