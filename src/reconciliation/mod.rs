pub mod engine;
pub mod lock;

pub use engine::{confidence_score, ReconciliationEngine, TripSpan};
pub use lock::{UserLockGuard, UserLocks};

use serde::{Deserialize, Serialize};

use crate::models::TravelEntry;

/// A proposed trip that overlaps an entry the user already has. Never applied
/// automatically; left for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateFlag {
    pub existing_entry_id: String,
    pub proposed: TravelEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    /// New unverified entries, ordered by departure date.
    pub new_entries: Vec<TravelEntry>,
    pub duplicates: Vec<DuplicateFlag>,
    /// Candidates that lacked a country or a date.
    pub dropped_candidates: usize,
}
