//! Read-side helpers over a user's stored travel entries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::models::{TravelEntry, TravelHistorySummary};

/// Entries departing within `[from, to]` (either bound optional), oldest first.
pub fn filter_entries(
    entries: &[TravelEntry],
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    include_unverified: bool,
) -> Vec<TravelEntry> {
    let mut selected: Vec<TravelEntry> = entries
        .iter()
        .filter(|e| from.map_or(true, |from| e.departure_date >= from))
        .filter(|e| to.map_or(true, |to| e.departure_date <= to))
        .filter(|e| include_unverified || e.is_verified)
        .cloned()
        .collect();
    selected.sort_by_key(|e| e.departure_date);
    selected
}

pub fn summarize(entries: &[TravelEntry]) -> TravelHistorySummary {
    let mut source_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries {
        *source_breakdown.entry(entry.source_type.as_str().to_string()).or_default() += 1;
    }
    let countries: BTreeSet<&str> = entries.iter().map(|e| e.destination_country.as_str()).collect();
    let verified = entries.iter().filter(|e| e.is_verified).count();

    TravelHistorySummary {
        total_trips: entries.len(),
        total_days_abroad: entries.iter().map(TravelEntry::days).sum(),
        countries_visited: countries.into_iter().map(str::to_string).collect(),
        first_departure: entries.iter().map(|e| e.departure_date).min(),
        last_return: entries.iter().map(|e| e.return_date).max(),
        source_breakdown,
        verified,
        unverified: entries.len() - verified,
    }
}

/// The user's explicit review of an entry. Returns the updated record; the stored
/// one is replaced by the caller.
pub fn apply_verification(entry: &TravelEntry, is_valid: bool, notes: Option<String>) -> TravelEntry {
    TravelEntry {
        is_verified: is_valid,
        verification_notes: notes.or_else(|| entry.verification_notes.clone()),
        ..entry.clone()
    }
}
