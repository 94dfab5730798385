use std::cmp::Ordering;

use chrono::{Duration, NaiveDate};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::ReconciliationConfig;
use crate::models::rules::airport;
use crate::models::{
    entry_id, ExtractedStampCandidate, FlightConfirmationCandidate, SourceType, StampType, TravelCandidate,
    TravelEntry,
};
use crate::reconciliation::{DuplicateFlag, ReconciliationOutcome};

/// A candidate normalized to a date range in one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSpan {
    pub country: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub city: Option<String>,
    pub airport: Option<String>,
    pub confidence: f32,
    pub source_type: SourceType,
    pub source_id: Option<String>,
}

impl TripSpan {
    fn from_stamp(stamp: &ExtractedStampCandidate) -> Option<Self> {
        let country = stamp.country.clone()?;
        let start = stamp.primary_date()?;
        let end = stamp.exit_date.unwrap_or(start).max(start);
        Some(TripSpan {
            country,
            start,
            end,
            city: stamp.city.clone(),
            airport: stamp.airport_code.clone(),
            confidence: stamp.confidence,
            source_type: SourceType::PassportStamp,
            source_id: stamp.source_id.clone(),
        })
    }

    /// The destination is the arrival airport; unknown airports give no span.
    fn from_flight(flight: &FlightConfirmationCandidate) -> Option<Self> {
        let destination = flight.arrival_airport.as_deref().and_then(airport)?;
        let start = flight.departure_date.or(flight.arrival_date)?;
        let end = flight.arrival_date.unwrap_or(start).max(start);
        Some(TripSpan {
            country: destination.country.to_string(),
            start,
            end,
            city: Some(destination.city.to_string()),
            airport: Some(destination.code.to_string()),
            confidence: flight.confidence(),
            source_type: SourceType::Email,
            source_id: Some(flight.source_email_id.clone()),
        })
    }
}

/// Persisted score: confidence scaled to [0, 100], halves rounded away from zero.
pub fn confidence_score(confidence: f32) -> u8 {
    (confidence as f64 * 100.0).round().clamp(0.0, 100.0) as u8
}

fn source_rank(source: SourceType) -> u8 {
    match source {
        SourceType::PassportStamp => 0,
        SourceType::FlightTracker => 1,
        SourceType::Email => 2,
        SourceType::Manual => 3,
    }
}

/// Orders spans best first: confidence, then earlier start, then stamps over emails.
fn authority(a: &TripSpan, b: &TripSpan) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then(a.start.cmp(&b.start))
        .then(source_rank(a.source_type).cmp(&source_rank(b.source_type)))
}

pub struct ReconciliationEngine {
    tolerance: Duration,
    pair_entry_exit: bool,
    max_pairing: Duration,
}

impl ReconciliationEngine {
    pub fn new(config: &ReconciliationConfig) -> Self {
        ReconciliationEngine {
            tolerance: Duration::days(config.tolerance_days.max(0)),
            pair_entry_exit: config.pair_entry_exit,
            max_pairing: Duration::days(config.max_pairing_days.max(0)),
        }
    }

    /// Proposes new entries for `user_id`. `existing` is only read: overlapping
    /// proposals come back as duplicate flags.
    pub fn reconcile(
        &self,
        user_id: &str,
        candidates: &[TravelCandidate],
        existing: &[TravelEntry],
    ) -> ReconciliationOutcome {
        let (spans, dropped_candidates) = self.spans(candidates);
        let groups = self.group(spans);
        let mut outcome = ReconciliationOutcome {
            dropped_candidates,
            ..Default::default()
        };

        for group in groups {
            let merged = merge(&group);
            let proposed = TravelEntry {
                id: entry_id(user_id, &merged.country, merged.start, merged.end, merged.source_type),
                user_id: user_id.to_string(),
                departure_date: merged.start,
                return_date: merged.end,
                destination_country: merged.country.clone(),
                destination_city: merged.city.clone(),
                purpose: None,
                source_type: merged.source_type,
                source_id: merged.source_id.clone(),
                confidence_score: Some(confidence_score(merged.confidence)),
                is_verified: false,
                verification_notes: None,
            };

            match existing.iter().find(|entry| self.overlaps(entry, &proposed)) {
                Some(entry) => {
                    debug!(
                        "Proposed {} trip {}..{} overlaps existing entry {}",
                        proposed.destination_country, proposed.departure_date, proposed.return_date, entry.id
                    );
                    outcome.duplicates.push(DuplicateFlag {
                        existing_entry_id: entry.id.clone(),
                        proposed,
                    });
                }
                None => outcome.new_entries.push(proposed),
            }
        }

        outcome.new_entries.sort_by_key(|e| (e.departure_date, e.destination_country.clone()));
        info!(
            "Reconciled {} candidates for {}: {} new, {} flagged, {} dropped",
            candidates.len(),
            user_id,
            outcome.new_entries.len(),
            outcome.duplicates.len(),
            outcome.dropped_candidates
        );
        outcome
    }

    /// Normalizes candidates into spans; the count is of candidates that had no
    /// country or no date.
    pub fn spans(&self, candidates: &[TravelCandidate]) -> (Vec<TripSpan>, usize) {
        let mut spans = Vec::new();
        let mut dropped = 0;
        let mut stamps: Vec<&ExtractedStampCandidate> = Vec::new();

        for candidate in candidates {
            match candidate {
                TravelCandidate::Stamp(stamp) => {
                    if stamp.country.is_some() && stamp.primary_date().is_some() {
                        stamps.push(stamp);
                    } else {
                        dropped += 1;
                    }
                }
                TravelCandidate::Flight(flight) => match TripSpan::from_flight(flight) {
                    Some(span) => spans.push(span),
                    None => dropped += 1,
                },
            }
        }

        if self.pair_entry_exit {
            spans.extend(pair_stamps(stamps, self.max_pairing));
        } else {
            spans.extend(stamps.into_iter().filter_map(TripSpan::from_stamp));
        }
        (spans, dropped)
    }

    /// Same-country spans whose start is within tolerance of the running group end
    /// fall into one group.
    pub fn group(&self, mut spans: Vec<TripSpan>) -> Vec<Vec<TripSpan>> {
        spans.sort_by(|a, b| {
            a.country
                .to_lowercase()
                .cmp(&b.country.to_lowercase())
                .then(a.start.cmp(&b.start))
                .then(a.end.cmp(&b.end))
        });

        let mut groups: Vec<Vec<TripSpan>> = Vec::new();
        let mut group_end = NaiveDate::MIN;
        for span in spans {
            let joins = groups.last().map_or(false, |group| {
                group[0].country.eq_ignore_ascii_case(&span.country) && span.start <= group_end + self.tolerance
            });
            if joins {
                group_end = group_end.max(span.end);
                if let Some(group) = groups.last_mut() {
                    group.push(span);
                }
            } else {
                group_end = span.end;
                groups.push(vec![span]);
            }
        }
        groups
    }

    fn overlaps(&self, existing: &TravelEntry, proposed: &TravelEntry) -> bool {
        existing.destination_country.eq_ignore_ascii_case(&proposed.destination_country)
            && proposed.departure_date <= existing.return_date + self.tolerance
            && existing.departure_date <= proposed.return_date + self.tolerance
    }
}

/// Entry stamps are closed by the next exit stamp of the same country, unless another
/// entry or undirected stamp for that country comes first or the exit is more than
/// `max_pairing` after the entry. An unclosed entry stays a single-day span.
fn pair_stamps(mut stamps: Vec<&ExtractedStampCandidate>, max_pairing: Duration) -> Vec<TripSpan> {
    stamps.sort_by_key(|s| s.primary_date());
    let mut used = vec![false; stamps.len()];
    let mut spans = Vec::new();

    for i in 0..stamps.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let Some(mut span) = TripSpan::from_stamp(stamps[i]) else {
            continue;
        };

        let closes_open_entry = stamps[i].stamp_type == StampType::Entry && stamps[i].exit_date.is_none();
        if closes_open_entry {
            if let Some(j) = closing_exit(&stamps, &used, i, span.start, max_pairing) {
                used[j] = true;
                let exit_stamp = stamps[j];
                span.end = exit_stamp.exit_date.unwrap_or(span.end);
                span.confidence = span.confidence.min(exit_stamp.confidence);
                span.city = span.city.or_else(|| exit_stamp.city.clone());
                span.airport = span.airport.or_else(|| exit_stamp.airport_code.clone());
            }
        }
        spans.push(span);
    }
    spans
}

fn closing_exit(
    stamps: &[&ExtractedStampCandidate],
    used: &[bool],
    entry: usize,
    start: NaiveDate,
    max_pairing: Duration,
) -> Option<usize> {
    let country = &stamps[entry].country;
    for j in entry + 1..stamps.len() {
        if used[j] || stamps[j].country != *country {
            continue;
        }
        if stamps[j].stamp_type != StampType::Exit {
            // A later arrival in the same country starts a new stay.
            return None;
        }
        match stamps[j].exit_date {
            Some(exit) if exit >= start && exit - start <= max_pairing => return Some(j),
            Some(exit) if exit - start > max_pairing => return None,
            _ => {}
        }
    }
    None
}

/// Winner's scalars, with city and airport filled in from the rest of the group.
fn merge(group: &[TripSpan]) -> TripSpan {
    let mut ranked: Vec<&TripSpan> = group.iter().collect();
    ranked.sort_by(|a, b| authority(a, b));

    let mut merged = ranked[0].clone();
    for other in &ranked[1..] {
        if merged.city.is_none() {
            merged.city = other.city.clone();
        }
        if merged.airport.is_none() {
            merged.airport = other.airport.clone();
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecognitionMethod;
    use std::collections::BTreeMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stamp(
        country: &str,
        stamp_type: StampType,
        day: NaiveDate,
        confidence: f32,
        city: Option<&str>,
    ) -> TravelCandidate {
        let (entry_date, exit_date) = match stamp_type {
            StampType::Exit => (None, Some(day)),
            _ => (Some(day), None),
        };
        TravelCandidate::Stamp(ExtractedStampCandidate {
            raw_text: String::new(),
            confidence,
            country: Some(country.to_string()),
            city: city.map(str::to_string),
            entry_date,
            exit_date,
            stamp_type,
            airport_code: None,
            source_id: Some(format!("doc-{}", day)),
            method: RecognitionMethod::LegacyOcr,
        })
    }

    fn flight_to(code: &str, departure: NaiveDate, arrival: Option<NaiveDate>) -> TravelCandidate {
        TravelCandidate::Flight(FlightConfirmationCandidate {
            source_email_id: "mail-7".to_string(),
            flight_number: Some("AF 007".to_string()),
            departure_date: Some(departure),
            departure_time: None,
            arrival_date: arrival,
            arrival_time: None,
            departure_airport: Some("JFK".to_string()),
            arrival_airport: Some(code.to_string()),
            airline: Some("Air France".to_string()),
            raw_fields: BTreeMap::new(),
        })
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(&ReconciliationConfig::default())
    }

    #[test]
    fn test_confidence_score_rounding() {
        assert_eq!(confidence_score(0.125), 13);
        assert_eq!(confidence_score(0.7), 70);
        assert_eq!(confidence_score(0.855), 86);
        assert_eq!(confidence_score(1.2), 100);
        assert_eq!(confidence_score(-0.1), 0);
    }

    #[test]
    fn test_overlapping_stamps_become_one_entry() {
        let candidates = vec![
            stamp("Japan", StampType::Unknown, date(2023, 4, 1), 0.75, Some("Tokyo")),
            stamp("Japan", StampType::Unknown, date(2023, 4, 2), 0.9, None),
        ];
        let outcome = engine().reconcile("u1", &candidates, &[]);

        assert_eq!(outcome.new_entries.len(), 1);
        let entry = &outcome.new_entries[0];
        assert_eq!(entry.departure_date, date(2023, 4, 2));
        assert_eq!(entry.confidence_score, Some(90));
        assert_eq!(entry.source_id.as_deref(), Some("doc-2023-04-02"));
        // City merged in from the weaker stamp.
        assert_eq!(entry.destination_city.as_deref(), Some("Tokyo"));
        assert!(!entry.is_verified);
    }

    #[test]
    fn test_distant_spans_stay_separate() {
        let candidates = vec![
            stamp("Japan", StampType::Unknown, date(2023, 4, 1), 0.8, None),
            stamp("Japan", StampType::Unknown, date(2023, 4, 3), 0.8, None),
            stamp("France", StampType::Unknown, date(2023, 4, 1), 0.8, None),
        ];
        let outcome = engine().reconcile("u1", &candidates, &[]);
        assert_eq!(outcome.new_entries.len(), 3);
    }

    #[test]
    fn test_entry_and_exit_stamps_pair_up() {
        let candidates = vec![
            stamp("France", StampType::Exit, date(2023, 6, 10), 0.8, None),
            stamp("France", StampType::Entry, date(2023, 6, 1), 0.9, Some("Paris")),
        ];
        let outcome = engine().reconcile("u1", &candidates, &[]);

        assert_eq!(outcome.new_entries.len(), 1);
        let entry = &outcome.new_entries[0];
        assert_eq!(entry.departure_date, date(2023, 6, 1));
        assert_eq!(entry.return_date, date(2023, 6, 10));
        assert_eq!(entry.confidence_score, Some(80));
        assert_eq!(entry.source_type, SourceType::PassportStamp);
    }

    #[test]
    fn test_tie_prefers_stamp_over_email() {
        let flight = flight_to("CDG", date(2023, 6, 1), None);
        let flight_confidence = match &flight {
            TravelCandidate::Flight(f) => f.confidence(),
            _ => unreachable!(),
        };
        let candidates = vec![
            flight,
            stamp("France", StampType::Entry, date(2023, 6, 1), flight_confidence, None),
        ];
        let outcome = engine().reconcile("u1", &candidates, &[]);

        assert_eq!(outcome.new_entries.len(), 1);
        let entry = &outcome.new_entries[0];
        assert_eq!(entry.source_type, SourceType::PassportStamp);
        assert_eq!(entry.destination_city.as_deref(), Some("Paris"));
    }

    #[test]
    fn test_overlap_with_existing_entry_is_flagged() {
        let existing =
            TravelEntry::manual("u1", date(2023, 6, 1), date(2023, 6, 9), "France", None, None).unwrap();
        let candidates = vec![
            stamp("France", StampType::Entry, date(2023, 6, 10), 0.9, None),
            stamp("Italy", StampType::Entry, date(2023, 6, 10), 0.9, None),
        ];
        let outcome = engine().reconcile("u1", &candidates, std::slice::from_ref(&existing));

        assert_eq!(outcome.duplicates.len(), 1);
        assert_eq!(outcome.duplicates[0].existing_entry_id, existing.id);
        assert_eq!(outcome.new_entries.len(), 1);
        assert_eq!(outcome.new_entries[0].destination_country, "Italy");
    }

    #[test]
    fn test_unplaceable_candidates_are_counted() {
        let mut no_country = stamp("Japan", StampType::Entry, date(2023, 1, 1), 0.9, None);
        if let TravelCandidate::Stamp(s) = &mut no_country {
            s.country = None;
        }
        let candidates = vec![no_country, flight_to("ZZZ", date(2023, 1, 1), None)];
        let outcome = engine().reconcile("u1", &candidates, &[]);

        assert!(outcome.new_entries.is_empty());
        assert_eq!(outcome.dropped_candidates, 2);
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let candidates = vec![
            flight_to("NRT", date(2023, 9, 1), Some(date(2023, 9, 2))),
            stamp("Japan", StampType::Entry, date(2023, 9, 2), 0.6, None),
        ];
        let first = engine().reconcile("u1", &candidates, &[]);
        let second = engine().reconcile("u1", &candidates, &[]);
        assert_eq!(first, second);
        assert_eq!(first.new_entries.len(), 1);
        assert_eq!(first.new_entries[0].source_type, SourceType::Email);
    }

    #[test]
    fn test_unclosed_entry_is_not_paired_across_a_later_entry() {
        let candidates = vec![
            stamp("France", StampType::Entry, date(2023, 1, 5), 0.95, None),
            stamp("France", StampType::Entry, date(2023, 6, 1), 0.8, None),
            stamp("France", StampType::Exit, date(2023, 6, 10), 0.9, None),
        ];
        let outcome = engine().reconcile("u1", &candidates, &[]);

        assert_eq!(outcome.new_entries.len(), 2);
        let january = &outcome.new_entries[0];
        assert_eq!((january.departure_date, january.return_date), (date(2023, 1, 5), date(2023, 1, 5)));
        assert_eq!(january.confidence_score, Some(95));
        let june = &outcome.new_entries[1];
        assert_eq!((june.departure_date, june.return_date), (date(2023, 6, 1), date(2023, 6, 10)));
        assert_eq!(june.confidence_score, Some(80));
    }

    #[test]
    fn test_exit_beyond_pairing_window_stays_separate() {
        let engine = ReconciliationEngine::new(&ReconciliationConfig {
            max_pairing_days: 30,
            ..ReconciliationConfig::default()
        });
        let candidates = vec![
            stamp("Japan", StampType::Entry, date(2023, 1, 1), 0.9, None),
            stamp("Japan", StampType::Exit, date(2023, 3, 1), 0.9, None),
        ];
        let outcome = engine.reconcile("u1", &candidates, &[]);

        assert_eq!(outcome.new_entries.len(), 2);
        assert!(outcome.new_entries.iter().all(|e| e.departure_date == e.return_date));
    }
}
