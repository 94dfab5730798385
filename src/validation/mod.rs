pub mod chronology;
pub mod completeness;

pub use chronology::ChronologyValidator;
pub use completeness::CompletenessValidator;

use chrono::{Local, NaiveDate};
use log::debug;

use crate::models::{CandidateValidation, ExtractedStampCandidate, FlightConfirmationCandidate, TravelCandidate};

/// Rejects physically impossible or incomplete candidates. `today` is fixed at
/// construction so a batch is judged against one processing date.
#[derive(Debug, Clone, Copy)]
pub struct CandidateValidator {
    today: NaiveDate,
}

impl CandidateValidator {
    pub fn new(today: NaiveDate) -> Self {
        CandidateValidator { today }
    }

    /// Judged against the local calendar date.
    pub fn today() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn validate(&self, candidate: &TravelCandidate) -> bool {
        self.check(candidate).is_valid
    }

    pub fn check(&self, candidate: &TravelCandidate) -> CandidateValidation {
        match candidate {
            TravelCandidate::Stamp(stamp) => self.validate_stamp(stamp),
            TravelCandidate::Flight(flight) => self.validate_flight(flight),
        }
    }

    pub fn validate_stamp(&self, candidate: &ExtractedStampCandidate) -> CandidateValidation {
        let mut issues = CompletenessValidator::validate_stamp(candidate);
        issues.extend(ChronologyValidator::validate_stamp(candidate, self.today));
        if !issues.is_empty() {
            debug!("Rejected stamp candidate {:?}: {} issue(s)", candidate.raw_text, issues.len());
        }
        CandidateValidation {
            is_valid: issues.is_empty(),
            issues,
        }
    }

    pub fn validate_flight(&self, candidate: &FlightConfirmationCandidate) -> CandidateValidation {
        let mut issues = CompletenessValidator::validate_flight(candidate);
        issues.extend(ChronologyValidator::validate_flight(candidate, self.today));
        if !issues.is_empty() {
            debug!("Rejected flight from email {}: {} issue(s)", candidate.source_email_id, issues.len());
        }
        CandidateValidation {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecognitionMethod, StampType, ValidationIssueType};
    use std::collections::BTreeMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stamp(entry: Option<NaiveDate>, exit: Option<NaiveDate>, country: Option<&str>) -> ExtractedStampCandidate {
        ExtractedStampCandidate {
            raw_text: "stamp".to_string(),
            confidence: 0.9,
            country: country.map(str::to_string),
            city: None,
            entry_date: entry,
            exit_date: exit,
            stamp_type: StampType::Entry,
            airport_code: None,
            source_id: None,
            method: RecognitionMethod::LegacyOcr,
        }
    }

    fn flight(departure: Option<NaiveDate>, arrival: Option<NaiveDate>, to: Option<&str>) -> FlightConfirmationCandidate {
        FlightConfirmationCandidate {
            source_email_id: "m1".to_string(),
            flight_number: Some("DL 1234".to_string()),
            departure_date: departure,
            departure_time: None,
            arrival_date: arrival,
            arrival_time: None,
            departure_airport: None,
            arrival_airport: to.map(str::to_string),
            airline: None,
            raw_fields: BTreeMap::new(),
        }
    }

    fn validator() -> CandidateValidator {
        CandidateValidator::new(date(2024, 1, 1))
    }

    #[test]
    fn test_valid_stamp() {
        let result = validator().validate_stamp(&stamp(Some(date(2023, 3, 14)), None, Some("France")));
        assert!(result.is_valid);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_entry_after_exit_is_rejected() {
        let candidate = stamp(Some(date(2023, 3, 20)), Some(date(2023, 3, 14)), Some("France"));
        let result = validator().validate_stamp(&candidate);
        assert!(!result.is_valid);
        assert_eq!(result.issues[0].issue_type, ValidationIssueType::DateOrder);
    }

    #[test]
    fn test_future_entry_is_rejected() {
        let candidate = TravelCandidate::Stamp(stamp(Some(date(2024, 1, 2)), None, Some("Japan")));
        assert!(!validator().validate(&candidate));
        assert_eq!(validator().check(&candidate).issues[0].issue_type, ValidationIssueType::FutureDate);
    }

    #[test]
    fn test_processing_date_itself_is_allowed() {
        let candidate = stamp(Some(date(2024, 1, 1)), None, None);
        assert!(validator().validate_stamp(&candidate).is_valid);
    }

    #[test]
    fn test_no_date_and_no_country_is_incomplete() {
        let mut candidate = stamp(None, None, None);
        candidate.city = Some("Paris".to_string());
        let result = validator().validate_stamp(&candidate);
        assert!(!result.is_valid);
        assert_eq!(result.issues[0].issue_type, ValidationIssueType::Incomplete);
    }

    #[test]
    fn test_flight_rules() {
        let v = validator();
        assert!(v.validate_flight(&flight(Some(date(2023, 5, 1)), None, None)).is_valid);
        assert!(v.validate_flight(&flight(None, None, Some("CDG"))).is_valid);
        assert!(!v.validate_flight(&flight(None, None, Some("ZZZ"))).is_valid);

        let reversed = v.validate_flight(&flight(Some(date(2023, 5, 3)), Some(date(2023, 5, 1)), None));
        assert_eq!(reversed.issues.len(), 1);
        assert_eq!(reversed.issues[0].issue_type, ValidationIssueType::DateOrder);
    }
}
