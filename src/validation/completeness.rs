use chrono::NaiveDate;

use crate::models::rules::airport;
use crate::models::{ExtractedStampCandidate, FlightConfirmationCandidate, ValidationIssue, ValidationIssueType};

pub struct CompletenessValidator;

impl CompletenessValidator {
    /// A stamp needs at least a date or a country to place a trip.
    pub fn validate_stamp(candidate: &ExtractedStampCandidate) -> Vec<ValidationIssue> {
        Self::check(candidate.primary_date(), candidate.country.as_deref())
    }

    /// A flight's country comes from its arrival airport.
    pub fn validate_flight(candidate: &FlightConfirmationCandidate) -> Vec<ValidationIssue> {
        let country = candidate
            .arrival_airport
            .as_deref()
            .and_then(airport)
            .map(|a| a.country);
        Self::check(candidate.departure_date.or(candidate.arrival_date), country)
    }

    fn check(date: Option<NaiveDate>, country: Option<&str>) -> Vec<ValidationIssue> {
        if date.is_none() && country.is_none() {
            vec![ValidationIssue {
                issue_type: ValidationIssueType::Incomplete,
                message: "Candidate has neither a date nor a country".to_string(),
            }]
        } else {
            Vec::new()
        }
    }
}
