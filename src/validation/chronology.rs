use chrono::NaiveDate;

use crate::models::{ExtractedStampCandidate, FlightConfirmationCandidate, ValidationIssue, ValidationIssueType};

pub struct ChronologyValidator;

impl ChronologyValidator {
    pub fn validate_stamp(candidate: &ExtractedStampCandidate, today: NaiveDate) -> Vec<ValidationIssue> {
        Self::check(candidate.entry_date, candidate.exit_date, today, "entry", "exit")
    }

    pub fn validate_flight(candidate: &FlightConfirmationCandidate, today: NaiveDate) -> Vec<ValidationIssue> {
        Self::check(
            candidate.departure_date,
            candidate.arrival_date,
            today,
            "departure",
            "arrival",
        )
    }

    fn check(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
        start_label: &str,
        end_label: &str,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (label, date) in [(start_label, start), (end_label, end)] {
            if let Some(date) = date.filter(|d| *d > today) {
                issues.push(ValidationIssue {
                    issue_type: ValidationIssueType::FutureDate,
                    message: format!("{} date {} is in the future", label, date),
                });
            }
        }

        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                issues.push(ValidationIssue {
                    issue_type: ValidationIssueType::DateOrder,
                    message: format!("{} date {} is after {} date {}", start_label, start, end_label, end),
                });
            }
        }

        issues
    }
}
