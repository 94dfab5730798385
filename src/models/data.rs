use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::TravelError;

/// A scanned document as handed over by the caller. Lives for one extraction request.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl RawDocument {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        RawDocument {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Stable short identifier of the document content, used as the stamp source id.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex_prefix(&digest, 16)
    }
}

/// Rectangular crop of a document hypothesized to hold one passport stamp.
#[derive(Debug, Clone)]
pub struct StampRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: GrayImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMethod {
    LegacyOcr,
    CloudVision,
    Generative,
}

impl RecognitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionMethod::LegacyOcr => "legacy_ocr",
            RecognitionMethod::CloudVision => "cloud_vision",
            RecognitionMethod::Generative => "generative",
        }
    }
}

impl fmt::Display for RecognitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Normalized to [0, 1] whatever the backend reports natively.
    pub confidence: f32,
    pub source_method: RecognitionMethod,
    /// Which pass of the backend produced the text, e.g. `psm 6`.
    pub pass_label: Option<String>,
}

impl RecognitionResult {
    pub fn new(text: impl Into<String>, confidence: f32, source_method: RecognitionMethod) -> Self {
        RecognitionResult {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source_method,
            pass_label: None,
        }
    }

    pub fn with_pass(mut self, label: impl Into<String>) -> Self {
        self.pass_label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StampType {
    Entry,
    Exit,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedStampCandidate {
    pub raw_text: String,
    pub confidence: f32,
    pub country: Option<String>,
    pub city: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub exit_date: Option<NaiveDate>,
    pub stamp_type: StampType,
    pub airport_code: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    pub method: RecognitionMethod,
}

impl ExtractedStampCandidate {
    /// The date the stamp is about, entry first.
    pub fn primary_date(&self) -> Option<NaiveDate> {
        self.entry_date.or(self.exit_date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightConfirmationCandidate {
    pub source_email_id: String,
    pub flight_number: Option<String>,
    pub departure_date: Option<NaiveDate>,
    pub departure_time: Option<String>,
    pub arrival_date: Option<NaiveDate>,
    pub arrival_time: Option<String>,
    pub departure_airport: Option<String>,
    pub arrival_airport: Option<String>,
    pub airline: Option<String>,
    /// Every match of every pattern, keyed by pattern name, in text order.
    pub raw_fields: BTreeMap<String, Vec<String>>,
}

impl FlightConfirmationCandidate {
    /// 0.5 plus 0.1 for each key field present, capped at 0.9.
    pub fn confidence(&self) -> f32 {
        let present = [
            self.flight_number.is_some(),
            self.departure_date.is_some(),
            self.departure_airport.is_some() || self.arrival_airport.is_some(),
            self.airline.is_some(),
        ]
        .iter()
        .filter(|found| **found)
        .count();

        (0.5 + 0.1 * present as f32).min(0.9)
    }
}

/// Anything the reconciliation stage accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TravelCandidate {
    Stamp(ExtractedStampCandidate),
    Flight(FlightConfirmationCandidate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    PassportStamp,
    Email,
    FlightTracker,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::PassportStamp => "passport_stamp",
            SourceType::Email => "email",
            SourceType::FlightTracker => "flight_tracker",
            SourceType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelEntry {
    pub id: String,
    pub user_id: String,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub destination_country: String,
    pub destination_city: Option<String>,
    pub purpose: Option<String>,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    /// `None` for manual entries.
    pub confidence_score: Option<u8>,
    pub is_verified: bool,
    pub verification_notes: Option<String>,
}

impl TravelEntry {
    /// Entry typed in by the user, without an extraction confidence.
    pub fn manual(
        user_id: &str,
        departure_date: NaiveDate,
        return_date: NaiveDate,
        destination_country: &str,
        destination_city: Option<String>,
        purpose: Option<String>,
    ) -> Result<Self, TravelError> {
        if departure_date > return_date {
            return Err(TravelError::InvalidEntry(format!(
                "departure {} is after return {}",
                departure_date, return_date
            )));
        }
        if destination_country.trim().is_empty() {
            return Err(TravelError::InvalidEntry("destination country is empty".to_string()));
        }

        Ok(TravelEntry {
            id: entry_id(
                user_id,
                destination_country,
                departure_date,
                return_date,
                SourceType::Manual,
            ),
            user_id: user_id.to_string(),
            departure_date,
            return_date,
            destination_country: destination_country.trim().to_string(),
            destination_city,
            purpose,
            source_type: SourceType::Manual,
            source_id: None,
            confidence_score: None,
            is_verified: false,
            verification_notes: None,
        })
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.return_date - self.departure_date).num_days() + 1
    }
}

/// Deterministic id so the same trip proposed twice gets the same key.
pub fn entry_id(
    user_id: &str,
    country: &str,
    departure: NaiveDate,
    return_date: NaiveDate,
    source_type: SourceType,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(country.to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(departure.to_string().as_bytes());
    hasher.update(return_date.to_string().as_bytes());
    hasher.update(source_type.as_str().as_bytes());
    hex_prefix(&hasher.finalize(), 24)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(len)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssueType {
    Incomplete,
    FutureDate,
    DateOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_type: ValidationIssueType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateValidation {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelHistorySummary {
    pub total_trips: usize,
    pub total_days_abroad: i64,
    pub countries_visited: Vec<String>,
    pub first_departure: Option<NaiveDate>,
    pub last_return: Option<NaiveDate>,
    pub source_breakdown: BTreeMap<String, usize>,
    pub verified: usize,
    pub unverified: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_manual_entry_rejects_reversed_dates() {
        let err = TravelEntry::manual("u1", date(2023, 5, 2), date(2023, 5, 1), "France", None, None);
        assert!(matches!(err, Err(TravelError::InvalidEntry(_))));
    }

    #[test]
    fn test_manual_entry_has_no_confidence() {
        let entry =
            TravelEntry::manual("u1", date(2023, 5, 1), date(2023, 5, 10), "France", None, None)
                .unwrap();
        assert_eq!(entry.confidence_score, None);
        assert_eq!(entry.source_type, SourceType::Manual);
        assert_eq!(entry.days(), 10);
        assert!(!entry.is_verified);
    }

    #[test]
    fn test_entry_id_is_stable() {
        let a = entry_id("u1", "Japan", date(2022, 1, 1), date(2022, 1, 9), SourceType::Email);
        let b = entry_id("u1", "JAPAN", date(2022, 1, 1), date(2022, 1, 9), SourceType::Email);
        let c = entry_id("u2", "Japan", date(2022, 1, 1), date(2022, 1, 9), SourceType::Email);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn test_flight_confidence_from_completeness() {
        let mut flight = FlightConfirmationCandidate {
            source_email_id: "m1".to_string(),
            flight_number: Some("DL 1234".to_string()),
            departure_date: None,
            departure_time: None,
            arrival_date: None,
            arrival_time: None,
            departure_airport: None,
            arrival_airport: None,
            airline: None,
            raw_fields: BTreeMap::new(),
        };
        assert!((flight.confidence() - 0.6).abs() < 1e-6);

        flight.departure_date = Some(date(2023, 3, 14));
        flight.arrival_airport = Some("LAX".to_string());
        flight.airline = Some("Delta".to_string());
        assert!((flight.confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_fingerprint_depends_on_content() {
        let a = RawDocument::new(vec![1, 2, 3], "image/png");
        let b = RawDocument::new(vec![1, 2, 4], "image/png");
        assert_eq!(a.fingerprint().len(), 16);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
