use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{InputConfig, PipelineConfig};
use crate::history;
use crate::models::*;
use crate::processing::{EmailParser, FieldExtractor, ImageProcessor, RegionDetector, TextRecognizer};
use crate::reconciliation::{ReconciliationEngine, ReconciliationOutcome, UserLocks};
use crate::storage::{DocumentSource, TravelEntryStore};
use crate::utils::TravelError;
use crate::validation::CandidateValidator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub candidate: TravelCandidate,
    pub issues: Vec<ValidationIssue>,
}

/// Outcome of scanning one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub regions: usize,
    pub accepted: Vec<ExtractedStampCandidate>,
    pub rejected: Vec<RejectedCandidate>,
}

/// Everything a request needs, built once from configuration and shared by reference.
pub struct EvidencePipeline {
    input: InputConfig,
    detector: RegionDetector,
    recognizer: TextRecognizer,
    engine: ReconciliationEngine,
    locks: UserLocks,
    store: Box<dyn TravelEntryStore>,
    documents: Option<Box<dyn DocumentSource>>,
    processing_date: Option<NaiveDate>,
}

impl EvidencePipeline {
    pub fn new(config: &PipelineConfig, recognizer: TextRecognizer, store: Box<dyn TravelEntryStore>) -> Self {
        EvidencePipeline {
            input: config.input.clone(),
            detector: RegionDetector::default(),
            recognizer,
            engine: ReconciliationEngine::new(&config.reconciliation),
            locks: UserLocks::new(),
            store,
            documents: None,
            processing_date: None,
        }
    }

    pub fn from_config(config: &PipelineConfig, store: Box<dyn TravelEntryStore>) -> Result<Self, TravelError> {
        config.validate()?;
        let recognizer = TextRecognizer::from_config(config)?;
        Ok(Self::new(config, recognizer, store))
    }

    pub fn with_document_source(mut self, source: Box<dyn DocumentSource>) -> Self {
        self.documents = Some(source);
        self
    }

    /// Judge candidates against a fixed date instead of today.
    pub fn with_processing_date(mut self, date: NaiveDate) -> Self {
        self.processing_date = Some(date);
        self
    }

    fn validator(&self) -> CandidateValidator {
        self.processing_date
            .map_or_else(CandidateValidator::today, CandidateValidator::new)
    }

    /// Stamp candidates that passed validation.
    pub fn process_document(&self, document: &RawDocument) -> Result<Vec<ExtractedStampCandidate>, TravelError> {
        Ok(self.process_document_report(document)?.accepted)
    }

    /// Decode, detect regions, recognize each region on its own thread, extract and
    /// validate. A region on which every backend fails fails the whole document.
    pub fn process_document_report(&self, document: &RawDocument) -> Result<ProcessingReport, TravelError> {
        let page = ImageProcessor::decode(document, &self.input)?;
        let regions = self.detector.detect(&page);
        if regions.is_empty() {
            info!("No stamp regions found in document");
            return Ok(ProcessingReport::default());
        }

        let extracted: Vec<Result<Option<ExtractedStampCandidate>, TravelError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = regions
                .iter()
                .enumerate()
                .map(|(index, region)| scope.spawn(move || self.read_region(index, region)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(TravelError::ImageProcessing("region worker panicked".to_string())))
                })
                .collect()
        });

        let fingerprint = document.fingerprint();
        let validator = self.validator();
        let mut report = ProcessingReport {
            regions: regions.len(),
            ..Default::default()
        };

        for result in extracted {
            let Some(mut candidate) = result? else {
                continue;
            };
            candidate.source_id = Some(fingerprint.clone());
            let validation = validator.validate_stamp(&candidate);
            if validation.is_valid {
                report.accepted.push(candidate);
            } else {
                report.rejected.push(RejectedCandidate {
                    candidate: TravelCandidate::Stamp(candidate),
                    issues: validation.issues,
                });
            }
        }

        info!(
            "Document {}: {} regions, {} accepted, {} rejected",
            fingerprint,
            report.regions,
            report.accepted.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    fn read_region(&self, index: usize, region: &StampRegion) -> Result<Option<ExtractedStampCandidate>, TravelError> {
        debug!(
            "Region {} at ({}, {}) {}x{}",
            index, region.x, region.y, region.width, region.height
        );
        let prepared = ImageProcessor::preprocess_region(&region.pixels);
        let png = ImageProcessor::encode_png(&prepared)?;
        let results = self.recognizer.recognize_region(index, &png)?;

        match self.recognizer.best(&results) {
            Some(best) => Ok(FieldExtractor::extract_result(&best)),
            None => {
                debug!(
                    "Region {}: no result reached confidence {}",
                    index,
                    self.recognizer.threshold()
                );
                Ok(None)
            }
        }
    }

    /// Fetches a document through the configured source, then processes it.
    pub fn process_reference(&self, reference: &str, mime_type: &str) -> Result<Vec<ExtractedStampCandidate>, TravelError> {
        let source = self
            .documents
            .as_ref()
            .ok_or_else(|| TravelError::Config("no document source configured".to_string()))?;
        let bytes = source.fetch(reference)?;
        self.process_document(&RawDocument::new(bytes, mime_type))
    }

    /// Flight candidate from a confirmation email, if it parses and validates.
    pub fn process_email(&self, email: &EmailMessage) -> Option<FlightConfirmationCandidate> {
        let flight = EmailParser::parse(email)?;
        let validation = self.validator().validate_flight(&flight);
        if !validation.is_valid {
            debug!("Email {} rejected: {:?}", email.message_id, validation.issues);
            return None;
        }
        Some(flight)
    }

    /// Merges candidates into the user's history. Only new entries are written;
    /// overlaps with stored entries come back as duplicate flags.
    pub fn reconcile(&self, user_id: &str, candidates: Vec<TravelCandidate>) -> Result<ReconciliationOutcome, TravelError> {
        let _guard = self.locks.try_acquire(user_id)?;

        let validator = self.validator();
        let total = candidates.len();
        let valid: Vec<TravelCandidate> = candidates.into_iter().filter(|c| validator.validate(c)).collect();
        if valid.len() < total {
            warn!("Ignoring {} invalid candidates for {}", total - valid.len(), user_id);
        }

        let existing = self.store.get(user_id)?;
        let mut outcome = self.engine.reconcile(user_id, &valid, &existing);
        outcome.dropped_candidates += total - valid.len();

        if !outcome.new_entries.is_empty() {
            self.store.put_all(user_id, outcome.new_entries.clone())?;
        }
        Ok(outcome)
    }

    pub fn add_manual_entry(
        &self,
        user_id: &str,
        departure_date: NaiveDate,
        return_date: NaiveDate,
        destination_country: &str,
        destination_city: Option<String>,
        purpose: Option<String>,
    ) -> Result<TravelEntry, TravelError> {
        let entry = TravelEntry::manual(
            user_id,
            departure_date,
            return_date,
            destination_country,
            destination_city,
            purpose,
        )?;
        self.store.put(entry.clone())?;
        Ok(entry)
    }

    pub fn history(
        &self,
        user_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        include_unverified: bool,
    ) -> Result<Vec<TravelEntry>, TravelError> {
        Ok(history::filter_entries(&self.store.get(user_id)?, from, to, include_unverified))
    }

    pub fn summary(&self, user_id: &str) -> Result<TravelHistorySummary, TravelError> {
        Ok(history::summarize(&self.store.get(user_id)?))
    }

    /// Records the user's review of one entry.
    pub fn verify_entry(
        &self,
        user_id: &str,
        entry_id: &str,
        is_valid: bool,
        notes: Option<String>,
    ) -> Result<TravelEntry, TravelError> {
        let entries = self.store.get(user_id)?;
        let entry = entries
            .iter()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| TravelError::EntryNotFound(entry_id.to_string()))?;
        let reviewed = history::apply_verification(entry, is_valid, notes);
        self.store.put(reviewed.clone())?;
        Ok(reviewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecognitionMode;
    use crate::processing::ocr::tests::StubBackend;
    use crate::processing::RecognitionBackend;
    use crate::storage::{FsDocumentSource, InMemoryEntryStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use chrono::{TimeZone, Utc};
    use image::{GrayImage, Luma};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn pipeline(backends: Vec<Box<dyn RecognitionBackend>>) -> EvidencePipeline {
        let recognizer = TextRecognizer::new(backends, 0.7, RecognitionMode::All);
        EvidencePipeline::new(&PipelineConfig::default(), recognizer, Box::new(InMemoryEntryStore::new()))
            .with_processing_date(date(2024, 1, 1))
    }

    fn stamp_reader(text: &str, confidence: f32) -> Vec<Box<dyn RecognitionBackend>> {
        vec![Box::new(StubBackend::ok(RecognitionMethod::CloudVision, &[(text, confidence)]))]
    }

    fn scanned_page(with_stamp: bool) -> RawDocument {
        let mut page = GrayImage::from_pixel(400, 300, Luma([255u8]));
        if with_stamp {
            draw_filled_rect_mut(&mut page, Rect::at(60, 80).of_size(120, 50), Luma([0u8]));
        }
        RawDocument::new(ImageProcessor::encode_png(&page).unwrap(), "image/png")
    }

    #[test]
    fn test_document_to_candidate() {
        let pipeline = pipeline(stamp_reader("ENTRY USA LOS ANGELES 03/14/2023 LAX", 0.9));
        let document = scanned_page(true);
        let candidates = pipeline.process_document(&document).unwrap();

        assert_eq!(candidates.len(), 1);
        let stamp = &candidates[0];
        assert_eq!(stamp.country.as_deref(), Some("United States"));
        assert_eq!(stamp.entry_date, Some(date(2023, 3, 14)));
        assert_eq!(stamp.source_id, Some(document.fingerprint()));
        assert_eq!(stamp.method, RecognitionMethod::CloudVision);
    }

    #[test]
    fn test_blank_page_is_empty_not_error() {
        let pipeline = pipeline(vec![Box::new(StubBackend::failing(RecognitionMethod::LegacyOcr))]);
        assert!(pipeline.process_document(&scanned_page(false)).unwrap().is_empty());
    }

    #[test]
    fn test_low_confidence_never_reaches_extraction() {
        let pipeline = pipeline(stamp_reader("ENTRY USA LOS ANGELES 03/14/2023 LAX", 0.5));
        let report = pipeline.process_document_report(&scanned_page(true)).unwrap();
        assert_eq!(report.regions, 1);
        assert!(report.accepted.is_empty());
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_all_backends_failing_fails_document() {
        let pipeline = pipeline(vec![
            Box::new(StubBackend::failing(RecognitionMethod::LegacyOcr)),
            Box::new(StubBackend::failing(RecognitionMethod::CloudVision)),
        ]);
        let err = pipeline.process_document(&scanned_page(true)).unwrap_err();
        assert!(matches!(err, TravelError::AllBackendsFailed { attempted: 2, .. }));
    }

    #[test]
    fn test_future_stamp_is_reported_as_rejected() {
        let pipeline = pipeline(stamp_reader("ENTRY FRANCE 2025-06-01", 0.9));
        let report = pipeline.process_document_report(&scanned_page(true)).unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].issues[0].issue_type, ValidationIssueType::FutureDate);
    }

    #[test]
    fn test_input_errors_surface_immediately() {
        let pipeline = pipeline(stamp_reader("unused", 0.9));
        let document = RawDocument::new(vec![0u8; 16], "application/zip");
        assert!(pipeline.process_document(&document).unwrap_err().is_input_error());
    }

    #[test]
    fn test_process_reference_reads_through_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.png"), scanned_page(true).bytes).unwrap();
        let pipeline = pipeline(stamp_reader("EXIT JAPAN 2023-05-02", 0.9))
            .with_document_source(Box::new(FsDocumentSource::new(dir.path())));

        let candidates = pipeline.process_reference("page.png", "image/png").unwrap();
        assert_eq!(candidates[0].exit_date, Some(date(2023, 5, 2)));
        assert!(matches!(
            pipeline.process_reference("missing.png", "image/png"),
            Err(TravelError::DocumentNotFound(_))
        ));
    }

    #[test]
    fn test_process_email() {
        let pipeline = pipeline(Vec::new());
        let email = EmailMessage {
            message_id: "m-1".to_string(),
            subject: "Your Delta Flight Confirmation".to_string(),
            sender: "delta@example.com".to_string(),
            received_at: Utc.with_ymd_and_hms(2023, 3, 1, 9, 0, 0).unwrap(),
            body: "DL 1234 on 03/14/2023 to CDG".to_string(),
        };
        let flight = pipeline.process_email(&email).unwrap();
        assert_eq!(flight.flight_number.as_deref(), Some("DL 1234"));
        assert_eq!(flight.airline.as_deref(), Some("Delta"));
        assert_eq!(pipeline.process_email(&email), Some(flight));
    }

    #[test]
    fn test_reconcile_persists_then_flags_duplicates() {
        let pipeline = pipeline(stamp_reader("ENTRY FRANCE PARIS 2023-06-01", 0.9));
        let stamps = pipeline.process_document(&scanned_page(true)).unwrap();
        let candidates: Vec<TravelCandidate> = stamps.into_iter().map(TravelCandidate::Stamp).collect();

        let first = pipeline.reconcile("u1", candidates.clone()).unwrap();
        assert_eq!(first.new_entries.len(), 1);
        assert_eq!(first.new_entries[0].destination_city.as_deref(), Some("Paris"));
        assert_eq!(pipeline.history("u1", None, None, true).unwrap().len(), 1);

        let second = pipeline.reconcile("u1", candidates).unwrap();
        assert!(second.new_entries.is_empty());
        assert_eq!(second.duplicates.len(), 1);
        assert_eq!(pipeline.summary("u1").unwrap().total_trips, 1);
    }

    #[test]
    fn test_reconcile_contention_is_retryable() {
        let pipeline = pipeline(Vec::new());
        let _held = pipeline.locks.try_acquire("u1").unwrap();

        let err = pipeline.reconcile("u1", Vec::new()).unwrap_err();
        assert!(matches!(err, TravelError::ReconciliationInProgress(_)));
        assert!(err.is_retryable());
        assert!(pipeline.reconcile("u2", Vec::new()).is_ok());
    }

    #[test]
    fn test_verify_entry() {
        let pipeline = pipeline(Vec::new());
        let entry = pipeline
            .add_manual_entry("u1", date(2023, 2, 1), date(2023, 2, 3), "Mexico", None, Some("work".to_string()))
            .unwrap();

        let reviewed = pipeline.verify_entry("u1", &entry.id, true, None).unwrap();
        assert!(reviewed.is_verified);
        assert_eq!(pipeline.history("u1", None, None, false).unwrap().len(), 1);
        assert!(matches!(
            pipeline.verify_entry("u1", "nope", true, None),
            Err(TravelError::EntryNotFound(_))
        ));
    }

    /// Memory store whose next batch write fails once, when armed.
    struct FlakyStore {
        inner: InMemoryEntryStore,
        fail_next_batch: Arc<AtomicBool>,
    }

    impl TravelEntryStore for FlakyStore {
        fn get(&self, user_id: &str) -> Result<Vec<TravelEntry>, TravelError> {
            self.inner.get(user_id)
        }

        fn put(&self, entry: TravelEntry) -> Result<(), TravelError> {
            self.inner.put(entry)
        }

        fn put_all(&self, user_id: &str, entries: Vec<TravelEntry>) -> Result<(), TravelError> {
            if self.fail_next_batch.swap(false, Ordering::SeqCst) {
                return Err(TravelError::Storage("disk full".to_string()));
            }
            self.inner.put_all(user_id, entries)
        }
    }

    fn entry_stamp(country: &str, day: NaiveDate) -> TravelCandidate {
        TravelCandidate::Stamp(ExtractedStampCandidate {
            raw_text: format!("ENTRY {} {}", country, day),
            confidence: 0.9,
            country: Some(country.to_string()),
            city: None,
            entry_date: Some(day),
            exit_date: None,
            stamp_type: StampType::Entry,
            airport_code: None,
            source_id: None,
            method: RecognitionMethod::CloudVision,
        })
    }

    #[test]
    fn test_failed_write_leaves_history_untouched() {
        let fail_next_batch = Arc::new(AtomicBool::new(true));
        let store = FlakyStore {
            inner: InMemoryEntryStore::new(),
            fail_next_batch: fail_next_batch.clone(),
        };
        let recognizer = TextRecognizer::new(Vec::new(), 0.7, RecognitionMode::All);
        let pipeline = EvidencePipeline::new(&PipelineConfig::default(), recognizer, Box::new(store))
            .with_processing_date(date(2024, 1, 1));
        let candidates = vec![
            entry_stamp("France", date(2023, 6, 1)),
            entry_stamp("Italy", date(2023, 7, 1)),
        ];

        let err = pipeline.reconcile("u1", candidates.clone()).unwrap_err();
        assert!(matches!(err, TravelError::Storage(_)));
        assert!(pipeline.history("u1", None, None, true).unwrap().is_empty());

        let retry = pipeline.reconcile("u1", candidates).unwrap();
        assert_eq!(retry.new_entries.len(), 2);
        assert!(retry.duplicates.is_empty());
        assert!(!fail_next_batch.load(Ordering::SeqCst));
    }
}
