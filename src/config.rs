//! Pipeline configuration, loaded once at start-up and passed explicitly to the
//! pipeline context.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::TravelError;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

pub const DEFAULT_STAMP_PROMPT: &str = "Analyze this passport stamp image and extract: \
country name, city name (if visible), entry date, exit date (if visible), airport code \
(if visible) and stamp type (entry/exit/transit). Return only JSON with the fields \
country, city, entry_date (YYYY-MM-DD), exit_date (YYYY-MM-DD), airport_code, \
stamp_type and confidence (0-1). Use null for anything not clearly visible.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    /// Run every backend and keep the best result.
    All,
    /// Stop at the first backend whose best result clears the threshold.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub confidence_threshold: f32,
    pub mode: RecognitionMode,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        RecognitionConfig {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            mode: RecognitionMode::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    pub enabled: bool,
    pub language: String,
    pub data_path: Option<String>,
    /// Page segmentation modes tried in order, one recognition pass each.
    pub page_seg_modes: Vec<u32>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        TesseractConfig {
            enabled: true,
            language: "eng".to_string(),
            data_path: None,
            page_seg_modes: vec![6, 8, 13],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudVisionConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CloudVisionConfig {
    fn default() -> Self {
        CloudVisionConfig {
            enabled: false,
            endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
            api_key: None,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerativeConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub prompt: String,
    /// Used when the model's JSON carries no confidence of its own.
    pub default_confidence: f32,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        GenerativeConfig {
            enabled: false,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            timeout_secs: 45,
            prompt: DEFAULT_STAMP_PROMPT.to_string(),
            default_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Days two spans may be apart and still describe the same trip.
    pub tolerance_days: i64,
    /// Join an entry stamp with the next exit stamp of the same country.
    pub pair_entry_exit: bool,
    /// Longest stay, in days, an entry and exit stamp may be paired across.
    pub max_pairing_days: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        ReconciliationConfig {
            tolerance_days: 1,
            pair_entry_exit: true,
            max_pairing_days: 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub max_file_size: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            max_file_size: 10 * 1024 * 1024,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/tiff".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub recognition: RecognitionConfig,
    pub tesseract: TesseractConfig,
    pub cloud_vision: CloudVisionConfig,
    pub generative: GenerativeConfig,
    pub reconciliation: ReconciliationConfig,
    pub input: InputConfig,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TravelError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TravelError::Config(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .map_err(|e| TravelError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, or the file at `path`, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, TravelError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Secrets and a few knobs may come from the environment instead of the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), TravelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("PASSTRAIL_VISION_API_KEY") {
            self.cloud_vision.api_key = Some(key);
            self.cloud_vision.enabled = true;
        }
        if let Some(key) = lookup("PASSTRAIL_GENERATIVE_API_KEY") {
            self.generative.api_key = Some(key);
            self.generative.enabled = true;
        }
        if let Some(threshold) = lookup("PASSTRAIL_CONFIDENCE_THRESHOLD") {
            self.recognition.confidence_threshold = threshold.trim().parse().map_err(|_| {
                TravelError::Config(format!("PASSTRAIL_CONFIDENCE_THRESHOLD is not a number: {}", threshold))
            })?;
        }
        if let Some(path) = lookup("TESSDATA_PREFIX") {
            self.tesseract.data_path = Some(path);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), TravelError> {
        let threshold = self.recognition.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TravelError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.reconciliation.tolerance_days < 0 {
            return Err(TravelError::Config("tolerance_days must not be negative".to_string()));
        }
        if self.reconciliation.max_pairing_days < 0 {
            return Err(TravelError::Config("max_pairing_days must not be negative".to_string()));
        }
        if self.cloud_vision.enabled && self.cloud_vision.api_key.is_none() {
            return Err(TravelError::Config("cloud_vision is enabled without an api_key".to_string()));
        }
        if self.generative.enabled && self.generative.api_key.is_none() {
            return Err(TravelError::Config("generative is enabled without an api_key".to_string()));
        }
        Ok(())
    }
}
