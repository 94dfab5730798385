use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::config::{CloudVisionConfig, GenerativeConfig, PipelineConfig, RecognitionMode, TesseractConfig};
use crate::models::{RecognitionMethod, RecognitionResult};
use crate::processing::extractors::strip_code_fence;
use crate::utils::TravelError;

/// A text recognition engine. `image_png` is a pre-processed region encoded as PNG;
/// `hint` is an optional language hint (e.g. `eng`, `fr`).
pub trait RecognitionBackend: Send + Sync {
    fn method(&self) -> RecognitionMethod;

    /// One result per pass the backend runs. An empty list means no text was found.
    fn recognize(&self, image_png: &[u8], hint: Option<&str>) -> Result<Vec<RecognitionResult>, TravelError>;
}

/// Local Tesseract engine, one pass per page segmentation mode.
#[cfg_attr(not(feature = "legacy-ocr"), allow(dead_code))]
pub struct TesseractBackend {
    language: String,
    data_path: Option<String>,
    page_seg_modes: Vec<u32>,
}

impl TesseractBackend {
    pub fn new(config: &TesseractConfig) -> Self {
        TesseractBackend {
            language: config.language.clone(),
            data_path: config.data_path.clone(),
            page_seg_modes: config.page_seg_modes.clone(),
        }
    }
}

#[cfg(feature = "legacy-ocr")]
impl RecognitionBackend for TesseractBackend {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::LegacyOcr
    }

    fn recognize(&self, image_png: &[u8], hint: Option<&str>) -> Result<Vec<RecognitionResult>, TravelError> {
        use std::io::Write;
        use tesseract::Tesseract;

        let backend_error = |message: String| TravelError::Backend {
            method: RecognitionMethod::LegacyOcr,
            message,
        };

        let mut temp_file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(|e| backend_error(format!("Failed to create temp file: {}", e)))?;
        temp_file
            .write_all(image_png)
            .map_err(|e| backend_error(format!("Failed to write to temp file: {}", e)))?;
        let image_path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| backend_error("Failed to convert path to string".to_string()))?;

        let language = hint.unwrap_or(&self.language);
        let mut results = Vec::new();
        let mut last_error = None;

        for psm in &self.page_seg_modes {
            let pass = Tesseract::new(self.data_path.as_deref(), Some(language))
                .map_err(|e| format!("Tesseract init error: {}", e))
                .and_then(|engine| {
                    engine
                        .set_image(image_path)
                        .map_err(|e| format!("Tesseract set image error: {}", e))
                })
                .and_then(|mut engine| {
                    engine.set_page_seg_mode(page_seg_mode(*psm));
                    let text = engine.get_text().map_err(|e| format!("Tesseract error: {}", e))?;
                    let confidence = engine.mean_text_conf() as f32 / 100.0;
                    Ok((text, confidence))
                });

            match pass {
                Ok((text, confidence)) => {
                    debug!("Tesseract psm {} confidence {:.2}", psm, confidence);
                    results.push(
                        RecognitionResult::new(text.trim(), confidence, RecognitionMethod::LegacyOcr)
                            .with_pass(format!("psm {}", psm)),
                    );
                }
                Err(message) => {
                    warn!("Tesseract pass psm {} failed: {}", psm, message);
                    last_error = Some(message);
                }
            }
        }

        match (results.is_empty(), last_error) {
            (true, Some(message)) => Err(backend_error(message)),
            _ => Ok(results),
        }
    }
}

#[cfg(feature = "legacy-ocr")]
fn page_seg_mode(mode: u32) -> tesseract::PageSegMode {
    use tesseract::PageSegMode;
    match mode {
        3 => PageSegMode::PsmAuto,
        4 => PageSegMode::PsmSingleColumn,
        6 => PageSegMode::PsmSingleBlock,
        7 => PageSegMode::PsmSingleLine,
        8 => PageSegMode::PsmSingleWord,
        11 => PageSegMode::PsmSparseText,
        13 => PageSegMode::PsmRawLine,
        _ => PageSegMode::PsmAuto,
    }
}

#[cfg(not(feature = "legacy-ocr"))]
impl RecognitionBackend for TesseractBackend {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::LegacyOcr
    }

    fn recognize(&self, _image_png: &[u8], _hint: Option<&str>) -> Result<Vec<RecognitionResult>, TravelError> {
        Err(TravelError::BackendUnavailable {
            method: RecognitionMethod::LegacyOcr,
            reason: "built without the legacy-ocr feature".to_string(),
        })
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, TravelError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TravelError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Google Cloud Vision `TEXT_DETECTION`.
pub struct CloudVisionBackend {
    endpoint: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl CloudVisionBackend {
    pub fn new(config: &CloudVisionConfig) -> Result<Self, TravelError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| TravelError::Config("cloud_vision requires an api_key".to_string()))?;
        Ok(CloudVisionBackend {
            endpoint: config.endpoint.clone(),
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn request_body(image_png: &[u8], hint: Option<&str>) -> Value {
        let mut request = json!({
            "image": { "content": BASE64_STANDARD.encode(image_png) },
            "features": [{ "type": "TEXT_DETECTION" }],
        });
        if let Some(language) = hint {
            request["imageContext"] = json!({ "languageHints": [language] });
        }
        json!({ "requests": [request] })
    }
}

impl RecognitionBackend for CloudVisionBackend {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::CloudVision
    }

    fn recognize(&self, image_png: &[u8], hint: Option<&str>) -> Result<Vec<RecognitionResult>, TravelError> {
        let backend_error = |message: String| TravelError::Backend {
            method: RecognitionMethod::CloudVision,
            message,
        };

        let response: Value = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(image_png, hint))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| backend_error(format!("Request failed: {}", e)))?
            .json()
            .map_err(|e| backend_error(format!("Invalid response body: {}", e)))?;

        parse_vision_response(&response)
            .map(|result| result.into_iter().collect())
            .map_err(backend_error)
    }
}

/// Reads the first response of an `images:annotate` reply. `Ok(None)` when no text was found.
pub fn parse_vision_response(response: &Value) -> Result<Option<RecognitionResult>, String> {
    let first = response
        .get("responses")
        .and_then(|r| r.get(0))
        .ok_or_else(|| "response has no entries".to_string())?;

    if let Some(message) = first.pointer("/error/message").and_then(Value::as_str) {
        return Err(message.to_string());
    }

    let text = first
        .pointer("/fullTextAnnotation/text")
        .and_then(Value::as_str)
        .or_else(|| first.pointer("/textAnnotations/0/description").and_then(Value::as_str))
        .unwrap_or("")
        .trim();
    if text.is_empty() {
        return Ok(None);
    }

    let page_confidences: Vec<f64> = first
        .pointer("/fullTextAnnotation/pages")
        .and_then(Value::as_array)
        .map(|pages| pages.iter().filter_map(|p| p.get("confidence")?.as_f64()).collect())
        .unwrap_or_default();
    let annotation_scores: Vec<f64> = first
        .get("textAnnotations")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|a| a.get("score")?.as_f64()).collect())
        .unwrap_or_default();

    let confidence = mean(&page_confidences).or_else(|| mean(&annotation_scores)).unwrap_or(0.0);
    Ok(Some(RecognitionResult::new(
        text,
        confidence as f32,
        RecognitionMethod::CloudVision,
    )))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Gemini `generateContent` with the region image inline and an extraction prompt.
pub struct GenerativeBackend {
    endpoint: String,
    model: String,
    api_key: String,
    prompt: String,
    default_confidence: f32,
    client: reqwest::blocking::Client,
}

impl GenerativeBackend {
    pub fn new(config: &GenerativeConfig) -> Result<Self, TravelError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| TravelError::Config("generative requires an api_key".to_string()))?;
        Ok(GenerativeBackend {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            prompt: config.prompt.clone(),
            default_confidence: config.default_confidence,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, image_png: &[u8], hint: Option<&str>) -> Value {
        let prompt = match hint {
            Some(language) => format!("{} The stamp text is likely in {}.", self.prompt, language),
            None => self.prompt.clone(),
        };
        json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": "image/png", "data": BASE64_STANDARD.encode(image_png) } }
                ]
            }],
            "generationConfig": { "temperature": 0.0 }
        })
    }
}

impl RecognitionBackend for GenerativeBackend {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Generative
    }

    fn recognize(&self, image_png: &[u8], hint: Option<&str>) -> Result<Vec<RecognitionResult>, TravelError> {
        let backend_error = |message: String| TravelError::Backend {
            method: RecognitionMethod::Generative,
            message,
        };

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let response: Value = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(image_png, hint))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| backend_error(format!("Request failed: {}", e)))?
            .json()
            .map_err(|e| backend_error(format!("Invalid response body: {}", e)))?;

        parse_generative_response(&response, self.default_confidence)
            .map(|result| result.into_iter().collect())
            .map_err(backend_error)
    }
}

/// Concatenates the text parts of the first candidate. The model's JSON `confidence`
/// is used when present, otherwise `default_confidence`.
pub fn parse_generative_response(
    response: &Value,
    default_confidence: f32,
) -> Result<Option<RecognitionResult>, String> {
    if let Some(message) = response.pointer("/error/message").and_then(Value::as_str) {
        return Err(message.to_string());
    }

    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| "response has no candidate content".to_string())?;
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let confidence = serde_json::from_str::<Value>(strip_code_fence(text))
        .ok()
        .and_then(|parsed| parsed.get("confidence").and_then(Value::as_f64))
        .map(|c| c as f32)
        .unwrap_or(default_confidence);

    Ok(Some(RecognitionResult::new(text, confidence, RecognitionMethod::Generative)))
}

/// Highest confidence result at or above `threshold`; the earliest wins a tie.
pub fn select_best(results: &[RecognitionResult], threshold: f32) -> Option<RecognitionResult> {
    results
        .iter()
        .fold(None::<&RecognitionResult>, |best, candidate| match best {
            Some(current) if current.confidence >= candidate.confidence => Some(current),
            _ => Some(candidate),
        })
        .filter(|best| best.confidence >= threshold)
        .cloned()
}

/// Runs the configured backends over a region, in order.
pub struct TextRecognizer {
    backends: Vec<Box<dyn RecognitionBackend>>,
    threshold: f32,
    mode: RecognitionMode,
    hint: Option<String>,
}

impl TextRecognizer {
    pub fn new(backends: Vec<Box<dyn RecognitionBackend>>, threshold: f32, mode: RecognitionMode) -> Self {
        TextRecognizer {
            backends,
            threshold,
            mode,
            hint: None,
        }
    }

    /// Local engine first, then cloud vision, then the generative extractor.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, TravelError> {
        let mut backends: Vec<Box<dyn RecognitionBackend>> = Vec::new();
        if config.tesseract.enabled {
            backends.push(Box::new(TesseractBackend::new(&config.tesseract)));
        }
        if config.cloud_vision.enabled {
            backends.push(Box::new(CloudVisionBackend::new(&config.cloud_vision)?));
        }
        if config.generative.enabled {
            backends.push(Box::new(GenerativeBackend::new(&config.generative)?));
        }

        info!(
            "Text recognizer ready with backends: {:?}",
            backends.iter().map(|b| b.method().as_str()).collect::<Vec<_>>()
        );
        Ok(Self::new(
            backends,
            config.recognition.confidence_threshold,
            config.recognition.mode,
        ))
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn recognize(&self, image_png: &[u8]) -> Result<Vec<RecognitionResult>, TravelError> {
        self.recognize_region(0, image_png)
    }

    /// Every result from every backend that ran. Failing backends are logged and
    /// skipped; if none succeeds the region fails.
    pub fn recognize_region(&self, region: usize, image_png: &[u8]) -> Result<Vec<RecognitionResult>, TravelError> {
        let mut results = Vec::new();
        let mut failures = 0;

        for backend in &self.backends {
            match backend.recognize(image_png, self.hint.as_deref()) {
                Ok(mut found) => {
                    debug!(
                        "Region {}: {} returned {} result(s)",
                        region,
                        backend.method(),
                        found.len()
                    );
                    let good_enough = found.iter().any(|r| r.confidence >= self.threshold);
                    results.append(&mut found);
                    if self.mode == RecognitionMode::Fallback && good_enough {
                        break;
                    }
                }
                Err(err) => {
                    warn!("Region {}: {} failed: {}", region, backend.method(), err);
                    failures += 1;
                }
            }
        }

        if failures == self.backends.len() {
            return Err(TravelError::AllBackendsFailed {
                region,
                attempted: failures,
            });
        }
        Ok(results)
    }

    pub fn best(&self, results: &[RecognitionResult]) -> Option<RecognitionResult> {
        select_best(results, self.threshold)
    }
}
