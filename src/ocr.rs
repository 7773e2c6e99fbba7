//! Text recognition for product photos.
//!
//! Google Cloud Vision `TEXT_DETECTION` is the default back end; a local
//! Tesseract engine is available behind the `tesseract` cargo feature.
//! Every call goes through the same validation, circuit breaker, timeout
//! and retry path in [`TextRecognizer::recognize`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{OcrBackendKind, VisionConfig};
use crate::ocr_config::OcrConfig;
use crate::ocr_errors::OcrError;

/// Google Cloud Vision `images:annotate` client
#[derive(Debug, Clone)]
pub struct GoogleVisionClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    requests: [AnnotateImageRequest<'a>; 1],
}

#[derive(Serialize)]
struct AnnotateImageRequest<'a> {
    image: ImageContent,
    features: [Feature<'a>; 1],
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

impl GoogleVisionClient {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Full text of the image, empty when nothing was found
    pub async fn detect_text(&self, bytes: &[u8]) -> Result<String, OcrError> {
        let body = AnnotateRequest {
            requests: [AnnotateImageRequest {
                image: ImageContent {
                    content: BASE64.encode(bytes),
                },
                features: [Feature {
                    kind: "TEXT_DETECTION",
                }],
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(OcrError::Request(format!("Vision API returned {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OcrError::Service(format!("{status}: {text}")));
        }

        let parsed: AnnotateResponse = response.json().await?;
        let first = parsed.responses.into_iter().next();
        match first {
            Some(AnnotateImageResponse {
                error: Some(error), ..
            }) if !error.message.is_empty() => Err(OcrError::Service(error.message)),
            Some(r) => Ok(r
                .text_annotations
                .into_iter()
                .next()
                .map(|a| a.description)
                .unwrap_or_default()),
            None => Ok(String::new()),
        }
    }
}

#[cfg(feature = "tesseract")]
async fn tesseract_text(languages: String, bytes: Vec<u8>) -> Result<String, OcrError> {
    tokio::task::spawn_blocking(move || {
        let mut tess = leptess::LepTess::new(None, &languages)
            .map_err(|e| OcrError::NotConfigured(format!("Tesseract init failed: {e}")))?;
        tess.set_image_from_mem(&bytes)
            .map_err(|e| OcrError::Extraction(format!("failed to load image: {e}")))?;
        tess.get_utf8_text()
            .map_err(|e| OcrError::Extraction(e.to_string()))
    })
    .await
    .map_err(|e| OcrError::Extraction(format!("OCR task panicked: {e}")))?
}

/// OCR engine in use
#[derive(Debug, Clone)]
pub enum OcrBackend {
    GoogleVision(GoogleVisionClient),
    #[cfg(feature = "tesseract")]
    Tesseract { languages: String },
    /// No usable engine, every request fails with `NotConfigured`
    Disabled(String),
}

impl OcrBackend {
    pub fn from_config(vision: &VisionConfig, client: Client) -> Self {
        match vision.backend {
            OcrBackendKind::GoogleVision => match &vision.google_api_key {
                Some(key) => OcrBackend::GoogleVision(GoogleVisionClient::new(
                    client,
                    vision.google_endpoint.clone(),
                    key.clone(),
                )),
                None => OcrBackend::Disabled("GOOGLE_VISION_API_KEY is not set".into()),
            },
            #[cfg(feature = "tesseract")]
            OcrBackendKind::Tesseract => OcrBackend::Tesseract {
                languages: vision.tesseract_languages.clone(),
            },
            #[cfg(not(feature = "tesseract"))]
            OcrBackendKind::Tesseract => {
                OcrBackend::Disabled("built without the `tesseract` feature".into())
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OcrBackend::GoogleVision(_) => "google-vision",
            #[cfg(feature = "tesseract")]
            OcrBackend::Tesseract { .. } => "tesseract",
            OcrBackend::Disabled(_) => "disabled",
        }
    }

    async fn extract(&self, bytes: &[u8]) -> Result<String, OcrError> {
        match self {
            OcrBackend::GoogleVision(client) => client.detect_text(bytes).await,
            #[cfg(feature = "tesseract")]
            OcrBackend::Tesseract { languages } => tesseract_text(languages.clone(), bytes.to_vec()).await,
            OcrBackend::Disabled(reason) => Err(OcrError::NotConfigured(reason.clone())),
        }
    }
}

/// Collapse recognized text onto one line; `None` when nothing is left
pub fn normalize_text(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

pub struct TextRecognizer {
    backend: OcrBackend,
    config: OcrConfig,
    breaker: CircuitBreaker,
}

impl TextRecognizer {
    pub fn new(backend: OcrBackend, config: OcrConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.recovery.circuit_breaker_threshold,
            config.recovery.circuit_breaker_reset(),
        );
        Self {
            backend,
            config,
            breaker,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Check the image format and its size limit
    pub fn validate_image(&self, bytes: &[u8]) -> Result<ImageFormat, OcrError> {
        if bytes.len() < self.config.min_format_bytes {
            return Err(OcrError::UnsupportedFormat);
        }
        let format = image::guess_format(bytes).map_err(|_| OcrError::UnsupportedFormat)?;
        let format_limit = self
            .config
            .format_limits
            .limit_for(format)
            .ok_or(OcrError::UnsupportedFormat)?;

        let size = bytes.len() as u64;
        let limit = format_limit.min(self.config.max_file_size);
        if size > limit {
            return Err(OcrError::TooLarge { size, limit });
        }
        Ok(format)
    }

    /// Recognize the text in an image.
    ///
    /// Transient failures are retried with backoff while the breaker stays
    /// closed. `Ok(None)` means the image was read but holds no text.
    pub async fn recognize(&self, bytes: &[u8]) -> Result<Option<String>, OcrError> {
        let format = self.validate_image(bytes)?;
        if self.breaker.is_open() {
            warn!(backend = self.backend.name(), "OCR circuit open, refusing request");
            return Err(OcrError::CircuitOpen);
        }

        let recovery = &self.config.recovery;
        let timeout = recovery.operation_timeout();
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(timeout, self.backend.extract(bytes)).await {
                Ok(result) => result,
                Err(_) => Err(OcrError::Timeout(timeout)),
            };

            match result {
                Ok(raw) => {
                    self.breaker.record_success();
                    let text = normalize_text(&raw);
                    info!(
                        backend = self.backend.name(),
                        format = ?format,
                        chars = text.as_ref().map_or(0, |t| t.len()),
                        "OCR completed"
                    );
                    return Ok(text);
                }
                Err(e) => {
                    if e.counts_against_service() {
                        self.breaker.record_failure();
                    }
                    if !e.is_transient() || attempt >= recovery.max_retries || self.breaker.is_open() {
                        warn!(
                            backend = self.backend.name(),
                            attempt,
                            consecutive_failures = self.breaker.failure_count(),
                            error = %e,
                            "OCR failed"
                        );
                        return Err(e);
                    }
                    attempt += 1;
                    let delay = recovery.calculate_retry_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying OCR");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
