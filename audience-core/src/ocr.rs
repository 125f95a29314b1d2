//! OCR engines used by the pipeline
//!
//! Provides an `OcrEngine` trait with implementations for:
//! - **Vision**: Google Cloud Vision `images:annotate` (TEXT_DETECTION) over REST
//! - **Tesseract**: the local `tesseract` binary, fed the image on stdin
//!
//! Engines receive the already-normalized PNG and return raw UTF-8 text. Recognition
//! is best effort; callers treat a failed call like an image without text.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::OcrConfig;

// ============================================================================
// OcrEngine trait
// ============================================================================

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize all text in a PNG image. Returns an empty string when the
    /// engine found nothing to read.
    async fn recognize_text(&self, png: &[u8]) -> Result<String, OcrError>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("Failed to run OCR process: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR process exited with {status}: {stderr}")]
    Process { status: String, stderr: String },
}

// The Vision URL carries the API key as a query parameter.
impl From<reqwest::Error> for OcrError {
    fn from(e: reqwest::Error) -> Self {
        OcrError::Http(e.without_url())
    }
}

// ============================================================================
// Config types
// ============================================================================

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub endpoint: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl VisionConfig {
    pub fn new(api_key: Option<String>, endpoint: String) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            endpoint,
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub binary: String,
    pub languages: String,
}

/// Configuration union for the engine factory.
pub enum OcrBackendConfig {
    Vision(VisionConfig),
    Tesseract(TesseractConfig),
}

impl OcrBackendConfig {
    /// Select the engine named by `[ocr] backend`; anything but "tesseract" means Vision.
    pub fn from_config(config: &OcrConfig) -> Self {
        match config.backend.as_str() {
            "tesseract" => OcrBackendConfig::Tesseract(TesseractConfig {
                binary: config.tesseract_binary.clone(),
                languages: config.tesseract_languages.clone(),
            }),
            _ => {
                let mut vision = VisionConfig::new(None, config.vision_endpoint.clone());
                vision.max_retries = config.max_retries;
                vision.retry_delay_ms = config.retry_delay_ms;
                vision.timeout_seconds = config.timeout_seconds;
                OcrBackendConfig::Vision(vision)
            }
        }
    }
}

pub fn create_engine(config: OcrBackendConfig) -> Result<Box<dyn OcrEngine>, OcrError> {
    match config {
        OcrBackendConfig::Vision(c) => Ok(Box::new(VisionOcrClient::new(c)?)),
        OcrBackendConfig::Tesseract(c) => Ok(Box::new(TesseractOcr::new(c))),
    }
}

// ============================================================================
// Vision API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: VisionImage,
    features: Vec<VisionFeature>,
}

#[derive(Debug, Serialize)]
struct VisionImage {
    content: String,
}

#[derive(Debug, Serialize)]
struct VisionFeature {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    full_text_annotation: Option<FullTextAnnotation>,
    error: Option<VisionStatus>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    description: String,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    text: String,
}

#[derive(Debug, Deserialize)]
struct VisionStatus {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct VisionErrorResponse {
    error: Option<VisionStatus>,
}

// ============================================================================
// VisionOcrClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct VisionOcrClient {
    client: Client,
    config: VisionConfig,
}

impl VisionOcrClient {
    pub fn new(config: VisionConfig) -> Result<Self, OcrError> {
        if config.api_key.is_empty() {
            return Err(OcrError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    async fn annotate_once(&self, png: &[u8]) -> Result<String, OcrError> {
        let url = format!(
            "{}/images:annotate?key={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.api_key
        );

        let request = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: VisionImage {
                    content: STANDARD.encode(png),
                },
                features: vec![VisionFeature {
                    kind: "TEXT_DETECTION".to_string(),
                }],
            }],
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = serde_json::from_str::<VisionErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Vision API error");
            return Err(OcrError::Api { code, message });
        }

        let body: AnnotateResponse = response.json().await?;
        let image_response = body.responses.into_iter().next().unwrap_or_default();

        if let Some(err) = image_response.error {
            return Err(OcrError::Api {
                code: err.code,
                message: err.message,
            });
        }

        let text = image_response
            .full_text_annotation
            .map(|full| full.text)
            .or_else(|| {
                image_response
                    .text_annotations
                    .into_iter()
                    .next()
                    .map(|a| a.description)
            })
            .unwrap_or_default();

        Ok(text)
    }
}

#[async_trait]
impl OcrEngine for VisionOcrClient {
    async fn recognize_text(&self, png: &[u8]) -> Result<String, OcrError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        match Retry::spawn(retry_strategy, || self.annotate_once(png)).await {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All Vision retry attempts failed"
                );
                Err(OcrError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "vision"
    }
}

// ============================================================================
// TesseractOcr
// ============================================================================

pub struct TesseractOcr {
    config: TesseractConfig,
}

impl TesseractOcr {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize_text(&self, png: &[u8]) -> Result<String, OcrError> {
        let mut child = tokio::process::Command::new(&self.config.binary)
            .args(["stdin", "stdout", "-l", self.config.languages.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(png).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(OcrError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

// ============================================================================
// TESTS
// ============================================================================
