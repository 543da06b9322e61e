use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use sightline_contracts::{Bounds, Detection};

use crate::decoder::{to_jpeg_base64, DecodedFrame};

/// Longest edge sent to inference backends. Larger frames are downscaled
/// before re-encoding so upload size stays bounded.
pub const BACKEND_IMAGE_MAX_EDGE: u32 = 1280;

pub const OBJECT_DETECTION_CONFIDENCE: f64 = 0.55;

/// Labels the object model is asked to look for when the operator does not
/// override the class list.
pub const DEFAULT_OBJECT_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "bus", "truck", "traffic light", "stop sign",
    "bench", "backpack", "umbrella", "handbag", "suitcase", "bottle", "cup", "fork", "knife",
    "spoon", "bowl", "chair", "couch", "bed", "dining table", "toilet", "tv", "laptop", "remote",
    "keyboard", "cell phone", "microwave", "oven", "sink", "refrigerator", "book", "clock",
    "scissors", "door", "stairs",
];

/// Bounding-box object detector. `Hazard` and `Focus` requests ride on the
/// same model; only the post-processing differs.
pub trait ObjectModel: Send + Sync {
    fn detect(&self, frame: &DecodedFrame) -> Result<Vec<Detection>>;
}

/// Whole-frame scene classifier. `classify` returns one probability per
/// entry of `labels`, in the same order.
pub trait SceneModel: Send + Sync {
    fn classify(&self, frame: &DecodedFrame) -> Result<Vec<f64>>;
    fn labels(&self) -> &[String];
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub content: String,
    pub confidence: f64,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("language data for '{0}' is not installed")]
    MissingLanguage(String),
    #[error("OCR engine failure: {0}")]
    Engine(String),
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, frame: &DecodedFrame, language: &str) -> Result<RecognizedText, OcrError>;
    fn supported_languages(&self) -> &[String];
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyPrediction {
    pub class: String,
    pub confidence: f64,
}

pub trait CurrencyService: Send + Sync {
    fn recognize(&self, frame: &DecodedFrame) -> Result<Vec<CurrencyPrediction>>;
}

/// Object detector backed by an HTTP inference endpoint. The endpoint
/// receives the class list and a confidence floor and returns normalized
/// center-format boxes.
pub struct HttpObjectModel {
    endpoint: String,
    classes: Vec<String>,
    confidence: f64,
    http: reqwest::blocking::Client,
}

impl HttpObjectModel {
    pub fn new(endpoint: impl Into<String>, classes: Vec<String>, confidence: f64) -> Self {
        Self {
            endpoint: endpoint.into(),
            classes,
            confidence,
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl ObjectModel for HttpObjectModel {
    fn detect(&self, frame: &DecodedFrame) -> Result<Vec<Detection>> {
        let image = to_jpeg_base64(frame, BACKEND_IMAGE_MAX_EDGE)?;
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({
                "image": image,
                "classes": self.classes,
                "confidence": self.confidence,
            }))
            .send()
            .context("object endpoint request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("object endpoint returned {status}");
        }

        let body: Value = response
            .json()
            .context("object endpoint returned invalid JSON")?;
        let Some(raw) = body.get("detections").and_then(Value::as_array) else {
            bail!("object endpoint response missing 'detections'");
        };

        let mut detections = Vec::with_capacity(raw.len());
        for entry in raw {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if name.is_empty() {
                debug!("skipping unnamed detection entry");
                continue;
            }
            let confidence = entry
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or_default();
            let mut detection = Detection::new(name, confidence);
            if let (Some(center_x), Some(center_y), Some(width), Some(height)) = (
                entry.get("center_x").and_then(Value::as_f64),
                entry.get("center_y").and_then(Value::as_f64),
                entry.get("width").and_then(Value::as_f64),
                entry.get("height").and_then(Value::as_f64),
            ) {
                detection = detection.with_bounds(Bounds {
                    center_x,
                    center_y,
                    width,
                    height,
                });
            }
            detections.push(detection);
        }
        Ok(detections)
    }
}

pub struct HttpSceneModel {
    endpoint: String,
    labels: Vec<String>,
    http: reqwest::blocking::Client,
}

impl HttpSceneModel {
    pub fn new(endpoint: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            labels,
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl SceneModel for HttpSceneModel {
    fn classify(&self, frame: &DecodedFrame) -> Result<Vec<f64>> {
        let image = to_jpeg_base64(frame, BACKEND_IMAGE_MAX_EDGE)?;
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({"image": image}))
            .send()
            .context("scene endpoint request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("scene endpoint returned {status}");
        }

        let body: Value = response
            .json()
            .context("scene endpoint returned invalid JSON")?;
        let Some(raw) = body.get("probabilities").and_then(Value::as_array) else {
            bail!("scene endpoint response missing 'probabilities'");
        };
        Ok(raw.iter().filter_map(Value::as_f64).collect())
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

pub struct HttpOcrEngine {
    endpoint: String,
    languages: Vec<String>,
    http: reqwest::blocking::Client,
}

impl HttpOcrEngine {
    pub fn new(endpoint: impl Into<String>, languages: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            languages,
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl OcrEngine for HttpOcrEngine {
    fn recognize(&self, frame: &DecodedFrame, language: &str) -> Result<RecognizedText, OcrError> {
        let image = to_jpeg_base64(frame, BACKEND_IMAGE_MAX_EDGE)
            .map_err(|err| OcrError::Engine(err.to_string()))?;
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({"image": image, "language": language}))
            .send()
            .map_err(|err| OcrError::Engine(format!("OCR endpoint request failed: {err}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|err| OcrError::Engine(format!("OCR endpoint returned invalid JSON: {err}")))?;

        if !status.is_success() {
            let code = body
                .get("error")
                .and_then(|error| error.get("code"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if code == "missing_language" {
                return Err(OcrError::MissingLanguage(language.to_string()));
            }
            return Err(OcrError::Engine(format!("OCR endpoint returned {status}")));
        }

        let content = body
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let confidence = body
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        Ok(RecognizedText {
            content,
            confidence,
        })
    }

    fn supported_languages(&self) -> &[String] {
        &self.languages
    }
}

pub struct HttpCurrencyService {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl HttpCurrencyService {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl CurrencyService for HttpCurrencyService {
    fn recognize(&self, frame: &DecodedFrame) -> Result<Vec<CurrencyPrediction>> {
        let image = to_jpeg_base64(frame, BACKEND_IMAGE_MAX_EDGE)?;
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({"image": image}))
            .send()
            .context("currency endpoint request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("currency endpoint returned {status}");
        }

        let body: Value = response
            .json()
            .context("currency endpoint returned invalid JSON")?;
        let Some(raw) = body.get("predictions").and_then(Value::as_array) else {
            bail!("currency endpoint response missing 'predictions'");
        };

        let predictions = raw
            .iter()
            .filter_map(|entry| {
                let class = entry.get("class").and_then(Value::as_str)?;
                let confidence = entry
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or_default();
                Some(CurrencyPrediction {
                    class: class.to_string(),
                    confidence,
                })
            })
            .collect();
        Ok(predictions)
    }
}

/// Reads a scene label file in the Places-style "/x/label 0" format, one
/// label per line. The path component and trailing index are dropped.
pub fn load_scene_labels(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read scene labels from {}", path.display()))?;
    let labels: Vec<String> = raw
        .lines()
        .filter_map(|line| {
            let entry = line.split_whitespace().next()?;
            let label = entry.rsplit('/').next()?;
            if label.is_empty() {
                None
            } else {
                Some(label.to_string())
            }
        })
        .collect();
    if labels.is_empty() {
        bail!("scene label file {} contains no labels", path.display());
    }
    Ok(labels)
}
