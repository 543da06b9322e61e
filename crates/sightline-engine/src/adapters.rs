use tracing::warn;

use sightline_contracts::{Detection, DetectionResult};

use crate::backends::{CurrencyService, ObjectModel, OcrError, OcrEngine, SceneModel};
use crate::decoder::DecodedFrame;

pub const MAX_OBJECTS_TO_RETURN: usize = 4;
pub const CURRENCY_DETECTION_CONFIDENCE: f64 = 0.6;
pub const DEFAULT_OCR_LANG: &str = "eng";

/// Post-processing knobs shared by the perception adapters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub max_objects: usize,
    pub currency_min_confidence: f64,
    pub default_language: String,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            max_objects: MAX_OBJECTS_TO_RETURN,
            currency_min_confidence: CURRENCY_DETECTION_CONFIDENCE,
            default_language: DEFAULT_OCR_LANG.to_string(),
        }
    }
}

/// Runs object detection over a frame. With `focus` set, the output is the
/// single best-confidence detection whose label matches the target, or
/// `NotFound`; otherwise the detections are ordered by confidence and
/// capped at `max_objects`.
pub fn detect_objects(
    model: Option<&dyn ObjectModel>,
    frame: &DecodedFrame,
    focus: Option<&str>,
    settings: &AdapterSettings,
) -> DetectionResult {
    let Some(model) = model else {
        return DetectionResult::error("Object model not loaded");
    };

    let mut detections = match model.detect(frame) {
        Ok(detections) => detections,
        Err(err) => {
            warn!(error = %err, "object detection failed");
            return DetectionResult::error("Error in object detection");
        }
    };

    // Stable sort keeps backend order among equal confidences.
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    if let Some(target) = focus {
        let matched = detections
            .into_iter()
            .find(|detection| detection.name.eq_ignore_ascii_case(target));
        return match matched {
            Some(detection) => DetectionResult::single(detection),
            None => DetectionResult::NotFound,
        };
    }

    if detections.is_empty() {
        return DetectionResult::None;
    }
    detections.truncate(settings.max_objects);
    DetectionResult::Ok { items: detections }
}

/// Classifies the whole frame into one scene label. The winning index is
/// looked up in the model's label table; an out-of-range index degrades to
/// "Unknown Scene" rather than failing the request.
pub fn detect_scene(model: Option<&dyn SceneModel>, frame: &DecodedFrame) -> DetectionResult {
    let Some(model) = model else {
        return DetectionResult::error("Scene model not loaded");
    };

    let probabilities = match model.classify(frame) {
        Ok(probabilities) => probabilities,
        Err(err) => {
            warn!(error = %err, "scene classification failed");
            return DetectionResult::error("Error in scene detection");
        }
    };

    let Some((index, confidence)) = probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
    else {
        return DetectionResult::None;
    };

    let name = match model.labels().get(index) {
        Some(label) => label.replace('_', " "),
        None => {
            warn!(index, labels = model.labels().len(), "scene index has no label");
            "Unknown Scene".to_string()
        }
    };
    DetectionResult::single(Detection::new(name, confidence))
}

/// Reads text out of a frame. An unsupported requested language falls back
/// to the configured default once; the resolved language is returned so
/// the response can report which one actually ran.
pub fn detect_text(
    engine: Option<&dyn OcrEngine>,
    frame: &DecodedFrame,
    requested: Option<&str>,
    settings: &AdapterSettings,
) -> (DetectionResult, String) {
    let default_language = settings.default_language.clone();
    let Some(engine) = engine else {
        return (DetectionResult::error("OCR engine not loaded"), default_language);
    };

    let mut language = requested
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| default_language.clone());
    if !engine.supported_languages().iter().any(|code| code == &language) {
        if language != default_language {
            warn!(requested = %language, fallback = %default_language, "unsupported OCR language");
            language = default_language.clone();
        }
        if !engine.supported_languages().iter().any(|code| code == &language) {
            let message = format!("Missing OCR language data for '{language}'");
            return (DetectionResult::error(message), language);
        }
    }

    match engine.recognize(frame, &language) {
        Ok(recognized) if recognized.content.is_empty() => (DetectionResult::None, language),
        Ok(recognized) => (
            DetectionResult::single(Detection::new(recognized.content, recognized.confidence)),
            language,
        ),
        Err(OcrError::MissingLanguage(code)) => (
            DetectionResult::error(format!("Missing OCR language data for '{code}'")),
            language,
        ),
        Err(err) => {
            warn!(error = %err, "text recognition failed");
            (DetectionResult::error("Error in text detection"), language)
        }
    }
}

/// Identifies the single most confident banknote prediction above the
/// confidence floor. Below-floor predictions are treated as noise, so a
/// frame full of weak guesses reads as "no currency" rather than a wrong
/// denomination.
pub fn detect_currency(
    service: Option<&dyn CurrencyService>,
    frame: &DecodedFrame,
    settings: &AdapterSettings,
) -> DetectionResult {
    let Some(service) = service else {
        return DetectionResult::error("Currency model not loaded");
    };

    let predictions = match service.recognize(frame) {
        Ok(predictions) => predictions,
        Err(err) => {
            warn!(error = %err, "currency recognition failed");
            return DetectionResult::error("Error in currency detection");
        }
    };

    let best = predictions
        .into_iter()
        .filter(|prediction| prediction.confidence >= settings.currency_min_confidence)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
    match best {
        Some(prediction) => {
            DetectionResult::single(Detection::new(prediction.class, prediction.confidence))
        }
        None => DetectionResult::None,
    }
}
