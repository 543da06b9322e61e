use serde::Serialize;

/// Normalized bounding geometry for one detection, expressed as fractions
/// of the frame so the client can speak positions without knowing pixel
/// dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bounds {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub name: String,
    pub confidence: f64,
    #[serde(flatten)]
    pub bounds: Option<Bounds>,
}

impl Detection {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// Uniform adapter outcome. Every perception adapter returns one of these
/// four states; "ran and found nothing" (`None`) is never collapsed into
/// "failed to run" (`Error`), and `NotFound` exists only for focus mode
/// where the named target matched no detection.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    Ok { items: Vec<Detection> },
    None,
    Error { message: String },
    NotFound,
}

impl DetectionResult {
    pub fn error(message: impl Into<String>) -> Self {
        DetectionResult::Error {
            message: message.into(),
        }
    }

    pub fn single(item: Detection) -> Self {
        DetectionResult::Ok { items: vec![item] }
    }
}
