use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{info, warn};

use sightline_contracts::{
    error_result, Capability, DetectionResult, FrameRequest, RequestMode, ResponseEnvelope,
};

use crate::adapters::{
    detect_currency, detect_objects, detect_scene, detect_text, AdapterSettings,
};
use crate::decoder::{decode_frame, DecodedFrame};
use crate::registry::ModelRegistry;
use crate::router::{RouteAdvisor, TextRefiner};

/// Turns one raw inbound message into exactly one response envelope. Every
/// path through `handle` terminates in an envelope, so callers never have
/// to reason about a request that produced zero or two replies.
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    router: Box<dyn RouteAdvisor>,
    refiner: Option<Box<dyn TextRefiner>>,
    settings: AdapterSettings,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ModelRegistry>,
        router: Box<dyn RouteAdvisor>,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            registry,
            router,
            refiner: None,
            settings,
        }
    }

    /// Enables the LLM cleanup pass over recognized text. Refinement is a
    /// single attempt; any failure keeps the raw OCR output.
    pub fn with_text_refiner(mut self, refiner: Box<dyn TextRefiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn handle(&self, raw: &str) -> ResponseEnvelope {
        let started = Instant::now();

        let request = match FrameRequest::parse(raw) {
            Ok(request) => request,
            Err(err) => return ResponseEnvelope::failure(err.to_string()),
        };

        let frame = match decode_frame(&request.image) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "frame decode failed");
                return ResponseEnvelope::failure("Error: Invalid or corrupt image data");
            }
        };

        let (capability, routed) = match &request.mode {
            RequestMode::Direct(capability) => (*capability, false),
            RequestMode::Auto => match self.router.advise(&frame) {
                Ok(capability) => (capability, true),
                Err(err) => {
                    warn!(error = %err, "routing failed");
                    return ResponseEnvelope::routing_failure("Error: Smart analysis failed");
                }
            },
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.invoke(capability, &frame, &request)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    capability = capability.feature_id(),
                    "adapter panicked during invocation"
                );
                error_result("Error: internal adapter failure")
            }
        };

        info!(
            capability = capability.feature_id(),
            routed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            width = frame.width(),
            height = frame.height(),
            "frame handled"
        );

        if routed {
            ResponseEnvelope::auto_routed(result, capability)
        } else {
            ResponseEnvelope::direct(result, capability)
        }
    }

    fn invoke(&self, capability: Capability, frame: &DecodedFrame, request: &FrameRequest) -> Value {
        match capability {
            Capability::Object | Capability::Hazard => {
                let result =
                    detect_objects(self.registry.object(), frame, None, &self.settings);
                render_detections(result)
            }
            Capability::Focus => {
                let result = detect_objects(
                    self.registry.object(),
                    frame,
                    request.focus_object.as_deref(),
                    &self.settings,
                );
                render_focus(result)
            }
            Capability::Scene => {
                let result = detect_scene(self.registry.scene(), frame);
                render_scene(result)
            }
            Capability::Text => {
                let (result, language) = detect_text(
                    self.registry.ocr(),
                    frame,
                    request.language.as_deref(),
                    &self.settings,
                );
                let result = self.refine_text(result);
                render_text(result, &language)
            }
            Capability::Currency => {
                let result = detect_currency(self.registry.currency(), frame, &self.settings);
                render_currency(result)
            }
        }
    }

    /// One cleanup attempt over successfully recognized text. Failure or
    /// an empty cleaned reply keeps the raw OCR output.
    fn refine_text(&self, result: DetectionResult) -> DetectionResult {
        let Some(refiner) = self.refiner.as_deref() else {
            return result;
        };
        let DetectionResult::Ok { mut items } = result else {
            return result;
        };
        if let Some(item) = items.first_mut() {
            match refiner.refine(&item.name) {
                Ok(cleaned) => item.name = cleaned,
                Err(err) => {
                    warn!(error = %err, "text cleaning failed; keeping raw OCR output");
                }
            }
        }
        DetectionResult::Ok { items }
    }
}

fn render_detections(result: DetectionResult) -> Value {
    match result {
        DetectionResult::Ok { items } => json!({"status": "ok", "detections": items}),
        DetectionResult::None => json!({"status": "none"}),
        DetectionResult::NotFound => json!({"status": "not_found"}),
        DetectionResult::Error { message } => error_result(message),
    }
}

fn render_focus(result: DetectionResult) -> Value {
    match result {
        DetectionResult::Ok { mut items } => match items.pop() {
            Some(item) => json!({"status": "ok", "detection": item}),
            None => json!({"status": "none"}),
        },
        DetectionResult::None => json!({"status": "none"}),
        DetectionResult::NotFound => json!({"status": "not_found"}),
        DetectionResult::Error { message } => error_result(message),
    }
}

fn render_scene(result: DetectionResult) -> Value {
    match result {
        DetectionResult::Ok { items } => match items.first() {
            Some(item) => {
                json!({"status": "ok", "scene": item.name, "confidence": item.confidence})
            }
            None => json!({"status": "none"}),
        },
        DetectionResult::None => json!({"status": "none"}),
        DetectionResult::NotFound => json!({"status": "not_found"}),
        DetectionResult::Error { message } => error_result(message),
    }
}

fn render_text(result: DetectionResult, language: &str) -> Value {
    match result {
        DetectionResult::Ok { items } => match items.first() {
            Some(item) => json!({
                "status": "ok",
                "text": item.name,
                "confidence": item.confidence,
                "language": language,
            }),
            None => json!({"status": "none", "message": "No text detected"}),
        },
        DetectionResult::None => json!({"status": "none", "message": "No text detected"}),
        DetectionResult::NotFound => json!({"status": "not_found"}),
        DetectionResult::Error { message } => error_result(message),
    }
}

fn render_currency(result: DetectionResult) -> Value {
    match result {
        DetectionResult::Ok { items } => match items.first() {
            Some(item) => {
                json!({"status": "ok", "currency": item.name, "confidence": item.confidence})
            }
            None => json!({"status": "none", "message": "No currency detected"}),
        },
        DetectionResult::None => json!({"status": "none", "message": "No currency detected"}),
        DetectionResult::NotFound => json!({"status": "not_found"}),
        DetectionResult::Error { message } => error_result(message),
    }
}
