use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::capability::Capability;

pub const WIRE_AUTO: &str = "auto";
pub const REQUEST_TYPE_LLM_ROUTE: &str = "llm_route";

/// How the client asked for the frame to be handled: a named capability,
/// or deferral to the supervision LLM.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestMode {
    Direct(Capability),
    Auto,
}

/// One inbound frame message, validated but not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub image: String,
    pub mode: RequestMode,
    pub focus_object: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Error: Invalid message format")]
    NotAnObject,
    #[error("Error: Missing 'image' or 'type'")]
    MissingField,
    #[error("Error: Unsupported detection type '{0}'")]
    UnsupportedCapability(String),
    #[error("Error: Missing 'focus_object' for focus detection")]
    MissingFocusTarget,
}

impl FrameRequest {
    /// Parses the raw text of one WebSocket message. Rejection here means
    /// no decode is attempted and no model runs.
    pub fn parse(raw: &str) -> Result<FrameRequest, RequestError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|_| RequestError::NotAnObject)?;
        let Some(message) = value.as_object() else {
            return Err(RequestError::NotAnObject);
        };

        let image = message
            .get("image")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let detection_type = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if image.is_empty() || detection_type.is_empty() {
            return Err(RequestError::MissingField);
        }

        let request_type = message
            .get("request_type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        // The type token is validated first; the llm_route marker only
        // upgrades a known capability to auto-mode, it never launders an
        // unknown one.
        let mode = if detection_type == WIRE_AUTO {
            RequestMode::Auto
        } else {
            match Capability::from_wire(detection_type) {
                Some(_) if request_type == REQUEST_TYPE_LLM_ROUTE => RequestMode::Auto,
                Some(capability) => RequestMode::Direct(capability),
                None => {
                    return Err(RequestError::UnsupportedCapability(
                        detection_type.to_string(),
                    ))
                }
            }
        };

        let focus_object = message
            .get("focus_object")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .map(str::to_string);
        if mode == RequestMode::Direct(Capability::Focus) && focus_object.is_none() {
            return Err(RequestError::MissingFocusTarget);
        }

        let language = message
            .get("language")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string);

        Ok(FrameRequest {
            image: image.to_string(),
            mode,
            focus_object,
            language,
        })
    }
}

/// The single outbound message for one inbound frame. Built once, emitted
/// once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_from_supervision_llm: Option<bool>,
}

impl ResponseEnvelope {
    pub fn direct(result: Value, capability: Capability) -> Self {
        Self {
            result,
            feature_id: Some(capability.feature_id().to_string()),
            is_from_supervision_llm: None,
        }
    }

    pub fn auto_routed(result: Value, capability: Capability) -> Self {
        Self {
            result,
            feature_id: Some(capability.feature_id().to_string()),
            is_from_supervision_llm: Some(true),
        }
    }

    /// Terminal failure before any capability ran (validation or decode).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: error_result(message),
            feature_id: None,
            is_from_supervision_llm: None,
        }
    }

    /// The router itself failed; tagged so the client can distinguish this
    /// from a model-level failure. No capability ran, so no feature id.
    pub fn routing_failure(message: impl Into<String>) -> Self {
        Self {
            result: error_result(message),
            feature_id: None,
            is_from_supervision_llm: Some(true),
        }
    }

    pub fn to_message(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"result":{"status":"error","message":"Server Error: response serialization failed"}}"#
                .to_string()
        })
    }
}

pub fn error_result(message: impl Into<String>) -> Value {
    json!({"status": "error", "message": message.into()})
}

/// Acknowledgment sent once when a connection is accepted.
pub fn connect_ack(connection_id: &str) -> Value {
    json!({
        "event": "connect",
        "result": {"status": "connected", "id": connection_id},
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{FrameRequest, RequestError, RequestMode, ResponseEnvelope};
    use crate::capability::Capability;

    fn request(value: serde_json::Value) -> Result<FrameRequest, RequestError> {
        FrameRequest::parse(&value.to_string())
    }

    #[test]
    fn parse_direct_capability() {
        let parsed = request(json!({"image": "aGk=", "type": "scene"})).expect("valid");
        assert_eq!(parsed.mode, RequestMode::Direct(Capability::Scene));
        assert_eq!(parsed.image, "aGk=");
        assert_eq!(parsed.focus_object, None);
    }

    #[test]
    fn parse_auto_via_type_or_request_type() {
        let by_type = request(json!({"image": "aGk=", "type": "auto"})).expect("valid");
        assert_eq!(by_type.mode, RequestMode::Auto);

        let by_marker = request(json!({
            "image": "aGk=",
            "type": "object",
            "request_type": "llm_route",
        }))
        .expect("valid");
        assert_eq!(by_marker.mode, RequestMode::Auto);
    }

    #[test]
    fn missing_image_or_type_is_one_validation_error() {
        assert_eq!(
            request(json!({"type": "object"})),
            Err(RequestError::MissingField)
        );
        assert_eq!(
            request(json!({"image": "aGk="})),
            Err(RequestError::MissingField)
        );
        assert_eq!(
            request(json!({"image": "", "type": "object"})),
            Err(RequestError::MissingField)
        );
    }

    #[test]
    fn unsupported_type_is_not_silently_remapped() {
        assert_eq!(
            request(json!({"image": "aGk=", "type": "emotion"})),
            Err(RequestError::UnsupportedCapability("emotion".to_string()))
        );
    }

    #[test]
    fn llm_route_marker_does_not_launder_an_unknown_type() {
        assert_eq!(
            request(json!({
                "image": "aGk=",
                "type": "bogus",
                "request_type": "llm_route",
            })),
            Err(RequestError::UnsupportedCapability("bogus".to_string()))
        );
    }

    #[test]
    fn focus_requires_a_target() {
        assert_eq!(
            request(json!({"image": "aGk=", "type": "focus"})),
            Err(RequestError::MissingFocusTarget)
        );
        assert_eq!(
            request(json!({"image": "aGk=", "type": "focus", "focus_object": "  "})),
            Err(RequestError::MissingFocusTarget)
        );
        let parsed = request(json!({
            "image": "aGk=",
            "type": "focus",
            "focus_object": "keys",
        }))
        .expect("valid");
        assert_eq!(parsed.focus_object.as_deref(), Some("keys"));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert_eq!(
            FrameRequest::parse("[1, 2]"),
            Err(RequestError::NotAnObject)
        );
        assert_eq!(
            FrameRequest::parse("not json"),
            Err(RequestError::NotAnObject)
        );
    }

    #[test]
    fn envelope_serialization_omits_absent_fields() {
        let failure = ResponseEnvelope::failure("Error: Missing 'image' or 'type'");
        let value = serde_json::to_value(&failure).expect("serialize");
        assert_eq!(
            value,
            json!({
                "result": {
                    "status": "error",
                    "message": "Error: Missing 'image' or 'type'",
                }
            })
        );

        let routed =
            ResponseEnvelope::auto_routed(json!({"status": "ok", "scene": "kitchen", "confidence": 0.7}), Capability::Scene);
        let value = serde_json::to_value(&routed).expect("serialize");
        assert_eq!(value["feature_id"], json!("scene_detection"));
        assert_eq!(value["is_from_supervision_llm"], json!(true));
    }

    #[test]
    fn routing_failure_is_tagged_without_feature_id() {
        let envelope = ResponseEnvelope::routing_failure("Error: Smart analysis failed");
        let value = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(value["is_from_supervision_llm"], json!(true));
        assert!(value.get("feature_id").is_none());
        assert_eq!(value["result"]["status"], json!("error"));
    }

    #[test]
    fn connect_ack_carries_connection_id() {
        let ack = super::connect_ack("abc-123");
        assert_eq!(ack["event"], json!("connect"));
        assert_eq!(ack["result"]["status"], json!("connected"));
        assert_eq!(ack["result"]["id"], json!("abc-123"));
    }
}
