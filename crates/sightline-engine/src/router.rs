use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use sightline_contracts::Capability;

use crate::decoder::{to_jpeg_base64, DecodedFrame};

pub const DEFAULT_ROUTER_URL: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_ROUTER_MODEL: &str = "gemma3:12b";
pub const DEFAULT_TEXT_CLEAN_MODEL: &str = "gemma3:latest";
pub const DEFAULT_ROUTER_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest edge sent to the router model. Routing only needs gist, so the
/// frame is downscaled harder than for the perception backends.
const ROUTER_IMAGE_MAX_EDGE: u32 = 896;

const ROUTER_PROMPT: &str = "You are the routing layer of an assistive vision system for blind \
and low-vision users. Look at the image and decide which single analysis would help the user \
most right now. Reply with exactly one of these tokens and nothing else: object_detection, \
hazard_detection, scene_detection, text_detection, currency_detection. Choose \
hazard_detection when something in view could endanger a pedestrian, text_detection when \
readable text dominates the frame, currency_detection when banknotes or coins are the \
subject, scene_detection when the surroundings matter more than any one thing, and \
object_detection otherwise.";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("router timed out")]
    Timeout,
    #[error("router endpoint unreachable")]
    Connect,
    #[error("router endpoint returned status {0}")]
    Status(u16),
    #[error("router response malformed: {0}")]
    MalformedBody(String),
    #[error("router reply '{0}' names no known capability")]
    Unrecognized(String),
    #[error("frame re-encode for router failed: {0}")]
    Encode(String),
    #[error("router transport failure: {0}")]
    Transport(String),
}

/// Picks a capability for a frame when the client asked for `auto`.
pub trait RouteAdvisor: Send + Sync {
    fn advise(&self, frame: &DecodedFrame) -> Result<Capability, RouteError>;
}

/// Routing via an Ollama-compatible `/api/generate` endpoint with a
/// vision-capable model.
pub struct OllamaRouter {
    endpoint: String,
    model: String,
    timeout: Duration,
    http: reqwest::blocking::Client,
}

impl OllamaRouter {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl RouteAdvisor for OllamaRouter {
    fn advise(&self, frame: &DecodedFrame) -> Result<Capability, RouteError> {
        let image = to_jpeg_base64(frame, ROUTER_IMAGE_MAX_EDGE)
            .map_err(|err| RouteError::Encode(err.to_string()))?;

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "prompt": ROUTER_PROMPT,
                "images": [image],
                "stream": false,
                "options": {"temperature": 0.3},
            }))
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    RouteError::Timeout
                } else if err.is_connect() {
                    RouteError::Connect
                } else {
                    RouteError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouteError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .map_err(|err| RouteError::MalformedBody(err.to_string()))?;
        let Some(reply) = body.get("response").and_then(Value::as_str) else {
            return Err(RouteError::MalformedBody(
                "missing 'response' field".to_string(),
            ));
        };

        let capability = parse_feature_reply(reply)?;
        debug!(reply, capability = capability.feature_id(), "router decision");
        Ok(capability)
    }
}

const TEXT_CLEAN_PROMPT: &str = "The following text came out of an OCR scan and may contain \
stray characters and recognition errors. Correct those errors without otherwise rewriting it, \
keeping the original language. Reply with only the corrected text and nothing else. Here is \
the text:\n";

/// Cleans recognized text of scan artifacts before it is spoken to the
/// user. Refinement is best effort; callers fall back to the raw text on
/// any failure.
pub trait TextRefiner: Send + Sync {
    fn refine(&self, raw: &str) -> anyhow::Result<String>;
}

/// Text cleanup via the same Ollama-compatible endpoint the router uses,
/// typically with a smaller text-only model.
pub struct OllamaTextRefiner {
    endpoint: String,
    model: String,
    timeout: Duration,
    http: reqwest::blocking::Client,
}

impl OllamaTextRefiner {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl TextRefiner for OllamaTextRefiner {
    fn refine(&self, raw: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "prompt": format!("{TEXT_CLEAN_PROMPT}{raw}"),
                "stream": false,
                "options": {"temperature": 0.2},
            }))
            .send()
            .context("text cleaning request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("text cleaning endpoint returned {status}");
        }

        let body: Value = response
            .json()
            .context("text cleaning endpoint returned invalid JSON")?;
        let cleaned = body
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if cleaned.is_empty() {
            bail!("text cleaning endpoint returned an empty reply");
        }
        debug!(raw_len = raw.len(), cleaned_len = cleaned.len(), "text cleaned");
        Ok(cleaned)
    }
}

/// Maps the router model's free-text reply to a capability. Phase one
/// expects a bare feature token; phase two scans for embedded tokens in
/// fixed priority order so a chatty reply still routes deterministically.
pub fn parse_feature_reply(reply: &str) -> Result<Capability, RouteError> {
    let normalized = reply
        .trim()
        .to_ascii_lowercase()
        .replace(['\'', '"'], "");

    for capability in Capability::ROUTE_PRIORITY {
        if normalized == capability.feature_id() {
            return Ok(capability);
        }
    }

    let mut matched = Vec::new();
    for capability in Capability::ROUTE_PRIORITY {
        if normalized.contains(capability.feature_id()) {
            matched.push(capability);
        }
    }
    match matched.split_first() {
        Some((first, rest)) => {
            if !rest.is_empty() {
                warn!(
                    reply,
                    chosen = first.feature_id(),
                    "router reply named several capabilities"
                );
            }
            Ok(*first)
        }
        None => Err(RouteError::Unrecognized(reply.trim().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use image::{DynamicImage, RgbaImage};

    use super::{
        parse_feature_reply, OllamaRouter, OllamaTextRefiner, RouteAdvisor, RouteError, TextRefiner,
    };
    use crate::decoder::DecodedFrame;
    use sightline_contracts::Capability;

    #[test]
    fn exact_token_reply_routes_directly() {
        assert_eq!(
            parse_feature_reply("scene_detection").expect("route"),
            Capability::Scene
        );
        assert_eq!(
            parse_feature_reply("  'scene_detection'\n").expect("route"),
            Capability::Scene
        );
        assert_eq!(
            parse_feature_reply("\"CURRENCY_DETECTION\"").expect("route"),
            Capability::Currency
        );
    }

    #[test]
    fn chatty_reply_takes_first_token_in_priority_order() {
        let routed =
            parse_feature_reply("I think this is object_detection or maybe hazard_detection")
                .expect("route");
        assert_eq!(routed, Capability::Object);

        let routed = parse_feature_reply("definitely text_detection here").expect("route");
        assert_eq!(routed, Capability::Text);
    }

    #[test]
    fn unrecognized_reply_is_an_error_not_a_default() {
        assert!(matches!(
            parse_feature_reply("face_detection"),
            Err(RouteError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_feature_reply(""),
            Err(RouteError::Unrecognized(_))
        ));
    }

    fn test_frame() -> DecodedFrame {
        DecodedFrame::new(DynamicImage::ImageRgba8(RgbaImage::new(8, 8)))
    }

    fn canned_endpoint(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 65536];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}/api/generate")
    }

    #[test]
    fn router_parses_successful_generate_response() {
        let body = r#"{"response":"hazard_detection"}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let router = OllamaRouter::new(
            canned_endpoint(response),
            "test-model",
            Duration::from_secs(5),
        );
        let routed = router.advise(&test_frame()).expect("route");
        assert_eq!(routed, Capability::Hazard);
    }

    #[test]
    fn non_success_status_maps_to_status_error() {
        let response = "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let router = OllamaRouter::new(
            canned_endpoint(response),
            "test-model",
            Duration::from_secs(5),
        );
        assert!(matches!(
            router.advise(&test_frame()),
            Err(RouteError::Status(500))
        ));
    }

    #[test]
    fn missing_response_field_is_malformed_body() {
        let body = r#"{"done":true}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let router = OllamaRouter::new(
            canned_endpoint(response),
            "test-model",
            Duration::from_secs(5),
        );
        assert!(matches!(
            router.advise(&test_frame()),
            Err(RouteError::MalformedBody(_))
        ));
    }

    #[test]
    fn text_refiner_returns_cleaned_reply() {
        let body = r#"{"response":"  EXIT ONLY  "}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let refiner = OllamaTextRefiner::new(
            canned_endpoint(response),
            "test-model",
            Duration::from_secs(5),
        );
        assert_eq!(refiner.refine("EX1T 0NLY").expect("cleaned"), "EXIT ONLY");
    }

    #[test]
    fn text_refiner_rejects_empty_and_error_replies() {
        let body = r#"{"response":"   "}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let refiner = OllamaTextRefiner::new(
            canned_endpoint(response),
            "test-model",
            Duration::from_secs(5),
        );
        assert!(refiner.refine("raw").is_err());

        let response =
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let refiner = OllamaTextRefiner::new(
            canned_endpoint(response),
            "test-model",
            Duration::from_secs(5),
        );
        assert!(refiner.refine("raw").is_err());
    }

    #[test]
    fn unreachable_endpoint_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let router = OllamaRouter::new(
            format!("http://{addr}/api/generate"),
            "test-model",
            Duration::from_secs(5),
        );
        assert!(matches!(
            router.advise(&test_frame()),
            Err(RouteError::Connect)
        ));
    }
}
