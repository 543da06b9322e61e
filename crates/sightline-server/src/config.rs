use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use sightline_engine::adapters::{
    AdapterSettings, CURRENCY_DETECTION_CONFIDENCE, DEFAULT_OCR_LANG, MAX_OBJECTS_TO_RETURN,
};
use sightline_engine::backends::{
    load_scene_labels, HttpCurrencyService, HttpObjectModel, HttpOcrEngine, HttpSceneModel,
    DEFAULT_OBJECT_CLASSES, OBJECT_DETECTION_CONFIDENCE,
};
use sightline_engine::router::{
    OllamaTextRefiner, DEFAULT_ROUTER_MODEL, DEFAULT_ROUTER_URL, DEFAULT_TEXT_CLEAN_MODEL,
};
use sightline_engine::{ModelRegistry, OllamaRouter};

/// Assistive-vision streaming backend.
#[derive(Debug, Parser)]
#[command(name = "sightlined", version, about)]
pub struct ServerArgs {
    /// Address the WebSocket listener binds to.
    #[arg(long, default_value = "0.0.0.0:5000", env = "SIGHTLINE_BIND")]
    pub bind: String,

    /// Number of dispatch worker threads.
    #[arg(long, default_value_t = 4, env = "SIGHTLINE_WORKERS")]
    pub workers: usize,

    /// Ollama-compatible generate endpoint used for auto routing.
    #[arg(long, default_value = DEFAULT_ROUTER_URL, env = "SIGHTLINE_ROUTER_URL")]
    pub router_url: String,

    /// Vision-capable model name the router calls.
    #[arg(long, default_value = DEFAULT_ROUTER_MODEL, env = "SIGHTLINE_ROUTER_MODEL")]
    pub router_model: String,

    /// Router request timeout in seconds.
    #[arg(long, default_value_t = 60, env = "SIGHTLINE_ROUTER_TIMEOUT_SECS")]
    pub router_timeout_secs: u64,

    /// Model used to clean OCR output before replying. Shares the router
    /// endpoint and timeout.
    #[arg(long, default_value = DEFAULT_TEXT_CLEAN_MODEL, env = "SIGHTLINE_TEXT_CLEAN_MODEL")]
    pub text_clean_model: String,

    /// Disable the OCR cleanup pass and reply with raw recognized text.
    #[arg(long, env = "SIGHTLINE_NO_TEXT_CLEAN")]
    pub no_text_clean: bool,

    /// Object detection endpoint. Unset leaves object, hazard and focus
    /// requests answered with a model error.
    #[arg(long, env = "SIGHTLINE_OBJECT_URL")]
    pub object_url: Option<String>,

    /// Comma-separated class list override for the object model.
    #[arg(long, env = "SIGHTLINE_OBJECT_CLASSES")]
    pub object_classes: Option<String>,

    /// Scene classification endpoint.
    #[arg(long, env = "SIGHTLINE_SCENE_URL")]
    pub scene_url: Option<String>,

    /// Scene label file, one "/x/label index" line per class.
    #[arg(long, env = "SIGHTLINE_SCENE_LABELS")]
    pub scene_labels: Option<PathBuf>,

    /// OCR endpoint.
    #[arg(long, env = "SIGHTLINE_OCR_URL")]
    pub ocr_url: Option<String>,

    /// Comma-separated OCR language codes the endpoint has data for.
    #[arg(long, default_value = "eng", env = "SIGHTLINE_OCR_LANGUAGES")]
    pub ocr_languages: String,

    /// Currency recognition endpoint.
    #[arg(long, env = "SIGHTLINE_CURRENCY_URL")]
    pub currency_url: Option<String>,

    /// OCR language used when the client names none or an unsupported one.
    #[arg(long, default_value = DEFAULT_OCR_LANG, env = "SIGHTLINE_DEFAULT_LANGUAGE")]
    pub default_language: String,
}

impl ServerArgs {
    pub fn router(&self) -> OllamaRouter {
        OllamaRouter::new(
            self.router_url.clone(),
            self.router_model.clone(),
            Duration::from_secs(self.router_timeout_secs),
        )
    }

    pub fn text_refiner(&self) -> Option<OllamaTextRefiner> {
        if self.no_text_clean {
            return None;
        }
        Some(OllamaTextRefiner::new(
            self.router_url.clone(),
            self.text_clean_model.clone(),
            Duration::from_secs(self.router_timeout_secs),
        ))
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            max_objects: MAX_OBJECTS_TO_RETURN,
            currency_min_confidence: CURRENCY_DETECTION_CONFIDENCE,
            default_language: self.default_language.to_ascii_lowercase(),
        }
    }

    /// Builds the registry from whichever endpoints were configured.
    /// Missing endpoints are logged and skipped; only a configured scene
    /// endpoint without a readable label file is a startup failure.
    pub fn build_registry(&self) -> Result<ModelRegistry> {
        let mut registry = ModelRegistry::new();

        match &self.object_url {
            Some(url) => {
                let classes = match &self.object_classes {
                    Some(raw) => split_list(raw),
                    None => DEFAULT_OBJECT_CLASSES
                        .iter()
                        .map(|class| class.to_string())
                        .collect(),
                };
                registry.register_object(Box::new(HttpObjectModel::new(
                    url.clone(),
                    classes,
                    OBJECT_DETECTION_CONFIDENCE,
                )));
            }
            None => warn!("no object endpoint configured; object, hazard and focus requests will fail"),
        }

        match (&self.scene_url, &self.scene_labels) {
            (Some(url), Some(path)) => {
                let labels = load_scene_labels(path)?;
                info!(labels = labels.len(), "scene labels loaded");
                registry.register_scene(Box::new(HttpSceneModel::new(url.clone(), labels)));
            }
            (Some(_), None) => {
                warn!("scene endpoint configured without --scene-labels; skipping scene model")
            }
            (None, _) => warn!("no scene endpoint configured; scene requests will fail"),
        }

        match &self.ocr_url {
            Some(url) => {
                let languages: Vec<String> = split_list(&self.ocr_languages)
                    .into_iter()
                    .map(|code| code.to_ascii_lowercase())
                    .collect();
                registry.register_ocr(Box::new(HttpOcrEngine::new(url.clone(), languages)));
            }
            None => warn!("no OCR endpoint configured; text requests will fail"),
        }

        match &self.currency_url {
            Some(url) => {
                registry.register_currency(Box::new(HttpCurrencyService::new(url.clone())));
            }
            None => warn!("no currency endpoint configured; currency requests will fail"),
        }

        Ok(registry)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
