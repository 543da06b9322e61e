use crate::backends::{CurrencyService, ObjectModel, OcrEngine, SceneModel};

/// Holds whichever perception backends the server was configured with.
/// A missing backend is a normal state; adapters surface it as a model
/// error on the requests that need it, and every other capability keeps
/// working.
#[derive(Default)]
pub struct ModelRegistry {
    object: Option<Box<dyn ObjectModel>>,
    scene: Option<Box<dyn SceneModel>>,
    ocr: Option<Box<dyn OcrEngine>>,
    currency: Option<Box<dyn CurrencyService>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_object(&mut self, model: Box<dyn ObjectModel>) {
        self.object = Some(model);
    }

    pub fn register_scene(&mut self, model: Box<dyn SceneModel>) {
        self.scene = Some(model);
    }

    pub fn register_ocr(&mut self, engine: Box<dyn OcrEngine>) {
        self.ocr = Some(engine);
    }

    pub fn register_currency(&mut self, service: Box<dyn CurrencyService>) {
        self.currency = Some(service);
    }

    pub fn object(&self) -> Option<&dyn ObjectModel> {
        self.object.as_deref()
    }

    pub fn scene(&self) -> Option<&dyn SceneModel> {
        self.scene.as_deref()
    }

    pub fn ocr(&self) -> Option<&dyn OcrEngine> {
        self.ocr.as_deref()
    }

    pub fn currency(&self) -> Option<&dyn CurrencyService> {
        self.currency.as_deref()
    }

    /// Names of the registered backends, for the startup log line.
    pub fn loaded(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.object.is_some() {
            names.push("object");
        }
        if self.scene.is_some() {
            names.push("scene");
        }
        if self.ocr.is_some() {
            names.push("ocr");
        }
        if self.currency.is_some() {
            names.push("currency");
        }
        names
    }
}
