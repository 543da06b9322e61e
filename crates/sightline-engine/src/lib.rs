pub mod adapters;
pub mod backends;
pub mod decoder;
pub mod dispatch;
pub mod registry;
pub mod router;

pub use adapters::AdapterSettings;
pub use decoder::{decode_frame, DecodeError, DecodedFrame};
pub use dispatch::Dispatcher;
pub use registry::ModelRegistry;
pub use router::{OllamaRouter, OllamaTextRefiner, RouteAdvisor, RouteError, TextRefiner};
