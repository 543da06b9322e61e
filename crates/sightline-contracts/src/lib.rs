pub mod capability;
pub mod detection;
pub mod protocol;

pub use capability::Capability;
pub use detection::{Bounds, Detection, DetectionResult};
pub use protocol::{
    connect_ack, error_result, FrameRequest, RequestError, RequestMode, ResponseEnvelope,
};
