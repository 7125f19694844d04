mod backend;
mod backends;
mod engine;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::InferenceEngine;
pub use result::{BoundingBox, Detection};
