use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::backends::StubBackend;
use crate::detect::result::Detection;
use crate::error::DetectError;

/// Lifecycle of the shared model, decided once at startup.
enum ModelState {
    Ready(Mutex<Box<dyn DetectorBackend>>),
    Unavailable { reason: String },
}

/// Shared inference entry point for all concurrent requests.
///
/// The backend sits behind a `Mutex`, so concurrent `/detect` requests run
/// inference one at a time. Backends are not assumed to be reentrant.
pub struct InferenceEngine {
    state: ModelState,
    backend_name: &'static str,
}

impl InferenceEngine {
    pub fn ready<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: ModelState::Unavailable {
                reason: reason.into(),
            },
            backend_name: "none",
        }
    }

    fn from_boxed(backend: Box<dyn DetectorBackend>) -> Self {
        let backend_name = backend.name();
        Self {
            state: ModelState::Ready(Mutex::new(backend)),
            backend_name,
        }
    }

    /// Build the configured backend. Load failures are reported here, once,
    /// and leave the engine unavailable instead of aborting the process.
    pub fn load(settings: &DetectorSettings) -> Self {
        match build_backend(settings) {
            Ok(backend) => Self::activate(backend),
            Err(err) => {
                log::error!("model unavailable: {:#}", err);
                Self::unavailable(format!("{err:#}"))
            }
        }
    }

    fn activate(mut backend: Box<dyn DetectorBackend>) -> Self {
        if let Err(err) = backend.warm_up() {
            log::error!("model warm-up failed: {:#}", err);
            return Self::unavailable(format!("warm-up failed: {err:#}"));
        }
        log::info!("inference backend '{}' ready", backend.name());
        Self::from_boxed(backend)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            ModelState::Ready(_) => None,
            ModelState::Unavailable { reason } => Some(reason.as_str()),
        }
    }

    /// Run the model on one decoded RGB image.
    pub fn infer(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        match &self.state {
            ModelState::Unavailable { reason } => Err(DetectError::ModelUnavailable(reason.clone())),
            ModelState::Ready(backend) => {
                let mut guard = backend
                    .lock()
                    .map_err(|_| DetectError::Inference("backend lock poisoned".into()))?;
                guard
                    .detect(image)
                    .map_err(|err| DetectError::Inference(format!("{err:#}")))
            }
        }
    }
}

fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new(settings.stub_detections.clone()))),
        "tract" => build_tract(settings),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
    let backend = crate::detect::backends::TractBackend::new(
        model_path,
        settings.input_size,
        settings.class_names.clone(),
    )?
    .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("the tract backend requires the backend-tract feature"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    struct FailingWarmUp;

    impl DetectorBackend for FailingWarmUp {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }

        fn warm_up(&mut self) -> Result<()> {
            Err(anyhow!("no accelerator"))
        }
    }

    #[test]
    fn unavailable_engine_fails_fast() {
        let engine = InferenceEngine::unavailable("model file not found");
        assert!(!engine.is_ready());
        let err = engine.infer(&RgbImage::new(2, 2)).unwrap_err();
        assert!(matches!(err, DetectError::ModelUnavailable(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn ready_engine_runs_backend() {
        let det = Detection::new(BoundingBox::new(1.0, 2.0, 3.0, 4.0), "Normal", 0.5);
        let engine = InferenceEngine::ready(StubBackend::new(vec![det.clone()]));
        assert!(engine.is_ready());
        assert_eq!(engine.backend_name(), "stub");
        assert_eq!(engine.infer(&RgbImage::new(2, 2)).unwrap(), vec![det]);
    }

    #[test]
    fn load_reports_unknown_backend_as_unavailable() {
        let settings = DetectorSettings {
            backend: "quantum".to_string(),
            ..DetectorSettings::default()
        };
        let engine = InferenceEngine::load(&settings);
        assert!(!engine.is_ready());
        assert!(engine.unavailable_reason().unwrap().contains("quantum"));
    }

    #[test]
    fn load_without_model_file_is_unavailable() {
        let settings = DetectorSettings {
            backend: "tract".to_string(),
            model_path: Some("/nonexistent/bestm.onnx".into()),
            ..DetectorSettings::default()
        };
        assert!(!InferenceEngine::load(&settings).is_ready());
    }

    #[test]
    fn warm_up_failure_leaves_engine_unavailable() {
        let engine = InferenceEngine::activate(Box::new(FailingWarmUp));
        assert!(engine.unavailable_reason().unwrap().contains("no accelerator"));
    }
}
