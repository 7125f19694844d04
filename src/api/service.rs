use std::sync::Arc;

use crate::alert::{AlertOutcome, AlertPipeline};
use crate::annotate::AnnotationRenderer;
use crate::codec::{self, WireFormat};
use crate::detect::InferenceEngine;
use crate::error::DetectError;
use crate::stats::ServiceStats;

/// Request-scoped detection: decode, infer, annotate, maybe alert, encode.
///
/// Holds no per-request state; everything shared is either read-only, atomic
/// or behind the engine's lock.
pub struct DetectionService {
    engine: InferenceEngine,
    renderer: AnnotationRenderer,
    alerts: Option<AlertPipeline>,
    stats: Arc<ServiceStats>,
    format: WireFormat,
    jpeg_quality: u8,
}

impl DetectionService {
    pub fn new(
        engine: InferenceEngine,
        renderer: AnnotationRenderer,
        alerts: Option<AlertPipeline>,
        stats: Arc<ServiceStats>,
    ) -> Self {
        Self {
            engine,
            renderer,
            alerts,
            stats,
            format: WireFormat::Jpeg,
            jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_wire_format(mut self, format: WireFormat, jpeg_quality: u8) -> Self {
        self.format = format;
        self.jpeg_quality = jpeg_quality;
        self
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn wire_format(&self) -> WireFormat {
        self.format
    }

    pub fn handle_detect(&self, body: &[u8]) -> Result<Vec<u8>, DetectError> {
        let seq = self.stats.record_request();
        log::debug!("detect request #{} ({} bytes)", seq, body.len());

        if let Some(reason) = self.engine.unavailable_reason() {
            return Err(DetectError::ModelUnavailable(reason.to_string()));
        }
        if body.is_empty() {
            return Err(DetectError::EmptyBody);
        }
        let image = codec::decode(body).map_err(|err| DetectError::Decode(err.to_string()))?;

        let detections = self.engine.infer(&image)?;
        let annotated = self.renderer.render(&image, &detections);

        if let Some(alerts) = &self.alerts {
            match alerts.process(&annotated, &detections) {
                AlertOutcome::NotTriggered | AlertOutcome::Recorded(_) => {}
                outcome => log::debug!("request #{} alert outcome: {:?}", seq, outcome),
            }
        }

        let encoded = codec::encode(&annotated, self.format, self.jpeg_quality)
            .map_err(|err| DetectError::Encode(err.to_string()))?;
        log::debug!(
            "request #{}: {} detection(s), {} byte response",
            seq,
            detections.len(),
            encoded.len()
        );
        Ok(encoded)
    }
}
