//! Shelf Sentry
//!
//! Throttled camera capture, remote object detection and alert escalation
//! for retail loss prevention.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> CaptureLoop --HTTP--> POST /detect
//!                                        |
//!                                        v
//!                          InferenceEngine -> AnnotationRenderer
//!                                        |             |
//!                                        |             v
//!                                        |      AlertPipeline (alert class only)
//!                                        v
//! FrameSink  <----- annotated frame -----+
//! ```
//!
//! - The capture client submits at most one frame per interval and blocks on
//!   each round-trip.
//! - The detection service is stateless per request apart from two shared
//!   pieces: the model (serialized behind a lock) and request counters.
//! - An alert record is only written after its evidence image is hosted.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic, HTTP cameras, image directories)
//! - `capture`: throttle gate, detection transport, frame sinks, capture loop
//! - `detect`: detector backends and the shared inference engine
//! - `annotate`: box and label overlays
//! - `alert`: evidence hosting, alert stores, escalation pipeline
//! - `api`: the HTTP detection service
//! - `stats`, `codec`, `config`, `error`: shared plumbing

pub mod alert;
pub mod annotate;
pub mod api;
pub mod capture;
pub mod codec;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod stats;

pub use alert::{AlertDecision, AlertOutcome, AlertPipeline, AlertRecord};
pub use annotate::{label_for, AnnotationRenderer, ClassPalette, LabelFont};
pub use api::{ApiConfig, ApiHandle, ApiServer, DetectionService};
pub use capture::{CaptureLoop, CaptureReport, CaptureSettings, ThrottleGate};
pub use codec::WireFormat;
pub use config::ServiceConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend, InferenceEngine};
pub use error::{AlertError, CaptureError, DetectError, TransportError, TransportErrorKind};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceStats};
pub use stats::{HealthReport, ServiceStats, StatsSnapshot};
