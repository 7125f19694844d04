//! Alert escalation for the high-risk class.
//!
//! When a request's detections include the alert class, the annotated frame
//! is re-encoded as JPEG, published through an [`ImageHost`], and an
//! [`AlertRecord`] carrying the returned URL is appended to an [`AlertStore`].
//! A record is only built after the upload succeeds, so every stored record
//! points at real evidence. Failures stay inside the pipeline: they are logged
//! and reported as an [`AlertOutcome`], never surfaced to the requester.

mod host;
mod store;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use image::RgbImage;
use serde::Serialize;

use crate::codec::{self, WireFormat};
use crate::config::{AlertSettings, AlertStoreSettings, ImageHostSettings};
use crate::detect::Detection;
use crate::error::AlertError;

pub use host::{DirectoryHost, ImageHost, ImgbbHost, MemoryImageHost};
pub use store::{AlertStore, FirebaseAlertStore, MemoryAlertStore, SqliteAlertStore};

/// One persisted alert. Only constructible with a non-empty image URL.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertRecord {
    status: String,
    confidence: f32,
    timestamp: String,
    image_url: String,
}

impl AlertRecord {
    pub fn new(
        status: impl Into<String>,
        confidence: f32,
        timestamp: impl Into<String>,
        image_url: impl Into<String>,
    ) -> Result<Self, AlertError> {
        let image_url = image_url.into();
        if image_url.trim().is_empty() {
            return Err(AlertError::InvalidRecord("image_url must not be empty"));
        }
        Ok(Self {
            status: status.into(),
            confidence,
            timestamp: timestamp.into(),
            image_url,
        })
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }
}

/// Whether a detection set qualifies, and the highest matching confidence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlertDecision {
    pub triggered: bool,
    pub confidence: f32,
}

impl AlertDecision {
    pub fn evaluate(detections: &[Detection], alert_class: &str) -> Self {
        let best = detections
            .iter()
            .filter(|det| det.class_name == alert_class)
            .map(|det| det.confidence)
            .fold(None, |best: Option<f32>, conf| {
                Some(best.map_or(conf, |b| b.max(conf)))
            });
        Self {
            triggered: best.is_some(),
            confidence: best.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum AlertOutcome {
    NotTriggered,
    /// Inside the cooldown window of the previous recorded alert.
    Suppressed,
    UploadFailed,
    /// The host answered but its URL cannot back a record.
    InvalidRecord,
    StoreFailed(AlertRecord),
    Recorded(AlertRecord),
}

pub struct AlertPipeline {
    host: Arc<dyn ImageHost>,
    store: Arc<dyn AlertStore>,
    alert_class: String,
    cooldown: Option<Duration>,
    jpeg_quality: u8,
    cooldown_slot: Mutex<CooldownSlot>,
}

/// `reserved` is set while an alert is between the cooldown check and its
/// store append, so concurrent requests see it as already taken.
#[derive(Debug, Default)]
struct CooldownSlot {
    last_recorded: Option<Instant>,
    reserved: Option<Instant>,
}

impl CooldownSlot {
    fn blocks(&self, now: Instant, cooldown: Duration) -> bool {
        [self.last_recorded, self.reserved]
            .into_iter()
            .flatten()
            .any(|at| now.saturating_duration_since(at) < cooldown)
    }
}

impl AlertPipeline {
    pub fn new(
        host: Arc<dyn ImageHost>,
        store: Arc<dyn AlertStore>,
        alert_class: impl Into<String>,
    ) -> Self {
        Self {
            host,
            store,
            alert_class: alert_class.into(),
            cooldown: None,
            jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
            cooldown_slot: Mutex::new(CooldownSlot::default()),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Build the configured pipeline. `None` when no image host or no store
    /// is configured, since a record cannot exist without both.
    pub fn from_settings(settings: &AlertSettings, jpeg_quality: u8) -> Result<Option<Self>> {
        let host: Arc<dyn ImageHost> = match settings.image_host() {
            ImageHostSettings::Disabled => {
                log::warn!("no image host configured; alerts disabled");
                return Ok(None);
            }
            ImageHostSettings::Imgbb { api_key, endpoint } => {
                Arc::new(ImgbbHost::new(endpoint, api_key))
            }
            ImageHostSettings::Directory { dir } => Arc::new(DirectoryHost::new(dir)?),
        };
        let store: Arc<dyn AlertStore> = match settings.store() {
            AlertStoreSettings::Disabled => {
                log::warn!("no alert store configured; alerts disabled");
                return Ok(None);
            }
            AlertStoreSettings::Firebase {
                database_url,
                auth,
                path,
            } => Arc::new(FirebaseAlertStore::new(&database_url, &path, auth)),
            AlertStoreSettings::Sqlite { path } => Arc::new(SqliteAlertStore::open(&path)?),
        };
        log::info!(
            "alert pipeline armed for class '{}' (cooldown: {:?})",
            settings.alert_class,
            settings.cooldown
        );
        Ok(Some(
            Self::new(host, store, settings.alert_class.clone())
                .with_cooldown(settings.cooldown)
                .with_jpeg_quality(jpeg_quality),
        ))
    }

    pub fn alert_class(&self) -> &str {
        &self.alert_class
    }

    pub fn process(&self, annotated: &RgbImage, detections: &[Detection]) -> AlertOutcome {
        let decision = AlertDecision::evaluate(detections, &self.alert_class);
        if !decision.triggered {
            return AlertOutcome::NotTriggered;
        }
        if !self.reserve(Instant::now()) {
            log::info!(
                "{} alert suppressed by cooldown (confidence {:.2})",
                self.alert_class,
                decision.confidence
            );
            return AlertOutcome::Suppressed;
        }

        let outcome = self.escalate(annotated, decision.confidence);
        self.release(matches!(outcome, AlertOutcome::Recorded(_)), Instant::now());
        outcome
    }

    fn escalate(&self, annotated: &RgbImage, confidence: f32) -> AlertOutcome {
        let image_url = match self.publish(annotated) {
            Ok(url) => url,
            Err(err) => {
                log::error!("alert evidence not published: {}", err);
                return AlertOutcome::UploadFailed;
            }
        };
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let record = match AlertRecord::new(self.alert_class.clone(), confidence, timestamp, image_url)
        {
            Ok(record) => record,
            Err(err) => {
                log::error!("alert record rejected: {}", err);
                return AlertOutcome::InvalidRecord;
            }
        };

        match self.store.append(&record) {
            Ok(()) => {
                log::info!(
                    "{} alert recorded (confidence {:.2}): {}",
                    record.status(),
                    record.confidence(),
                    record.image_url()
                );
                AlertOutcome::Recorded(record)
            }
            Err(err) => {
                log::error!("alert for {} not stored: {}", record.image_url(), err);
                AlertOutcome::StoreFailed(record)
            }
        }
    }

    fn publish(&self, annotated: &RgbImage) -> Result<String, AlertError> {
        let jpeg = codec::encode(annotated, WireFormat::Jpeg, self.jpeg_quality)
            .map_err(|err| AlertError::Encode(err.to_string()))?;
        self.host.upload(&jpeg)
    }

    fn slot(&self) -> MutexGuard<'_, CooldownSlot> {
        self.cooldown_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Check and claim the cooldown window under one lock. Always succeeds
    /// without a cooldown.
    fn reserve(&self, now: Instant) -> bool {
        let Some(cooldown) = self.cooldown else {
            return true;
        };
        let mut slot = self.slot();
        if slot.blocks(now, cooldown) {
            return false;
        }
        slot.reserved = Some(now);
        true
    }

    fn release(&self, recorded: bool, now: Instant) {
        if self.cooldown.is_none() {
            return;
        }
        let mut slot = self.slot();
        slot.reserved = None;
        if recorded {
            slot.last_recorded = Some(now);
        }
    }
}
