//! detect_server - Shelf Sentry detection service
//!
//! This daemon:
//! 1. Loads configuration (SENTRY_CONFIG file + SENTRY_* env overrides)
//! 2. Loads the detector once; a failed load keeps serving, answering 500
//! 3. Serves POST /detect, GET /stats, GET /health and GET /
//! 4. Escalates alert-class detections when an image host and store are set

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use shelf_sentry::{
    alert::AlertPipeline,
    api::{ApiConfig, ApiServer, DetectionService},
    AnnotationRenderer, InferenceEngine, ServiceConfig, ServiceStats,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;

    let engine = InferenceEngine::load(&config.detector);
    if !engine.is_ready() {
        log::error!(
            "serving without a model; /detect will answer 500 ({})",
            engine.unavailable_reason().unwrap_or("unknown reason")
        );
    }
    let renderer = AnnotationRenderer::from_settings(&config.render);
    let alerts = AlertPipeline::from_settings(&config.alerts, config.jpeg_quality)?;
    let stats = Arc::new(ServiceStats::new());

    let service = DetectionService::new(engine, renderer, alerts, stats.clone())
        .with_wire_format(config.wire_format, config.jpeg_quality);

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_body_bytes: config.max_body_bytes,
    };
    let api_handle = ApiServer::new(api_config, Arc::new(service)).spawn()?;
    log::info!(
        "detection api listening on {} (started {})",
        api_handle.addr,
        stats.started_at().to_rfc3339()
    );
    log::info!(
        "backend={} alert_class={} wire_format={:?}",
        config.detector.backend,
        config.alerts.alert_class,
        config.wire_format
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("detect_server waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
