//! capture - Shelf Sentry capture client
//!
//! Reads frames from a camera, submits one every `--interval-secs` to the
//! detection service and writes each annotated frame to a preview file (or a
//! directory of numbered frames). Ctrl-C stops the loop after the current
//! iteration.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shelf_sentry::capture::{
    CaptureLoop, CaptureSettings, DirectorySink, FrameSink, HttpTransport, LatestFileSink,
    DEFAULT_POLL_INTERVAL,
};
use shelf_sentry::{open_source, WireFormat};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Submit throttled camera frames to a Shelf Sentry detection service"
)]
struct Args {
    /// Frame source: stub://name, an http(s):// camera URL (MJPEG or JPEG
    /// snapshot), or a local directory of .jpg/.png frames.
    #[arg(long, env = "SENTRY_SOURCE", default_value = "stub://camera0")]
    source: String,

    /// Detection service base URL (or full /detect URL).
    #[arg(long, env = "SENTRY_SERVER_URL", default_value = "http://127.0.0.1:5000")]
    server_url: String,

    /// Minimum seconds between submissions.
    #[arg(long, env = "SENTRY_INTERVAL_SECS", default_value_t = 5.0)]
    interval_secs: f64,

    /// Request timeout in seconds.
    #[arg(long, env = "SENTRY_TIMEOUT_SECS", default_value_t = 10.0)]
    timeout_secs: f64,

    /// Request body encoding: jpeg or png.
    #[arg(long, env = "SENTRY_WIRE_FORMAT", default_value = "jpeg")]
    wire_format: WireFormat,

    /// Preview file overwritten with each annotated frame.
    #[arg(long, env = "SENTRY_PREVIEW_PATH", default_value = "preview.jpg")]
    preview: PathBuf,

    /// Keep every annotated frame in this directory instead of one preview.
    #[arg(long, env = "SENTRY_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Stop after this many submissions.
    #[arg(long)]
    max_submissions: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let submit_interval = seconds(args.interval_secs, "interval-secs")?;
    let timeout = seconds(args.timeout_secs, "timeout-secs")?;

    let mut source = open_source(&args.source)?;
    let transport = HttpTransport::new(&args.server_url, timeout, args.wire_format);
    let mut sink: Box<dyn FrameSink> = match &args.output_dir {
        Some(dir) => Box::new(DirectorySink::new(dir, args.wire_format)?),
        None => Box::new(LatestFileSink::new(&args.preview)),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "submitting to {} every {:?} (timeout {:?})",
        transport.endpoint(),
        submit_interval,
        timeout
    );
    let mut capture = CaptureLoop::new(CaptureSettings {
        submit_interval,
        poll_interval: DEFAULT_POLL_INTERVAL,
        format: args.wire_format,
        max_submissions: args.max_submissions,
        ..CaptureSettings::default()
    });
    let report = capture.run(source.as_mut(), &transport, sink.as_mut(), &stop)?;
    log::info!(
        "capture finished: {} submission(s), {} ok, {} failed, {} unreadable frame(s)",
        report.submissions,
        report.successes,
        report.transport_failures,
        report.read_failures
    );
    Ok(())
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("--{} must be a non-negative number of seconds", flag));
    }
    Ok(Duration::from_secs_f64(value))
}
