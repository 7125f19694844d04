//! Throttled capture client.
//!
//! Reads frames from a [`FrameSource`] as fast as it delivers them, but
//! submits at most one frame per interval to the detection service. Exactly
//! one request is in flight at a time: the loop blocks on the round-trip.
//! Per-frame and per-request failures are logged and counted; only a source
//! that cannot be opened stops the loop.

mod sink;
mod throttle;
mod transport;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::codec::{self, WireFormat, DEFAULT_JPEG_QUALITY};
use crate::error::CaptureError;
use crate::ingest::FrameSource;

pub use sink::{DirectorySink, FrameSink, LatestFileSink};
pub use throttle::ThrottleGate;
pub use transport::{DetectionTransport, HttpTransport};

pub const DEFAULT_SUBMIT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Submission start instants kept for inspection.
pub const RECENT_SUBMITS: usize = 32;

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub submit_interval: Duration,
    /// Idle time between loop iterations.
    pub poll_interval: Duration,
    pub format: WireFormat,
    pub jpeg_quality: u8,
    /// Stop after this many submissions.
    pub max_submissions: Option<u64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            submit_interval: DEFAULT_SUBMIT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            format: WireFormat::Jpeg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_submissions: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub frames_read: u64,
    pub read_failures: u64,
    pub submissions: u64,
    pub successes: u64,
    pub transport_failures: u64,
    pub sink_failures: u64,
}

pub struct CaptureLoop {
    settings: CaptureSettings,
    gate: ThrottleGate,
    recent_submits: VecDeque<Instant>,
}

impl CaptureLoop {
    pub fn new(settings: CaptureSettings) -> Self {
        let gate = ThrottleGate::new(settings.submit_interval);
        Self {
            settings,
            gate,
            recent_submits: VecDeque::with_capacity(RECENT_SUBMITS),
        }
    }

    /// Start instants of the last [`RECENT_SUBMITS`] submissions, oldest first.
    pub fn recent_submits(&self) -> Vec<Instant> {
        self.recent_submits.iter().copied().collect()
    }

    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        transport: &dyn DetectionTransport,
        sink: &mut dyn FrameSink,
        stop: &AtomicBool,
    ) -> Result<CaptureReport, CaptureError> {
        source
            .connect()
            .map_err(|err| CaptureError::SourceUnavailable(format!("{err:#}")))?;
        log::info!(
            "capture started: source={} interval={:?}",
            source.stats().source,
            self.settings.submit_interval
        );

        let mut report = CaptureReport::default();
        while !stop.load(Ordering::SeqCst) {
            if let Some(max) = self.settings.max_submissions {
                if report.submissions >= max {
                    break;
                }
            }
            self.tick(source, transport, sink, &mut report);
            if !self.settings.poll_interval.is_zero() {
                std::thread::sleep(self.settings.poll_interval);
            }
        }

        let stats = source.stats();
        log::info!(
            "capture stopped: frames={} submitted={} ok={} failed={} source_frames={}",
            report.frames_read,
            report.submissions,
            report.successes,
            report.transport_failures,
            stats.frames_captured
        );
        Ok(report)
    }

    fn tick(
        &mut self,
        source: &mut dyn FrameSource,
        transport: &dyn DetectionTransport,
        sink: &mut dyn FrameSink,
        report: &mut CaptureReport,
    ) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                report.read_failures += 1;
                log::warn!("frame read failed: {:#}", err);
                return;
            }
        };
        report.frames_read += 1;

        let now = Instant::now();
        if !self.gate.try_acquire(now) {
            return;
        }
        if self.recent_submits.len() == RECENT_SUBMITS {
            self.recent_submits.pop_front();
        }
        self.recent_submits.push_back(now);
        report.submissions += 1;

        let encoded = codec::encode(&frame.image, self.settings.format, self.settings.jpeg_quality);
        let body = match encoded {
            Ok(body) => body,
            Err(err) => {
                report.transport_failures += 1;
                log::warn!("frame encode failed: {}", err);
                return;
            }
        };

        match transport.send(&body) {
            Ok(annotated) => {
                report.successes += 1;
                log::debug!(
                    "submission #{} ok in {:?}",
                    report.submissions,
                    now.elapsed()
                );
                if let Err(err) = sink.present(&annotated) {
                    report.sink_failures += 1;
                    log::warn!("could not present annotated frame: {:#}", err);
                }
            }
            Err(err) => {
                report.transport_failures += 1;
                log::warn!(
                    "submission #{} failed [{}]: {}",
                    report.submissions,
                    err.kind.tag(),
                    err.message
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::frame::Frame;
    use crate::ingest::{SourceStats, SyntheticSource};
    use anyhow::anyhow;
    use image::RgbImage;
    use std::cell::Cell;

    struct EchoTransport {
        calls: Cell<u64>,
        fail_every: Option<u64>,
    }

    impl EchoTransport {
        fn new(fail_every: Option<u64>) -> Self {
            Self {
                calls: Cell::new(0),
                fail_every,
            }
        }
    }

    impl DetectionTransport for EchoTransport {
        fn send(&self, image: &[u8]) -> Result<RgbImage, TransportError> {
            self.calls.set(self.calls.get() + 1);
            if let Some(n) = self.fail_every {
                if self.calls.get() % n == 0 {
                    return Err(TransportError::server(503, "busy"));
                }
            }
            codec::decode(image).map_err(|err| TransportError::decode(err.to_string()))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        frames: Vec<(u32, u32)>,
    }

    impl FrameSink for CountingSink {
        fn present(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
            self.frames.push(frame.dimensions());
            Ok(())
        }
    }

    struct FlakySource {
        calls: u64,
    }

    impl FrameSource for FlakySource {
        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> anyhow::Result<Frame> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err(anyhow!("dropped frame"))
            } else {
                Ok(Frame::new(RgbImage::new(4, 4)))
            }
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    struct DeadSource;

    impl FrameSource for DeadSource {
        fn connect(&mut self) -> anyhow::Result<()> {
            Err(anyhow!("camera 0 not found"))
        }

        fn next_frame(&mut self) -> anyhow::Result<Frame> {
            unreachable!("never connected")
        }

        fn is_healthy(&self) -> bool {
            false
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    fn settings(interval: Duration, max: u64) -> CaptureSettings {
        CaptureSettings {
            submit_interval: interval,
            poll_interval: Duration::from_millis(1),
            format: WireFormat::Png,
            max_submissions: Some(max),
            ..CaptureSettings::default()
        }
    }

    #[test]
    fn unavailable_source_is_fatal() {
        let mut capture = CaptureLoop::new(CaptureSettings::default());
        let err = capture
            .run(
                &mut DeadSource,
                &EchoTransport::new(None),
                &mut CountingSink::default(),
                &AtomicBool::new(false),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::SourceUnavailable(_)));
    }

    #[test]
    fn submissions_respect_the_interval() {
        let interval = Duration::from_millis(40);
        let mut capture = CaptureLoop::new(settings(interval, 4));
        let mut source = SyntheticSource::with_size("aisle", 8, 8);
        let transport = EchoTransport::new(None);
        let mut sink = CountingSink::default();
        let report = capture
            .run(&mut source, &transport, &mut sink, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.submissions, 4);
        assert_eq!(report.successes, 4);
        assert!(report.frames_read > report.submissions);
        for pair in capture.recent_submits().windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= interval);
        }
        assert_eq!(sink.frames.len(), 4);
    }

    #[test]
    fn transport_failures_do_not_stop_the_loop() {
        let mut capture = CaptureLoop::new(settings(Duration::ZERO, 6));
        let mut source = SyntheticSource::with_size("aisle", 8, 8);
        let transport = EchoTransport::new(Some(2));
        let mut sink = CountingSink::default();
        let report = capture
            .run(&mut source, &transport, &mut sink, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.submissions, 6);
        assert_eq!(report.transport_failures, 3);
        assert_eq!(report.successes, 3);
        assert_eq!(sink.frames.len(), 3);
    }

    #[test]
    fn failed_submissions_still_hold_the_interval() {
        let interval = Duration::from_millis(30);
        let mut capture = CaptureLoop::new(settings(interval, 4));
        let mut source = SyntheticSource::with_size("aisle", 8, 8);
        let transport = EchoTransport::new(Some(1));
        let mut sink = CountingSink::default();
        let report = capture
            .run(&mut source, &transport, &mut sink, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.submissions, 4);
        assert_eq!(report.transport_failures, 4);
        assert_eq!(transport.calls.get(), 4);
        assert!(report.frames_read > report.submissions);
        let submits = capture.recent_submits();
        assert_eq!(submits.len(), 4);
        for pair in submits.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= interval);
        }
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn submit_history_is_bounded() {
        let total = RECENT_SUBMITS as u64 * 3;
        let mut capture = CaptureLoop::new(CaptureSettings {
            poll_interval: Duration::ZERO,
            ..settings(Duration::ZERO, total)
        });
        let mut source = SyntheticSource::with_size("aisle", 4, 4);
        let report = capture
            .run(
                &mut source,
                &EchoTransport::new(Some(1)),
                &mut CountingSink::default(),
                &AtomicBool::new(false),
            )
            .unwrap();
        assert_eq!(report.submissions, total);
        assert_eq!(capture.recent_submits().len(), RECENT_SUBMITS);
    }

    #[test]
    fn read_failures_are_skipped() {
        let mut capture = CaptureLoop::new(settings(Duration::ZERO, 3));
        let mut source = FlakySource { calls: 0 };
        let report = capture
            .run(
                &mut source,
                &EchoTransport::new(None),
                &mut CountingSink::default(),
                &AtomicBool::new(false),
            )
            .unwrap();
        assert_eq!(report.submissions, 3);
        assert_eq!(report.read_failures, 2);
    }

    #[test]
    fn stop_flag_ends_the_loop_before_any_work() {
        let mut capture = CaptureLoop::new(CaptureSettings::default());
        let mut source = SyntheticSource::new("aisle");
        let report = capture
            .run(
                &mut source,
                &EchoTransport::new(None),
                &mut CountingSink::default(),
                &AtomicBool::new(true),
            )
            .unwrap();
        assert_eq!(report, CaptureReport::default());
    }
}
