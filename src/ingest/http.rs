//! HTTP camera source.
//!
//! Handles the two shapes cheap IP cameras expose: a `multipart/x-mixed-replace`
//! MJPEG stream, or a plain JPEG snapshot that is polled once per frame.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{FrameSource, SourceStats};
use crate::codec;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct HttpCameraConfig {
    /// Stream or snapshot URL, e.g. `http://192.168.1.20:8080/video`.
    pub url: String,
    pub timeout: Duration,
    /// A source with no frame for this long reports unhealthy.
    pub stale_after: Duration,
}

impl Default for HttpCameraConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(10),
        }
    }
}

pub struct HttpCameraSource {
    config: HttpCameraConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    pending: Option<Vec<u8>>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MultipartJpegReader),
    Snapshot,
}

impl HttpCameraSource {
    pub fn new(config: HttpCameraConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout_read(config.timeout)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            pending: None,
            connected_at: None,
            last_frame_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn fetch_snapshot(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.config.url))?;
        read_body(response)
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        if let Some(bytes) = self.pending.take() {
            return Ok(bytes);
        }
        match self.stream.as_mut() {
            Some(HttpStream::Mjpeg(stream)) => stream.next_image(),
            Some(HttpStream::Snapshot) => self.fetch_snapshot(),
            None => Err(anyhow!("camera source not connected; call connect() first")),
        }
    }
}

impl FrameSource for HttpCameraSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera at {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            let reader = MultipartJpegReader::new(response.into_reader());
            self.stream = Some(HttpStream::Mjpeg(reader));
            log::info!("HttpCameraSource: MJPEG stream at {}", self.config.url);
        } else {
            self.pending = Some(read_body(response)?);
            self.stream = Some(HttpStream::Snapshot);
            log::info!("HttpCameraSource: polling snapshots at {}", self.config.url);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let jpeg = match self.next_jpeg() {
            Ok(bytes) => bytes,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };
        let image = codec::decode(&jpeg).map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow!("decode camera frame: {}", err)
        })?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(Frame::new(image))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= CONNECT_GRACE;
        };
        last_frame_at.elapsed() <= self.config.stale_after
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(anyhow!("jpeg snapshot exceeds {} bytes", MAX_JPEG_BYTES));
    }
    Ok(bytes)
}

/// Splits a `multipart/x-mixed-replace` body into JPEG images. Part headers
/// are ignored; images are located by their own marker structure.
struct MultipartJpegReader {
    reader: Box<dyn Read + Send + Sync>,
    pending: Vec<u8>,
}

impl MultipartJpegReader {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            pending: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_image(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; 8192];
        loop {
            match scan_jpeg(&self.pending) {
                JpegScan::Complete { start, end } => {
                    let image = self.pending[start..end].to_vec();
                    self.pending.drain(..end);
                    return Ok(image);
                }
                JpegScan::Partial { start } => {
                    self.pending.drain(..start);
                    if self.pending.len() > MAX_JPEG_BYTES {
                        log::warn!("dropping jpeg larger than {} bytes", MAX_JPEG_BYTES);
                        self.pending.drain(..2);
                    }
                }
                JpegScan::NoStart => {
                    // a trailing 0xFF may be half of the next SOI
                    let keep = usize::from(self.pending.last() == Some(&0xFF));
                    let discard = self.pending.len() - keep;
                    self.pending.drain(..discard);
                }
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum JpegScan {
    /// `buffer[start..end]` holds one SOI..EOI image.
    Complete { start: usize, end: usize },
    /// An image begins at `start` but has not fully arrived.
    Partial { start: usize },
    NoStart,
}

enum SegmentWalk {
    End(usize),
    NeedMore,
    Corrupt,
}

/// Find the first whole JPEG by walking its marker segments, so an EOI
/// inside an APPn segment (EXIF thumbnails) does not end the image early.
fn scan_jpeg(buffer: &[u8]) -> JpegScan {
    let mut from = 0;
    while let Some(offset) = buffer[from..].windows(2).position(|w| w == [0xFF, 0xD8]) {
        let start = from + offset;
        match walk_segments(buffer, start + 2) {
            SegmentWalk::End(end) => return JpegScan::Complete { start, end },
            SegmentWalk::NeedMore => return JpegScan::Partial { start },
            SegmentWalk::Corrupt => from = start + 2,
        }
    }
    JpegScan::NoStart
}

fn walk_segments(buffer: &[u8], mut pos: usize) -> SegmentWalk {
    loop {
        match buffer.get(pos) {
            None => return SegmentWalk::NeedMore,
            Some(0xFF) => {}
            Some(_) => return SegmentWalk::Corrupt,
        }
        let mut marker_at = pos + 1;
        while buffer.get(marker_at) == Some(&0xFF) {
            marker_at += 1;
        }
        let Some(&marker) = buffer.get(marker_at) else {
            return SegmentWalk::NeedMore;
        };
        pos = marker_at + 1;
        match marker {
            0xD9 => return SegmentWalk::End(pos),
            0x00 | 0xD8 => return SegmentWalk::Corrupt,
            0x01 | 0xD0..=0xD7 => continue,
            _ => {}
        }

        let (Some(&hi), Some(&lo)) = (buffer.get(pos), buffer.get(pos + 1)) else {
            return SegmentWalk::NeedMore;
        };
        let length = usize::from(u16::from_be_bytes([hi, lo]));
        if length < 2 {
            return SegmentWalk::Corrupt;
        }
        pos += length;
        if marker == 0xDA {
            match next_marker_after_scan(buffer, pos) {
                Some(next) => pos = next,
                None => return SegmentWalk::NeedMore,
            }
        }
    }
}

/// Offset of the first marker following entropy-coded data at `pos`.
/// Stuffed `FF 00` and restart markers belong to the scan.
fn next_marker_after_scan(buffer: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        pos += buffer.get(pos..)?.iter().position(|&b| b == 0xFF)?;
        match buffer.get(pos + 1)? {
            0x00 | 0xD0..=0xD7 => pos += 2,
            0xFF => pos += 1,
            _ => return Some(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireFormat;
    use image::{Rgb, RgbImage};
    use std::io::Write;
    use std::net::TcpListener;

    fn jpeg(shade: u8) -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade]));
        codec::encode(&image, WireFormat::Jpeg, 95).unwrap()
    }

    fn drain_request(stream: &mut std::net::TcpStream) {
        let mut buf = [0u8; 1024];
        let mut seen = Vec::new();
        while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }
    }

    /// Minimal marker skeleton: SOI, one APP0 segment, a scan, EOI.
    fn skeleton_jpeg(app_payload: &[u8], scan_data: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE0];
        out.extend_from_slice(&((app_payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(app_payload);
        out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        out.extend_from_slice(scan_data);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn scan_skips_multipart_framing() {
        let image = skeleton_jpeg(b"JFIF", &[1, 2, 0xFF, 0x00, 3, 0xFF, 0xD0, 4]);
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let offset = data.len();
        data.extend_from_slice(&image);
        data.extend_from_slice(b"\r\n--frame");
        assert_eq!(
            scan_jpeg(&data),
            JpegScan::Complete {
                start: offset,
                end: offset + image.len()
            }
        );
        assert_eq!(scan_jpeg(&image[..image.len() - 1]), JpegScan::Partial { start: 0 });
        assert_eq!(scan_jpeg(b"--frame\r\n"), JpegScan::NoStart);
    }

    #[test]
    fn embedded_thumbnail_does_not_end_the_image() {
        let thumbnail = skeleton_jpeg(b"", &[9, 9]);
        let mut exif = b"Exif\0\0".to_vec();
        exif.extend_from_slice(&thumbnail);
        let image = skeleton_jpeg(&exif, &[5, 6, 7]);
        assert_eq!(
            scan_jpeg(&image),
            JpegScan::Complete {
                start: 0,
                end: image.len()
            }
        );

        let encoded = jpeg(90);
        assert_eq!(
            scan_jpeg(&encoded),
            JpegScan::Complete {
                start: 0,
                end: encoded.len()
            }
        );
    }

    #[test]
    fn corrupt_prefix_resyncs_on_next_image() {
        let image = skeleton_jpeg(b"JFIF", &[1, 2, 3]);
        let mut data = vec![0xFF, 0xD8, 0x42, 0x42];
        data.extend_from_slice(&image);
        assert_eq!(
            scan_jpeg(&data),
            JpegScan::Complete {
                start: 4,
                end: 4 + image.len()
            }
        );
    }

    #[test]
    fn reads_frames_from_mjpeg_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            drain_request(&mut stream);
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nConnection: close\r\n\r\n",
                )
                .unwrap();
            for shade in [30u8, 200] {
                let part = jpeg(shade);
                write!(
                    stream,
                    "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    part.len()
                )
                .unwrap();
                stream.write_all(&part).unwrap();
                stream.write_all(b"\r\n").unwrap();
            }
        });

        let mut source = HttpCameraSource::new(HttpCameraConfig {
            url: format!("http://{addr}/video"),
            ..HttpCameraConfig::default()
        })
        .unwrap();
        source.connect().unwrap();
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        assert!(first.image.get_pixel(4, 4).0[0] < 60);
        assert!(second.image.get_pixel(4, 4).0[0] > 170);
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        server.join().unwrap();
    }

    #[test]
    fn polls_single_jpeg_snapshots() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            for shade in [10u8, 240] {
                let (mut stream, _) = listener.accept().unwrap();
                drain_request(&mut stream);
                let body = jpeg(shade);
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .unwrap();
                stream.write_all(&body).unwrap();
            }
        });

        let mut source = HttpCameraSource::new(HttpCameraConfig {
            url: format!("http://{addr}/capture"),
            ..HttpCameraConfig::default()
        })
        .unwrap();
        source.connect().unwrap();
        assert!(source.next_frame().unwrap().image.get_pixel(0, 0).0[0] < 40);
        assert!(source.next_frame().unwrap().image.get_pixel(0, 0).0[0] > 210);
        assert!(source.is_healthy());
        assert_eq!(source.stats().frames_captured, 2);
        server.join().unwrap();
    }

    #[test]
    fn unreachable_camera_fails_connect() {
        let mut source = HttpCameraSource::new(HttpCameraConfig {
            url: "http://127.0.0.1:9/video".to_string(),
            timeout: Duration::from_millis(500),
            ..HttpCameraConfig::default()
        })
        .unwrap();
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpCameraSource::new(HttpCameraConfig {
            url: "udp://0.0.0.0:5000".to_string(),
            ..HttpCameraConfig::default()
        })
        .is_err());
    }
}
