use std::io::Read;
use std::time::Duration;

use image::RgbImage;

use crate::codec::{self, WireFormat};
use crate::error::TransportError;

const MAX_RESPONSE_BYTES: u64 = 32 * 1024 * 1024;

/// One synchronous detection round-trip: encoded frame in, annotated frame out.
pub trait DetectionTransport {
    fn send(&self, image: &[u8]) -> Result<RgbImage, TransportError>;
}

/// `POST {server}/detect` over HTTP.
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
    format: WireFormat,
}

impl HttpTransport {
    pub fn new(server_url: &str, timeout: Duration, format: WireFormat) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: detect_endpoint(server_url),
            format,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn wire_format(&self) -> WireFormat {
        self.format
    }
}

impl DetectionTransport for HttpTransport {
    fn send(&self, image: &[u8]) -> Result<RgbImage, TransportError> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", self.format.content_type())
            .send_bytes(image)
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    TransportError::server(code, body.trim().to_string())
                }
                ureq::Error::Transport(transport) => TransportError::network(transport.to_string()),
            })?;

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)
            .map_err(|err| TransportError::network(format!("read response body: {err}")))?;
        codec::decode(&body).map_err(|err| TransportError::decode(err.to_string()))
    }
}

/// Accepts a bare base (`http://host:5000`) or a full `/detect` URL.
fn detect_endpoint(server_url: &str) -> String {
    let trimmed = server_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/detect") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/detect")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use std::io::Write;
    use std::net::TcpListener;

    fn serve_once(status: &'static str, content_type: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let mut seen = Vec::new();
            // read headers and the declared body before answering
            loop {
                let n = stream.read(&mut buf).unwrap();
                seen.extend_from_slice(&buf[..n]);
                if let Some(pos) = seen.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&seen[..pos]).to_lowercase();
                    let len: usize = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .map(|v| v.trim().parse().unwrap())
                        .unwrap_or(0);
                    if seen.len() >= pos + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn endpoint_accepts_base_or_full_url() {
        assert_eq!(detect_endpoint("http://h:5000"), "http://h:5000/detect");
        assert_eq!(detect_endpoint("http://h:5000/"), "http://h:5000/detect");
        assert_eq!(detect_endpoint("http://h:5000/detect"), "http://h:5000/detect");
    }

    #[test]
    fn success_returns_decoded_frame() {
        let image = RgbImage::from_pixel(6, 4, image::Rgb([1, 2, 3]));
        let png = codec::encode(&image, WireFormat::Png, 90).unwrap();
        let url = serve_once("200 OK", "image/png", png.clone());
        let transport = HttpTransport::new(&url, Duration::from_secs(5), WireFormat::Png);
        assert_eq!(transport.send(&png).unwrap(), image);
    }

    #[test]
    fn non_200_is_a_server_error() {
        let url = serve_once(
            "500 Internal Server Error",
            "application/json",
            br#"{"error":"Model not loaded"}"#.to_vec(),
        );
        let transport = HttpTransport::new(&url, Duration::from_secs(5), WireFormat::Jpeg);
        let err = transport.send(b"jpeg").unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::ServerError { status: 500 });
        assert!(err.message.contains("Model not loaded"));
    }

    #[test]
    fn undecodable_body_is_a_decode_error() {
        let url = serve_once("200 OK", "image/jpeg", b"not really a jpeg".to_vec());
        let transport = HttpTransport::new(&url, Duration::from_secs(5), WireFormat::Jpeg);
        assert_eq!(
            transport.send(b"jpeg").unwrap_err().kind,
            TransportErrorKind::Decode
        );
    }

    #[test]
    fn refused_connection_is_a_network_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2), WireFormat::Jpeg);
        assert_eq!(
            transport.send(b"jpeg").unwrap_err().kind,
            TransportErrorKind::Network
        );
    }
}
