//! HTTP front end of the detection service.
//!
//! A small HTTP/1.1 server on a non-blocking `TcpListener`. The accept loop
//! polls a shutdown flag; each accepted connection is served on its own
//! thread so a slow client or a long inference does not hold up the others.
//! Every response closes the connection.

mod service;

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use service::DetectionService;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(20);
const ROOT_BANNER: &str = "Camera Server is running!";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and wait for the accept loop to exit.
    /// Requests already being served run to completion on their own threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: Arc<DetectionService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<DetectionService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, service, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    service: Arc<DetectionService>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let service = service.clone();
                let max_body_bytes = cfg.max_body_bytes;
                let spawned = std::thread::Builder::new()
                    .name(format!("detect-conn-{peer}"))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &service, max_body_bytes) {
                            log::warn!("request from {} failed: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    service: &DetectionService,
    max_body_bytes: usize,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = match read_request(&mut stream, max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge(len)) => {
            write_json_error(&mut stream, 413, "Payload too large")?;
            return Err(anyhow!("request body of {} bytes exceeds limit", len));
        }
        Err(RequestError::LengthRequired) => {
            write_json_error(&mut stream, 411, "Content-Length required")?;
            return Err(anyhow!("request body without content-length"));
        }
        Err(RequestError::Malformed(msg)) => {
            write_json_error(&mut stream, 400, "Malformed request")?;
            return Err(anyhow!(msg));
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/detect") => match service.handle_detect(&request.body) {
            Ok(bytes) => {
                let content_type = service.wire_format().content_type();
                write_response(&mut stream, 200, content_type, &bytes)?;
            }
            Err(err) => {
                log::warn!("/detect rejected: {}", err);
                write_json_error(&mut stream, err.status_code(), &err.to_string())?;
            }
        },
        ("GET", "/stats") => {
            let payload = serde_json::to_vec(&service.stats().snapshot())?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("GET", "/health") => {
            let payload = serde_json::to_vec(&service.stats().health())?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        ("GET", "/") => {
            write_response(&mut stream, 200, "text/plain; charset=utf-8", ROOT_BANNER.as_bytes())?;
        }
        (_, "/detect" | "/stats" | "/health" | "/") => {
            write_json_error(&mut stream, 405, "Method not allowed")?;
        }
        _ => {
            write_json_error(&mut stream, 404, "Not found")?;
        }
    }
    Ok(())
}

#[derive(Debug)]
enum RequestError {
    TooLarge(usize),
    /// A body was announced without a length (chunked) or a POST had none.
    LengthRequired,
    Malformed(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err)
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    /// Only fixed-length bodies are read. POST must carry `Content-Length`.
    fn content_length(&self) -> Result<usize, RequestError> {
        if self.headers.contains_key("transfer-encoding") {
            return Err(RequestError::LengthRequired);
        }
        match self.headers.get("content-length") {
            Some(value) => value
                .parse()
                .map_err(|_| RequestError::Malformed(format!("bad content-length '{value}'"))),
            None if self.method == "POST" => Err(RequestError::LengthRequired),
            None => Ok(0),
        }
    }
}

fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> Result<HttpRequest, RequestError> {
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("request headers too large".into()));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed before headers".into()));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".into()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".into()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    let mut request = HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body: Vec::new(),
    };

    let content_length = request.content_length()?;
    if content_length > max_body_bytes {
        return Err(RequestError::TooLarge(content_length));
    }
    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(format!(
                "body truncated at {} of {} bytes",
                body.len(),
                content_length
            )));
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }
    request.body = body;
    Ok(request)
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn write_json_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    write_response(stream, status, "application/json", &body)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
