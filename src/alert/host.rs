//! Evidence image hosting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::AlertError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Publishes a JPEG and returns a URL the alert consumer can open.
pub trait ImageHost: Send + Sync {
    fn upload(&self, jpeg: &[u8]) -> Result<String, AlertError>;
}

/// ImgBB-compatible upload endpoint: form fields `key` and base64 `image`,
/// URL read from `data.url`.
pub struct ImgbbHost {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ImgbbResponse {
    data: ImgbbData,
}

#[derive(Deserialize)]
struct ImgbbData {
    url: String,
}

impl ImgbbHost {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(UPLOAD_TIMEOUT).build();
        Self {
            agent,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

impl ImageHost for ImgbbHost {
    fn upload(&self, jpeg: &[u8]) -> Result<String, AlertError> {
        let encoded = STANDARD.encode(jpeg);
        let response = self
            .agent
            .post(&self.endpoint)
            .send_form(&[("key", self.api_key.as_str()), ("image", encoded.as_str())])
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    AlertError::Upload(format!("status {}: {}", code, body.trim()))
                }
                ureq::Error::Transport(transport) => AlertError::Upload(transport.to_string()),
            })?;
        let parsed: ImgbbResponse = response
            .into_json()
            .map_err(|err| AlertError::Upload(format!("unexpected response: {err}")))?;
        if parsed.data.url.trim().is_empty() {
            return Err(AlertError::Upload("response carried an empty url".into()));
        }
        Ok(parsed.data.url)
    }
}

/// Writes evidence into a local directory and returns `file://` URLs.
pub struct DirectoryHost {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl DirectoryHost {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AlertError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|err| AlertError::Upload(format!("create {}: {}", dir.display(), err)))?;
        Ok(Self {
            dir,
            sequence: AtomicU64::new(0),
        })
    }
}

impl ImageHost for DirectoryHost {
    fn upload(&self, jpeg: &[u8]) -> Result<String, AlertError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = self.dir.join(format!("alert-{stamp}-{seq:04}.jpg"));
        std::fs::write(&path, jpeg)
            .map_err(|err| AlertError::Upload(format!("write {}: {}", path.display(), err)))?;
        let absolute = std::fs::canonicalize(&path).unwrap_or(path);
        url::Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| AlertError::Upload(format!("not an absolute path: {}", absolute.display())))
    }
}

/// In-process host for tests and offline runs.
#[derive(Default)]
pub struct MemoryImageHost {
    uploads: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
}

impl MemoryImageHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads
            .lock()
            .map(|uploads| uploads.clone())
            .unwrap_or_default()
    }
}

impl ImageHost for MemoryImageHost {
    fn upload(&self, jpeg: &[u8]) -> Result<String, AlertError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AlertError::Upload("memory host set to fail".into()));
        }
        let mut uploads = self
            .uploads
            .lock()
            .map_err(|_| AlertError::Upload("memory host lock poisoned".into()))?;
        uploads.push(jpeg.to_vec());
        Ok(format!("memory://evidence/{}", uploads.len()))
    }
}
