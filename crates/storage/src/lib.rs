//! fnpkg storage – content-addressed archive storage reached through the control server.
//!
//! The control server exposes the storage service under `/proxy/storage`; every
//! request goes through that proxy, including downloads of URLs recorded in
//! packages (which may name the in-cluster storage host).

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fnpkg_core::ClientConfig;
use fnpkg_core::config::STORAGE_PROXY_PATH;
use metrics::counter;
use reqwest::Url;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, info};

mod rewrite;

pub use rewrite::proxy_download_url;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("reading {}: {source}", .path.display())]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("request to {url} failed: {source}")]
    Http { url: String, #[source] source: reqwest::Error },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("malformed upload response: {0}")]
    Response(String),
    #[error("no archive with id {0}")]
    UnknownId(String),
}

/// `upload(path) -> id`, `url_for(id) -> url`, `fetch(url) -> bytes`.
#[async_trait::async_trait]
pub trait StorageService: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<String, StorageError>;
    fn url_for(&self, id: &str) -> String;
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// HTTP client for the storage service behind the control server proxy.
pub struct HttpStorage {
    server_url: String,
    /// `<server>/proxy/storage/v1/archive`
    archive_endpoint: Url,
    http: reqwest::Client,
}

impl HttpStorage {
    pub fn new(cfg: &ClientConfig) -> Result<Self, StorageError> {
        let endpoint = format!("{}/v1/archive", cfg.storage_base());
        let archive_endpoint = Url::parse(&endpoint)
            .map_err(|e| StorageError::InvalidUrl { url: endpoint.clone(), reason: e.to_string() })?;
        Ok(Self { server_url: cfg.server_url.clone(), archive_endpoint, http: reqwest::Client::new() })
    }
}

#[async_trait::async_trait]
impl StorageService for HttpStorage {
    async fn upload(&self, path: &Path) -> Result<String, StorageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StorageError::Io { path: path.to_path_buf(), source })?;
        let size = bytes.len();
        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "archive".into());
        let form = reqwest::multipart::Form::new()
            .part("uploadfile", reqwest::multipart::Part::bytes(bytes).file_name(file_name));
        let url = self.archive_endpoint.to_string();
        info!(path = %path.display(), size, "uploading archive");
        let resp = self
            .http
            .post(self.archive_endpoint.clone())
            .header("X-File-Size", size.to_string())
            .multipart(form)
            .send()
            .await
            .map_err(|source| StorageError::Http { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(StorageError::Status { url, status: resp.status().as_u16() });
        }
        let body = resp.text().await.map_err(|source| StorageError::Http { url: url.clone(), source })?;
        let parsed: UploadResponse = serde_json::from_str(&body).map_err(|e| StorageError::Response(e.to_string()))?;
        counter!("archive_upload_total", 1u64);
        debug!(id = %parsed.id, "archive uploaded");
        Ok(parsed.id)
    }

    fn url_for(&self, id: &str) -> String {
        let mut u = self.archive_endpoint.clone();
        u.query_pairs_mut().append_pair("id", id);
        u.to_string()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let target = proxy_download_url(&self.server_url, url)?;
        debug!(url = %url, via = %target, "fetching archive");
        let resp = self
            .http
            .get(target.as_str())
            .send()
            .await
            .map_err(|source| StorageError::Http { url: target.clone(), source })?;
        if !resp.status().is_success() {
            return Err(StorageError::Status { url: target, status: resp.status().as_u16() });
        }
        let body = resp.bytes().await.map_err(|source| StorageError::Http { url: target, source })?;
        counter!("archive_fetch_total", 1u64);
        Ok(body.to_vec())
    }
}

/// In-RAM storage service with the same id/url scheme as the HTTP one.
pub struct MemoryStorage {
    server_url: String,
    blobs: Mutex<FxHashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new(cfg: &ClientConfig) -> Self {
        Self { server_url: cfg.server_url.clone(), blobs: Mutex::new(FxHashMap::default()) }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl StorageService for MemoryStorage {
    async fn upload(&self, path: &Path) -> Result<String, StorageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StorageError::Io { path: path.to_path_buf(), source })?;
        let id = uuid::Uuid::new_v4().to_string();
        self.blobs.lock().unwrap_or_else(|p| p.into_inner()).insert(id.clone(), bytes);
        Ok(id)
    }

    fn url_for(&self, id: &str) -> String {
        format!("{}{}/v1/archive?id={}", self.server_url.trim_end_matches('/'), STORAGE_PROXY_PATH, id)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let target = proxy_download_url(&self.server_url, url)?;
        let parsed = Url::parse(&target).map_err(|e| StorageError::InvalidUrl { url: target.clone(), reason: e.to_string() })?;
        let id = parsed
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.to_string())
            .ok_or_else(|| StorageError::InvalidUrl { url: target.clone(), reason: "missing id".into() })?;
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
            .ok_or(StorageError::UnknownId(id))
    }
}
