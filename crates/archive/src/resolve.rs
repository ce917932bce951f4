//! Local file -> `Archive`: small files are embedded, large ones uploaded.

use std::path::Path;
use std::sync::Arc;

use fnpkg_core::{Archive, ClientConfig, PkgError, PkgResult};
use fnpkg_storage::StorageService;
use metrics::counter;
use tracing::debug;

pub struct ArchiveResolver {
    literal_size_limit: u64,
    storage: Arc<dyn StorageService>,
}

impl ArchiveResolver {
    pub fn new(cfg: &ClientConfig, storage: Arc<dyn StorageService>) -> Self {
        Self { literal_size_limit: cfg.literal_size_limit, storage }
    }

    /// Produce an archive for `path`.
    ///
    /// Files smaller than the literal limit become `Archive::Literal` with the exact
    /// file bytes; anything at or above it is uploaded once (no retry) and referenced
    /// by the URL the storage service hands back.
    pub async fn resolve(&self, path: &Path) -> PkgResult<Archive> {
        let file_access = |source| PkgError::FileAccess { path: path.to_path_buf(), source };
        let meta = tokio::fs::metadata(path).await.map_err(file_access)?;
        if !meta.is_file() {
            return Err(file_access(std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file")));
        }
        let size = meta.len();
        if size < self.literal_size_limit {
            let bytes = tokio::fs::read(path).await.map_err(file_access)?;
            debug!(path = %path.display(), size, "embedding literal archive");
            counter!("archive_literal_total", 1u64);
            return Ok(Archive::literal(bytes));
        }
        let id = self
            .storage
            .upload(path)
            .await
            .map_err(|e| PkgError::Upload { path: path.to_path_buf(), source: Box::new(e) })?;
        let url = self.storage.url_for(&id);
        debug!(path = %path.display(), size, url = %url, "archive stored remotely");
        Ok(Archive::url(url))
    }
}
