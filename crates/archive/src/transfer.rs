//! `Archive` -> local file, one fresh temporary directory per fetch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fnpkg_core::{Archive, PkgError, PkgResult};
use fnpkg_storage::StorageService;
use metrics::histogram;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Local file header, empty archive and spanned archive signatures.
const ZIP_MAGICS: [[u8; 4]; 3] = [*b"PK\x03\x04", *b"PK\x05\x06", *b"PK\x07\x08"];

/// True when `bytes` start with a zip signature.
pub fn has_zip_magic(bytes: &[u8]) -> bool {
    ZIP_MAGICS.iter().any(|m| bytes.starts_with(m))
}

/// True when the file starts with a zip signature. Content based, extension ignored.
pub async fn is_zip(path: &Path) -> std::io::Result<bool> {
    let mut head = [0u8; 4];
    let mut f = tokio::fs::File::open(path).await?;
    let mut filled = 0;
    while filled < head.len() {
        match f.read(&mut head[filled..]).await? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(has_zip_magic(&head))
}

pub struct ArchiveFetcher {
    storage: Arc<dyn StorageService>,
    temp_root: PathBuf,
}

impl ArchiveFetcher {
    pub fn new(storage: Arc<dyn StorageService>) -> Self {
        Self { storage, temp_root: std::env::temp_dir() }
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    /// Write `archive` to `<tmp>/<uuid>/<destination>` (or `<destination>.zip` for zip content).
    ///
    /// Bytes land in `<destination>.tmp` first and are renamed only once complete;
    /// on failure the per-call directory is removed.
    pub async fn fetch(&self, archive: &Archive, destination: &str) -> PkgResult<PathBuf> {
        check_destination(destination)?;
        let started = Instant::now();
        let dir = self.temp_root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir(&dir).await.map_err(download_err)?;
        match self.fetch_into(&dir, archive, destination).await {
            Ok(path) => {
                histogram!("archive_download_ms", started.elapsed().as_secs_f64() * 1000.0);
                info!(path = %path.display(), kind = %archive.kind(), "archive written");
                Ok(path)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(dir = %dir.display(), error = %cleanup, "failed to clean up download dir");
                }
                Err(e)
            }
        }
    }

    async fn fetch_into(&self, dir: &Path, archive: &Archive, destination: &str) -> PkgResult<PathBuf> {
        let tmp = dir.join(format!("{}.tmp", destination));
        let zipped = match archive {
            Archive::Literal(bytes) => {
                tokio::fs::write(&tmp, bytes).await.map_err(download_err)?;
                has_zip_magic(bytes)
            }
            Archive::Url(url) => {
                let body = self
                    .storage
                    .fetch(url)
                    .await
                    .map_err(|e| PkgError::Download { source: Box::new(e) })?;
                tokio::fs::write(&tmp, &body).await.map_err(download_err)?;
                has_zip_magic(&body)
            }
        };
        let final_path = if zipped { dir.join(format!("{}.zip", destination)) } else { dir.join(destination) };
        tokio::fs::rename(&tmp, &final_path).await.map_err(download_err)?;
        debug!(from = %tmp.display(), to = %final_path.display(), "renamed download");
        Ok(final_path)
    }
}

fn download_err(e: std::io::Error) -> PkgError {
    PkgError::Download { source: Box::new(e) }
}

fn check_destination(destination: &str) -> PkgResult<()> {
    let bad = destination.is_empty()
        || destination == "."
        || destination == ".."
        || destination.contains('/')
        || destination.contains('\\');
    if bad {
        return Err(download_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid destination name {:?}", destination),
        )));
    }
    Ok(())
}
