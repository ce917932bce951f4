use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by a resource client (kube-backed or in-memory).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("{kind} '{name}' was modified concurrently (stale resourceVersion {stale})")]
    Conflict { kind: String, name: String, stale: String },
    #[error("transport: {0}")]
    Transport(#[source] BoxError),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// Errors of the package lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum PkgError {
    #[error("{0}")]
    MissingArgument(String),
    #[error("package '{0}' not found")]
    NotFound(String),
    #[error("package '{0}' already exists")]
    AlreadyExists(String),
    #[error("package '{package}' is used by {} function(s) ({}), use -f to force {op}", .dependents.len(), .dependents.join(", "))]
    Conflict { package: String, op: &'static str, dependents: Vec<String> },
    #[error("failed to upload {}: {source}", .path.display())]
    Upload { path: PathBuf, #[source] source: BoxError },
    #[error("failed to download archive: {source}")]
    Download { #[source] source: BoxError },
    #[error("cannot access {}: {source}", .path.display())]
    FileAccess { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to persist package: {0}")]
    Persist(#[source] ClientError),
    #[error("failed to update function '{function}' after {updated_before} successful update(s): {source}")]
    FunctionUpdate { function: String, updated_before: usize, #[source] source: ClientError },
    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type PkgResult<T> = Result<T, PkgError>;
