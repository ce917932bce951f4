//! Explicit client configuration handed to every component.

use serde::{Deserialize, Serialize};

use crate::archive::ARCHIVE_LITERAL_SIZE_LIMIT;
use crate::error::PkgError;

/// Path on the control server that tunnels to the storage service.
pub const STORAGE_PROXY_PATH: &str = "/proxy/storage";

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Control server base URL, always carrying a scheme.
    pub server_url: String,
    pub namespace: String,
    pub literal_size_limit: u64,
}

impl ClientConfig {
    /// Build a config for `server_url`, prepending `http://` when no scheme is given.
    pub fn new(server_url: &str) -> Result<Self, PkgError> {
        let trimmed = server_url.trim();
        if trimmed.is_empty() {
            return Err(PkgError::MissingArgument(
                "Need --server or FNPKG_URL set to your control server.".into(),
            ));
        }
        let server_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        Ok(Self {
            server_url,
            namespace: DEFAULT_NAMESPACE.to_string(),
            literal_size_limit: ARCHIVE_LITERAL_SIZE_LIMIT,
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_literal_size_limit(mut self, limit: u64) -> Self {
        self.literal_size_limit = limit;
        self
    }

    /// Base URL of the storage service as reached through the control server.
    pub fn storage_base(&self) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), STORAGE_PROXY_PATH)
    }
}
