use fnpkg_core::config::STORAGE_PROXY_PATH;
use reqwest::Url;

use crate::StorageError;

/// Rewrite an archive URL into a request against the control server's storage proxy.
///
/// Only the request URI (path + query) of `file_url` is kept; scheme and host are
/// replaced by `server_url`. `file_url` may be absolute or already an absolute path.
/// A path that already carries the proxy prefix is not prefixed twice.
pub fn proxy_download_url(server_url: &str, file_url: &str) -> Result<String, StorageError> {
    let request_uri = request_uri(file_url)?;
    let base = server_url.trim_end_matches('/');
    if request_uri.starts_with(STORAGE_PROXY_PATH) {
        Ok(format!("{}{}", base, request_uri))
    } else {
        Ok(format!("{}{}{}", base, STORAGE_PROXY_PATH, request_uri))
    }
}

fn request_uri(file_url: &str) -> Result<String, StorageError> {
    if file_url.starts_with('/') {
        // Resolve against a throwaway origin to normalise it the same way as a full URL.
        let origin = Url::parse("http://origin.invalid").map_err(|e| invalid(file_url, e))?;
        let u = origin.join(file_url).map_err(|e| invalid(file_url, e))?;
        return Ok(path_and_query(&u));
    }
    let u = Url::parse(file_url).map_err(|e| invalid(file_url, e))?;
    Ok(path_and_query(&u))
}

fn path_and_query(u: &Url) -> String {
    match u.query() {
        Some(q) => format!("{}?{}", u.path(), q),
        None => u.path().to_string(),
    }
}

fn invalid(url: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::InvalidUrl { url: url.to_string(), reason: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_cluster_host_is_replaced() {
        let got = proxy_download_url("http://ctl:8888/", "http://storagesvc.fission/v1/archive?id=42").unwrap();
        assert_eq!(got, "http://ctl:8888/proxy/storage/v1/archive?id=42");
    }

    #[test]
    fn proxy_prefix_is_not_doubled() {
        let got = proxy_download_url("https://ctl", "http://old-ctl/proxy/storage/v1/archive?id=42").unwrap();
        assert_eq!(got, "https://ctl/proxy/storage/v1/archive?id=42");
    }

    #[test]
    fn absolute_paths_are_request_uris() {
        let got = proxy_download_url("http://ctl:8888", "/v1/archive?id=7").unwrap();
        assert_eq!(got, "http://ctl:8888/proxy/storage/v1/archive?id=7");
        let got = proxy_download_url("http://ctl:8888", "/proxy/storage/v1/archive?id=7").unwrap();
        assert_eq!(got, "http://ctl:8888/proxy/storage/v1/archive?id=7");
    }

    #[test]
    fn relative_urls_are_rejected() {
        assert!(matches!(proxy_download_url("http://ctl", "v1/archive"), Err(StorageError::InvalidUrl { .. })));
        assert!(matches!(proxy_download_url("http://ctl", ""), Err(StorageError::InvalidUrl { .. })));
    }
}
