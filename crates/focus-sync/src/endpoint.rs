//! Socket endpoint derivation from the REST base URL.

use focus_core::errors::{Result, SyncError};
use reqwest::Url;

/// Build the event-stream URL from the API base.
///
/// Keeps host and port, maps `http → ws` and `https → wss`, replaces the path
/// with `ws_path`, and drops any query or fragment.
pub fn derive_ws_url(api_base: &str, ws_path: &str) -> Result<String> {
    let mut url = Url::parse(api_base).map_err(|e| SyncError::Connection {
        message: format!("invalid api base url {api_base:?}: {e}"),
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::Connection {
                message: format!("unsupported api scheme: {other}"),
            });
        }
    };
    url.set_scheme(scheme).map_err(|()| SyncError::Connection {
        message: format!("cannot use scheme {scheme} for {api_base}"),
    })?;

    let path = if ws_path.starts_with('/') {
        ws_path.to_owned()
    } else {
        format!("/{ws_path}")
    };
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn http_becomes_ws() {
        assert_eq!(
            derive_ws_url("http://localhost:8080/api/v1", "/api/v1/ws").unwrap(),
            "ws://localhost:8080/api/v1/ws"
        );
    }

    #[test]
    fn https_becomes_wss_and_default_port_is_kept_implicit() {
        assert_eq!(
            derive_ws_url("https://focus.example.com/api/v1?x=1#frag", "/api/v1/ws").unwrap(),
            "wss://focus.example.com/api/v1/ws"
        );
    }

    #[test]
    fn relative_path_is_rooted() {
        assert_eq!(
            derive_ws_url("http://127.0.0.1:9000", "ws").unwrap(),
            "ws://127.0.0.1:9000/ws"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_matches!(derive_ws_url("not a url", "/ws"), Err(SyncError::Connection { .. }));
        assert_matches!(derive_ws_url("ftp://host/x", "/ws"), Err(SyncError::Connection { .. }));
    }
}
