use std::time::Duration;

use serde::Deserialize;

use super::ChromeError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(2);

/// Response of the `/json/version` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    /// e.g. `HeadlessChrome/131.0.6778.85`
    #[serde(rename = "Browser")]
    pub browser: String,

    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,

    /// Browser-level WebSocket endpoint.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: String,
}

/// Query `/json/version` on a local debugging port.
///
/// # Errors
///
/// `ChromeError::HttpError` when nothing answers, `ChromeError::ParseError`
/// when the body is not a version document.
pub async fn query_version(port: u16) -> Result<BrowserVersion, ChromeError> {
    let url = format!("http://127.0.0.1:{port}/json/version");
    let body = tokio::task::spawn_blocking(move || http_get(&url))
        .await
        .map_err(|e| ChromeError::HttpError(format!("task join failed: {e}")))??;
    parse_version(&body)
}

fn http_get(url: &str) -> Result<String, ChromeError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(HTTP_TIMEOUT))
        .build()
        .into();
    let mut response = agent
        .get(url)
        .call()
        .map_err(|e| ChromeError::HttpError(format!("GET {url}: {e}")))?;
    response
        .body_mut()
        .read_to_string()
        .map_err(|e| ChromeError::HttpError(format!("reading {url}: {e}")))
}

fn parse_version(body: &str) -> Result<BrowserVersion, ChromeError> {
    serde_json::from_str(body).map_err(|e| ChromeError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_browser_version() {
        let body = r#"{
            "Browser": "HeadlessChrome/131.0.6778.85",
            "Protocol-Version": "1.3",
            "User-Agent": "Mozilla/5.0",
            "V8-Version": "13.1.201.9",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc-123"
        }"#;
        let v = parse_version(body).unwrap();
        assert_eq!(v.browser, "HeadlessChrome/131.0.6778.85");
        assert_eq!(v.protocol_version, "1.3");
        assert_eq!(v.ws_debugger_url, "ws://127.0.0.1:9222/devtools/browser/abc-123");
    }

    #[test]
    fn body_without_ws_url_is_parse_error() {
        let err = parse_version(r#"{"Browser":"Chrome/120"}"#).unwrap_err();
        assert!(matches!(err, ChromeError::ParseError(_)));
    }

    #[tokio::test]
    async fn closed_port_is_http_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = query_version(port).await.unwrap_err();
        assert!(matches!(err, ChromeError::HttpError(_)));
    }
}
