//! Suspension points: element readiness and navigation completion.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::cdp::CdpEvent;
use crate::error::{AppError, ErrorKind};
use crate::inspect::selector_error;
use crate::session::ManagedSession;

/// Interval between element lookups.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet period that counts as network idle.
pub const NETWORK_IDLE_MS: u64 = 500;

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum WaitUntil {
    /// `Page.loadEventFired`
    #[default]
    Load,
    /// `Page.domContentEventFired`
    Domcontentloaded,
    /// No requests in flight for 500 ms.
    Networkidle,
    /// Return as soon as the navigation is committed.
    None,
}

impl WaitUntil {
    fn label(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Domcontentloaded => "domcontentloaded",
            Self::Networkidle => "networkidle",
            Self::None => "none",
        }
    }
}

/// Validate a user-supplied URL, prefixing `https://` when it has no scheme.
///
/// # Errors
///
/// `InvalidArgument` when the value is not a URL even after prefixing.
pub fn normalize_url(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::invalid_argument("URL must not be empty"));
    }
    let candidate = if has_scheme(raw) {
        raw.to_owned()
    } else {
        format!("https://{raw}")
    };
    url::Url::parse(&candidate)
        .map(|u| u.to_string())
        .map_err(|e| AppError::invalid_argument(format!("invalid URL '{raw}': {e}")))
}

fn has_scheme(raw: &str) -> bool {
    // `localhost:3000` parses with scheme "localhost", so only accept schemes
    // followed by `//` or the few opaque ones we expect.
    let Some((scheme, rest)) = raw.split_once(':') else {
        return false;
    };
    let well_formed = scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c));
    well_formed && (rest.starts_with("//") || matches!(scheme, "about" | "data" | "file"))
}

/// Poll until `selector` matches an element. Returns the time waited.
///
/// # Errors
///
/// `ElementNotFound` naming the selector and timeout on expiry,
/// `InvalidArgument` when the page rejects the selector.
pub async fn wait_for_element(
    page: &ManagedSession,
    selector: &str,
    timeout_ms: u64,
) -> Result<u64, AppError> {
    let start = Instant::now();
    let deadline = start + Duration::from_millis(timeout_ms);
    let lookup = format!("document.querySelector({}) !== null", json!(selector));

    loop {
        match page.evaluate(&lookup).await {
            Ok(Value::Bool(true)) => return Ok(elapsed_ms(start)),
            Ok(_) => {}
            Err(e) if e.kind == ErrorKind::ScriptExecutionFailure => {
                return Err(selector_error(selector, e));
            }
            // Execution contexts come and go while a page navigates.
            Err(e) if e.kind == ErrorKind::Protocol => {
                tracing::debug!(error = %e, "element lookup failed, retrying");
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(AppError::element_not_found(selector, Some(timeout_ms)));
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Issue `Page.navigate` without waiting for any lifecycle event.
///
/// # Errors
///
/// `NavigationFailure` when Chrome reports an `errorText`.
pub async fn start_navigation(page: &mut ManagedSession, url: &str) -> Result<Value, AppError> {
    page.ensure_domain("Page").await?;
    let result = page
        .send_command("Page.navigate", Some(json!({ "url": url })))
        .await
        .map_err(|e| AppError::navigation_failed(url, e))?;
    if let Some(error_text) = result["errorText"].as_str().filter(|t| !t.is_empty()) {
        return Err(AppError::navigation_failed(url, error_text));
    }
    Ok(result)
}

/// Navigate and wait according to `wait_until`. Returns the HTTP status of
/// the main document when it was observed.
///
/// # Errors
///
/// `NavigationFailure` on a CDP error text or when the wait expires.
pub async fn navigate(
    page: &mut ManagedSession,
    url: &str,
    wait_until: WaitUntil,
    timeout_ms: u64,
) -> Result<Option<u16>, AppError> {
    page.ensure_domain("Page").await?;
    page.ensure_domain("Network").await?;

    // Subscribe before navigating so no event can slip past.
    let mut responses = page.subscribe(&["Network.responseReceived"]).await?;
    let lifecycle = match wait_until {
        WaitUntil::Load => Some(page.subscribe(&["Page.loadEventFired"]).await?),
        WaitUntil::Domcontentloaded => Some(page.subscribe(&["Page.domContentEventFired"]).await?),
        WaitUntil::Networkidle => Some(
            page.subscribe(&[
                "Network.requestWillBeSent",
                "Network.loadingFinished",
                "Network.loadingFailed",
            ])
            .await?,
        ),
        WaitUntil::None => None,
    };

    let result = start_navigation(page, url).await?;
    let frame_id = result["frameId"].as_str().unwrap_or_default().to_owned();

    let waited = match (wait_until, lifecycle) {
        (WaitUntil::Networkidle, Some(rx)) => wait_for_network_idle(rx, timeout_ms).await,
        (_, Some(rx)) => wait_for_event(rx, timeout_ms).await,
        (_, None) => Ok(()),
    };
    if let Err(reason) = waited {
        return Err(AppError::navigation_failed(
            url,
            format!("{reason} while waiting for {}", wait_until.label()),
        ));
    }

    Ok(main_document_status(&mut responses, &frame_id))
}

async fn wait_for_event(mut rx: mpsc::Receiver<CdpEvent>, timeout_ms: u64) -> Result<(), String> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), rx.recv()).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("connection closed".to_owned()),
        Err(_) => Err(format!("timed out after {timeout_ms}ms")),
    }
}

async fn wait_for_network_idle(
    mut rx: mpsc::Receiver<CdpEvent>,
    timeout_ms: u64,
) -> Result<(), String> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let idle = Duration::from_millis(NETWORK_IDLE_MS);
    let idle_timer = tokio::time::sleep(idle);
    tokio::pin!(idle_timer);
    let mut in_flight: u32 = 0;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    return Err("connection closed".to_owned());
                };
                if event.method == "Network.requestWillBeSent" {
                    in_flight += 1;
                } else {
                    in_flight = in_flight.saturating_sub(1);
                }
                idle_timer.as_mut().reset(Instant::now() + idle);
            }
            () = &mut idle_timer => {
                if in_flight == 0 {
                    return Ok(());
                }
                idle_timer.as_mut().reset(Instant::now() + idle);
            }
            () = tokio::time::sleep_until(deadline) => {
                return Err(format!("timed out after {timeout_ms}ms"));
            }
        }
    }
}

/// Drain buffered `Network.responseReceived` events for the main document.
fn main_document_status(rx: &mut mpsc::Receiver<CdpEvent>, frame_id: &str) -> Option<u16> {
    let mut status = None;
    while let Ok(event) = rx.try_recv() {
        let params = &event.params;
        if params["frameId"] == frame_id && params["type"] == "Document" {
            status = params["response"]["status"]
                .as_u64()
                .and_then(|s| u16::try_from(s).ok());
        }
    }
    status
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(method: &str, params: Value) -> CdpEvent {
        CdpEvent {
            method: method.into(),
            params,
            session_id: Some("S".into()),
        }
    }

    #[test]
    fn scheme_less_url_gets_https() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com/");
        assert_eq!(
            normalize_url("localhost:3000/app").unwrap(),
            "https://localhost:3000/app"
        );
    }

    #[test]
    fn explicit_schemes_are_kept() {
        assert_eq!(normalize_url("http://example.com/a").unwrap(), "http://example.com/a");
        assert_eq!(normalize_url("about:blank").unwrap(), "about:blank");
        assert!(normalize_url("file:///tmp/index.html").unwrap().starts_with("file:///"));
    }

    #[test]
    fn garbage_url_is_invalid_argument() {
        let err = normalize_url("http://exa mple.com").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(normalize_url("  ").unwrap_err().kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn main_document_status_matches_frame() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(event(
            "Network.responseReceived",
            json!({"frameId": "F1", "type": "Script", "response": {"status": 404}}),
        ))
        .await
        .unwrap();
        tx.send(event(
            "Network.responseReceived",
            json!({"frameId": "F1", "type": "Document", "response": {"status": 200}}),
        ))
        .await
        .unwrap();
        assert_eq!(main_document_status(&mut rx, "F1"), Some(200));
    }

    #[tokio::test]
    async fn network_idle_after_requests_finish() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(event("Network.requestWillBeSent", json!({}))).await.unwrap();
        tx.send(event("Network.loadingFinished", json!({}))).await.unwrap();
        let start = Instant::now();
        wait_for_network_idle(rx, 5_000).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(NETWORK_IDLE_MS));
        drop(tx);
    }

    #[tokio::test]
    async fn network_idle_times_out_with_request_in_flight() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(event("Network.requestWillBeSent", json!({}))).await.unwrap();
        let err = wait_for_network_idle(rx, 700).await.unwrap_err();
        assert!(err.contains("700ms"));
        drop(tx);
    }

    #[tokio::test]
    async fn lifecycle_wait_times_out() {
        let (_tx, rx) = mpsc::channel::<CdpEvent>(1);
        let err = wait_for_event(rx, 50).await.unwrap_err();
        assert_eq!(err, "timed out after 50ms");
    }
}
