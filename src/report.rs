use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{AppError, ErrorKind};
use crate::session::PageInfo;

/// Successful command result: the common fields plus the command's payload
/// flattened next to them.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEnvelope<'a, T: Serialize> {
    success: bool,
    url: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    timestamp: String,
    #[serde(flatten)]
    payload: &'a T,
}

impl<'a, T: Serialize> SuccessEnvelope<'a, T> {
    #[must_use]
    pub fn new(page: &'a PageInfo, session_id: Option<&'a str>, payload: &'a T) -> Self {
        Self {
            success: true,
            url: &page.url,
            title: &page.title,
            session_id,
            timestamp: now_iso8601(),
            payload,
        }
    }
}

/// Serialize a value as one line, or indented with `pretty`.
///
/// # Errors
///
/// Returns `AppError` if the value cannot be serialized.
pub fn render(value: &impl Serialize, pretty: bool) -> Result<String, AppError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    json.map_err(|e| AppError::new(ErrorKind::Protocol, format!("serialization error: {e}")))
}

/// Print the success envelope to stdout.
///
/// # Errors
///
/// Returns `AppError` if the payload cannot be serialized.
pub fn print_success<T: Serialize>(
    page: &PageInfo,
    session_id: Option<&str>,
    payload: &T,
    pretty: bool,
) -> Result<(), AppError> {
    let json = render(&SuccessEnvelope::new(page, session_id, payload), pretty)?;
    println!("{json}");
    Ok(())
}

/// Current UTC time as RFC 3339 with millisecond precision.
#[must_use]
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current UTC time in milliseconds since the epoch, the unit of CDP console
/// timestamps.
#[must_use]
pub fn epoch_millis() -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = Utc::now().timestamp_millis() as f64;
    millis
}

/// Convert a CDP wall time (seconds since the epoch, fractional) to RFC 3339.
#[must_use]
pub fn wall_time_iso8601(seconds: f64) -> Option<String> {
    #[allow(clippy::cast_possible_truncation)]
    let millis = (seconds * 1000.0).round() as i64;
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Clicked {
        clicked: &'static str,
        navigated: bool,
    }

    #[test]
    fn envelope_flattens_payload_next_to_common_fields() {
        let page = PageInfo {
            url: "https://example.test/".into(),
            title: "Example".into(),
        };
        let payload = Clicked {
            clicked: "#go",
            navigated: false,
        };
        let rendered = render(&SuccessEnvelope::new(&page, Some("s-1"), &payload), false).unwrap();
        let json: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["url"], "https://example.test/");
        assert_eq!(json["title"], "Example");
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["clicked"], "#go");
        assert_eq!(json["navigated"], false);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn envelope_without_session_omits_session_id() {
        let page = PageInfo::default();
        let payload = json!({"closed": true});
        let rendered = render(&SuccessEnvelope::new(&page, None, &payload), false).unwrap();
        let json: Value = serde_json::from_str(&rendered).unwrap();
        assert!(json.get("sessionId").is_none());
        assert_eq!(json["closed"], true);
    }

    #[test]
    fn pretty_render_is_multiline() {
        let rendered = render(&json!({"a": 1}), true).unwrap();
        assert!(rendered.contains('\n'));
    }

    #[test]
    fn epoch_millis_is_after_2020() {
        assert!(epoch_millis() > 1_577_836_800_000.0);
    }

    #[test]
    fn wall_time_converts_to_utc() {
        assert_eq!(
            wall_time_iso8601(1_000_000_000.25).as_deref(),
            Some("2001-09-09T01:46:40.250Z")
        );
    }
}
