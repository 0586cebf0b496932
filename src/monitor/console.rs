use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::{EventCollector, TypeFilter};
use crate::cdp::CdpEvent;
use crate::report::{now_iso8601, wall_time_iso8601};

/// Where a console message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub url: String,
    pub line_number: u64,
    pub column_number: u64,
}

/// One console emission observed during a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleMessageRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleReport {
    pub messages: Vec<ConsoleMessageRecord>,
    pub summary: ConsoleSummary,
}

/// Normalize a user-facing console category.
#[must_use]
pub fn canonical_type(kind: &str) -> String {
    match kind.trim().to_ascii_lowercase().as_str() {
        "warn" => "warning".to_owned(),
        "verbose" => "debug".to_owned(),
        other => other.to_owned(),
    }
}

/// Collects console API calls, uncaught exceptions and browser log entries.
#[derive(Debug, Default)]
pub struct ConsoleCollector {
    filter: TypeFilter,
    /// Messages stamped earlier than this were replayed, not observed.
    not_before_ms: Option<f64>,
    messages: Vec<ConsoleMessageRecord>,
}

impl ConsoleCollector {
    /// `types` may use the `warn` alias.
    #[must_use]
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            filter: TypeFilter::new(types.into_iter().map(|t| canonical_type(t.as_ref()))),
            not_before_ms: None,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(&self) -> &TypeFilter {
        &self.filter
    }
}

impl EventCollector for ConsoleCollector {
    type Report = ConsoleReport;

    const METHODS: &'static [&'static str] = &[
        "Runtime.consoleAPICalled",
        "Runtime.exceptionThrown",
        "Log.entryAdded",
    ];
    const DOMAINS: &'static [&'static str] = &["Runtime", "Log"];

    fn window_opened(&mut self, started_at_ms: f64) {
        self.not_before_ms = Some(started_at_ms);
    }

    fn handle(&mut self, event: &CdpEvent) {
        let replayed = self
            .not_before_ms
            .zip(emitted_at_ms(event))
            .is_some_and(|(not_before, emitted)| emitted < not_before);
        if replayed {
            tracing::debug!(method = %event.method, "skipping message from before the window");
            return;
        }
        let record = match event.method.as_str() {
            "Runtime.consoleAPICalled" => Some(from_console_api(&event.params)),
            "Runtime.exceptionThrown" => Some(from_exception(&event.params)),
            "Log.entryAdded" => from_log_entry(&event.params),
            _ => None,
        };
        if let Some(record) = record.filter(|r| self.filter.allows(&r.kind)) {
            self.messages.push(record);
        }
    }

    fn finish(self) -> ConsoleReport {
        let mut by_type = BTreeMap::new();
        for message in &self.messages {
            *by_type.entry(message.kind.clone()).or_insert(0) += 1;
        }
        ConsoleReport {
            summary: ConsoleSummary {
                total: self.messages.len(),
                by_type,
            },
            messages: self.messages,
        }
    }
}

fn from_console_api(params: &Value) -> ConsoleMessageRecord {
    let frame = &params["stackTrace"]["callFrames"][0];
    ConsoleMessageRecord {
        kind: canonical_type(params["type"].as_str().unwrap_or("log")),
        text: format_args(params["args"].as_array().map_or(&[][..], Vec::as_slice)),
        location: location(frame),
        timestamp: timestamp(&params["timestamp"]),
    }
}

fn from_exception(params: &Value) -> ConsoleMessageRecord {
    let details = &params["exceptionDetails"];
    // The description carries the message plus stack; keep the first line.
    let text = details["exception"]["description"]
        .as_str()
        .and_then(|d| d.lines().next())
        .or_else(|| details["text"].as_str())
        .unwrap_or("Uncaught exception")
        .to_owned();
    ConsoleMessageRecord {
        kind: "error".to_owned(),
        text,
        location: location(details),
        timestamp: timestamp(&params["timestamp"]),
    }
}

fn from_log_entry(params: &Value) -> Option<ConsoleMessageRecord> {
    let entry = &params["entry"];
    // Already reported through Runtime.consoleAPICalled.
    if entry["source"] == "console-api" {
        return None;
    }
    Some(ConsoleMessageRecord {
        kind: canonical_type(entry["level"].as_str().unwrap_or("info")),
        text: entry["text"].as_str().unwrap_or_default().to_owned(),
        location: location(entry),
        timestamp: timestamp(&entry["timestamp"]),
    })
}

/// Raw CDP timestamp of a console event, in milliseconds since the epoch.
fn emitted_at_ms(event: &CdpEvent) -> Option<f64> {
    match event.method.as_str() {
        "Log.entryAdded" => event.params["entry"]["timestamp"].as_f64(),
        _ => event.params["timestamp"].as_f64(),
    }
}

/// `url`, `lineNumber` and `columnNumber` share names across all three
/// event shapes.
fn location(source: &Value) -> Option<SourceLocation> {
    let url = source["url"].as_str().filter(|u| !u.is_empty())?;
    Some(SourceLocation {
        url: url.to_owned(),
        line_number: source["lineNumber"].as_u64().unwrap_or(0),
        column_number: source["columnNumber"].as_u64().unwrap_or(0),
    })
}

/// CDP console timestamps are milliseconds since the epoch.
fn timestamp(value: &Value) -> String {
    value
        .as_f64()
        .and_then(|ms| wall_time_iso8601(ms / 1000.0))
        .unwrap_or_else(now_iso8601)
}

fn format_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match &arg["value"] {
            Value::String(s) => s.clone(),
            Value::Null => arg["description"]
                .as_str()
                .or_else(|| arg["unserializableValue"].as_str())
                .or_else(|| arg["type"].as_str().filter(|t| *t == "undefined"))
                .unwrap_or("null")
                .to_owned(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: Value) -> CdpEvent {
        CdpEvent {
            method: method.into(),
            params,
            session_id: Some("S".into()),
        }
    }

    fn console_call(kind: &str, text: &str) -> CdpEvent {
        event(
            "Runtime.consoleAPICalled",
            json!({
                "type": kind,
                "args": [{"type": "string", "value": text}],
                "timestamp": 1_707_912_000_123.0_f64,
                "stackTrace": {"callFrames": [{
                    "url": "https://example.test/app.js",
                    "lineNumber": 4,
                    "columnNumber": 9,
                    "functionName": "boot"
                }]}
            }),
        )
    }

    #[test]
    fn console_call_becomes_record() {
        let mut collector = ConsoleCollector::new(Vec::<String>::new());
        collector.handle(&console_call("log", "hello"));
        let report = collector.finish();
        let message = &report.messages[0];
        assert_eq!(message.kind, "log");
        assert_eq!(message.text, "hello");
        assert_eq!(message.timestamp, "2024-02-14T12:00:00.123Z");
        let loc = message.location.as_ref().unwrap();
        assert_eq!(loc.url, "https://example.test/app.js");
        assert_eq!((loc.line_number, loc.column_number), (4, 9));
    }

    #[test]
    fn filter_applies_before_append_with_warn_alias() {
        let mut collector = ConsoleCollector::new(["error", "warn"]);
        collector.handle(&console_call("log", "noise"));
        collector.handle(&console_call("warning", "careful"));
        collector.handle(&console_call("error", "broken"));
        let report = collector.finish();
        assert_eq!(report.summary.total, 2);
        assert!(report.messages.iter().all(|m| m.kind == "warning" || m.kind == "error"));
        assert_eq!(report.summary.by_type.get("warning"), Some(&1));
        assert_eq!(report.summary.by_type.get("log"), None);
    }

    #[test]
    fn exception_is_an_error_with_first_description_line() {
        let mut collector = ConsoleCollector::default();
        collector.handle(&event(
            "Runtime.exceptionThrown",
            json!({
                "timestamp": 1_707_912_000_000.0_f64,
                "exceptionDetails": {
                    "text": "Uncaught",
                    "url": "https://example.test/boom.js",
                    "lineNumber": 1,
                    "columnNumber": 2,
                    "exception": {"description": "TypeError: x is undefined\n    at boom.js:2:3"}
                }
            }),
        ));
        let report = collector.finish();
        assert_eq!(report.messages[0].kind, "error");
        assert_eq!(report.messages[0].text, "TypeError: x is undefined");
    }

    #[test]
    fn log_entries_skip_console_api_and_map_verbose() {
        let mut collector = ConsoleCollector::default();
        collector.handle(&event(
            "Log.entryAdded",
            json!({"entry": {"source": "console-api", "level": "info", "text": "dup", "timestamp": 1.0}}),
        ));
        collector.handle(&event(
            "Log.entryAdded",
            json!({"entry": {"source": "network", "level": "verbose", "text": "fetched", "timestamp": 1.0}}),
        ));
        let report = collector.finish();
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.messages[0].kind, "debug");
        assert!(report.messages[0].location.is_none());
    }

    #[test]
    fn messages_from_before_the_window_are_dropped() {
        let mut collector = ConsoleCollector::default();
        collector.window_opened(1_707_912_000_500.0);
        // Stamped 1_707_912_000_123 ms, before the window opened.
        collector.handle(&console_call("error", "replayed"));
        collector.handle(&event(
            "Log.entryAdded",
            json!({"entry": {"source": "network", "level": "error", "text": "old", "timestamp": 1_707_912_000_000.0_f64}}),
        ));
        collector.handle(&event(
            "Runtime.consoleAPICalled",
            json!({
                "type": "error",
                "args": [{"type": "string", "value": "live"}],
                "timestamp": 1_707_912_000_900.0_f64
            }),
        ));
        let report = collector.finish();
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.messages[0].text, "live");
    }

    #[test]
    fn args_render_like_the_console() {
        let args = [
            json!({"type": "string", "value": "n ="}),
            json!({"type": "number", "value": 42}),
            json!({"type": "object", "description": "Object"}),
            json!({"type": "undefined"}),
            json!({"type": "number", "unserializableValue": "NaN"}),
        ];
        assert_eq!(format_args(&args), "n = 42 Object undefined NaN");
    }

    #[test]
    fn record_serializes_type_field() {
        let record = ConsoleMessageRecord {
            kind: "info".into(),
            text: "t".into(),
            location: None,
            timestamp: "2026-01-01T00:00:00.000Z".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "info");
        assert!(json.get("location").is_none());
        assert!(json.get("kind").is_none());
    }
}
