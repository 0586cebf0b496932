//! Network activity correlation.
//!
//! Chrome reuses one `requestId` across a redirect chain, so each start gets
//! its own local correlation key and the request id only points at the
//! currently pending hop.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

use super::{EventCollector, TypeFilter};
use crate::cdp::CdpEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTiming {
    /// Milliseconds since the epoch.
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestSize {
    pub request: u64,
    pub response: u64,
    pub total: u64,
}

impl RequestSize {
    fn new(request: u64, response: u64) -> Self {
        Self {
            request,
            response,
            total: request + response,
        }
    }
}

/// One request with its response or failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequestRecord {
    pub url: String,
    pub method: String,
    pub resource_type: String,
    pub status: u16,
    pub status_text: String,
    pub timing: RequestTiming,
    pub size: RequestSize,
    pub request_headers: Value,
    pub response_headers: Value,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub total: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub average_duration: f64,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkReport {
    pub requests: Vec<NetworkRequestRecord>,
    pub summary: NetworkSummary,
}

/// A started request waiting for its response or failure.
#[derive(Debug)]
struct PendingRequest {
    url: String,
    method: String,
    resource_type: String,
    request_headers: Value,
    request_size: u64,
    start_time: f64,
    /// Monotonic seconds, for durations.
    started_at: f64,
}

impl PendingRequest {
    fn from_event(params: &Value, resource_type: String) -> Self {
        let request = &params["request"];
        Self {
            url: request["url"].as_str().unwrap_or_default().to_owned(),
            method: request["method"].as_str().unwrap_or("GET").to_owned(),
            resource_type,
            request_headers: request["headers"].clone(),
            request_size: request["postData"]
                .as_str()
                .map_or(0, |body| body.len() as u64),
            start_time: params["wallTime"].as_f64().unwrap_or(0.0) * 1000.0,
            started_at: params["timestamp"].as_f64().unwrap_or(0.0),
        }
    }

    fn timing(&self, finished_at: Option<f64>) -> RequestTiming {
        let elapsed = finished_at.map_or(0.0, |t| ((t - self.started_at) * 1000.0).max(0.0));
        let end_time = self.start_time + elapsed;
        RequestTiming {
            start_time: self.start_time,
            end_time,
            duration: end_time - self.start_time,
        }
    }

    /// Finalize against a CDP `Response` object.
    fn respond(self, response: &Value, finished_at: Option<f64>) -> NetworkRequestRecord {
        let status = response["status"]
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(0);
        NetworkRequestRecord {
            timing: self.timing(finished_at),
            size: RequestSize::new(self.request_size, content_length(&response["headers"])),
            url: self.url,
            method: self.method,
            resource_type: self.resource_type,
            status,
            status_text: response["statusText"].as_str().unwrap_or_default().to_owned(),
            request_headers: self.request_headers,
            response_headers: response["headers"].clone(),
            failed: false,
            error_text: None,
            mime_type: response["mimeType"].as_str().map(str::to_owned),
        }
    }

    fn fail(self, error_text: String, finished_at: Option<f64>) -> NetworkRequestRecord {
        NetworkRequestRecord {
            timing: self.timing(finished_at),
            size: RequestSize::new(self.request_size, 0),
            url: self.url,
            method: self.method,
            resource_type: self.resource_type,
            status: 0,
            status_text: String::new(),
            request_headers: self.request_headers,
            response_headers: Value::Object(serde_json::Map::new()),
            failed: true,
            error_text: Some(error_text),
            mime_type: None,
        }
    }
}

/// Correlates request, response, completion and failure events.
#[derive(Debug, Default)]
pub struct NetworkCollector {
    filter: TypeFilter,
    next_key: u64,
    /// Engine request id to the key of its pending hop.
    keys: HashMap<String, u64>,
    pending: HashMap<u64, PendingRequest>,
    /// Engine request id to the index of its appended record, until
    /// `loadingFinished` reports the final size.
    appended: HashMap<String, usize>,
    requests: Vec<NetworkRequestRecord>,
}

impl NetworkCollector {
    #[must_use]
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            filter: TypeFilter::new(types),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(&self) -> &TypeFilter {
        &self.filter
    }

    fn on_request(&mut self, params: &Value) {
        let Some(request_id) = params["requestId"].as_str() else {
            return;
        };

        // A redirect closes the previous hop under the same request id.
        if params["redirectResponse"].is_object() {
            if let Some(previous) = self.take_pending(request_id) {
                let record = previous.respond(&params["redirectResponse"], timestamp(params));
                self.append(record);
            }
        }

        let resource_type = resource_type(params);
        if !self.filter.allows(&resource_type) {
            return;
        }
        let key = self.next_key;
        self.next_key += 1;
        self.keys.insert(request_id.to_owned(), key);
        self.pending
            .insert(key, PendingRequest::from_event(params, resource_type));
    }

    fn on_response(&mut self, params: &Value) {
        let Some(request_id) = params["requestId"].as_str() else {
            return;
        };
        let Some(mut pending) = self.take_pending(request_id) else {
            return;
        };
        if params["type"].is_string() {
            pending.resource_type = resource_type(params);
        }
        let record = pending.respond(&params["response"], timestamp(params));
        if let Some(index) = self.append(record) {
            self.appended.insert(request_id.to_owned(), index);
        }
    }

    fn on_finished(&mut self, params: &Value) {
        let Some(index) = params["requestId"]
            .as_str()
            .and_then(|id| self.appended.remove(id))
        else {
            return;
        };
        if let (Some(record), Some(bytes)) = (
            self.requests.get_mut(index),
            params["encodedDataLength"].as_f64(),
        ) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bytes = bytes.max(0.0) as u64;
            record.size = RequestSize::new(record.size.request, bytes);
        }
    }

    fn on_failed(&mut self, params: &Value) {
        let Some(request_id) = params["requestId"].as_str() else {
            return;
        };
        let error_text = params["errorText"]
            .as_str()
            .unwrap_or("request failed")
            .to_owned();

        // Failed after the response arrived, e.g. an aborted body.
        if let Some(index) = self.appended.remove(request_id) {
            if let Some(record) = self.requests.get_mut(index) {
                record.failed = true;
                record.error_text = Some(error_text);
            }
            return;
        }

        let Some(mut pending) = self.take_pending(request_id) else {
            return;
        };
        if params["type"].is_string() {
            pending.resource_type = resource_type(params);
        }
        let record = pending.fail(error_text, timestamp(params));
        self.append(record);
    }

    fn take_pending(&mut self, request_id: &str) -> Option<PendingRequest> {
        let key = self.keys.remove(request_id)?;
        self.pending.remove(&key)
    }

    /// Append when the resolved type still passes the filter.
    fn append(&mut self, record: NetworkRequestRecord) -> Option<usize> {
        if !self.filter.allows(&record.resource_type) {
            return None;
        }
        self.requests.push(record);
        Some(self.requests.len() - 1)
    }
}

impl EventCollector for NetworkCollector {
    type Report = NetworkReport;

    const METHODS: &'static [&'static str] = &[
        "Network.requestWillBeSent",
        "Network.responseReceived",
        "Network.loadingFinished",
        "Network.loadingFailed",
    ];
    const DOMAINS: &'static [&'static str] = &["Network"];

    fn handle(&mut self, event: &CdpEvent) {
        match event.method.as_str() {
            "Network.requestWillBeSent" => self.on_request(&event.params),
            "Network.responseReceived" => self.on_response(&event.params),
            "Network.loadingFinished" => self.on_finished(&event.params),
            "Network.loadingFailed" => self.on_failed(&event.params),
            _ => {}
        }
    }

    fn finish(self) -> NetworkReport {
        if !self.pending.is_empty() {
            tracing::debug!(
                dropped = self.pending.len(),
                "requests still pending at window end"
            );
        }
        NetworkReport {
            summary: summarize(&self.requests),
            requests: self.requests,
        }
    }
}

fn summarize(requests: &[NetworkRequestRecord]) -> NetworkSummary {
    let mut summary = NetworkSummary {
        total: requests.len(),
        ..NetworkSummary::default()
    };
    let mut total_duration = 0.0;
    for record in requests {
        summary.total_bytes += record.size.total;
        total_duration += record.timing.duration;
        *summary
            .by_type
            .entry(record.resource_type.clone())
            .or_insert(0) += 1;
        let bucket = if record.failed {
            summary.failed += 1;
            Some("failed".to_owned())
        } else {
            status_bucket(record.status)
        };
        if let Some(bucket) = bucket {
            *summary.by_status.entry(bucket).or_insert(0) += 1;
        }
    }
    if !requests.is_empty() {
        #[allow(clippy::cast_precision_loss)]
        let count = requests.len() as f64;
        summary.average_duration = total_duration / count;
    }
    summary
}

fn status_bucket(status: u16) -> Option<String> {
    (100..600)
        .contains(&status)
        .then(|| format!("{}xx", status / 100))
}

fn resource_type(params: &Value) -> String {
    params["type"]
        .as_str()
        .unwrap_or("Other")
        .to_ascii_lowercase()
}

fn timestamp(params: &Value) -> Option<f64> {
    params["timestamp"].as_f64()
}

/// `Content-Length` from a header map, matched case-insensitively.
fn content_length(headers: &Value) -> u64 {
    headers
        .as_object()
        .and_then(|map| {
            map.iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        })
        .and_then(|(_, value)| match value {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_u64(),
        })
        .unwrap_or(0)
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

    fn request(id: &str, url: &str, kind: &str, ts: f64) -> CdpEvent {
        event(
            "Network.requestWillBeSent",
            json!({
                "requestId": id,
                "type": kind,
                "timestamp": ts,
                "wallTime": 1_700_000_000.0 + ts,
                "request": {"url": url, "method": "GET", "headers": {"Accept": "*/*"}}
            }),
        )
    }

    fn response(id: &str, kind: &str, status: u16, ts: f64) -> CdpEvent {
        event(
            "Network.responseReceived",
            json!({
                "requestId": id,
                "type": kind,
                "timestamp": ts,
                "response": {
                    "status": status,
                    "statusText": "OK",
                    "mimeType": "text/html",
                    "headers": {"content-length": "512"}
                }
            }),
        )
    }

    fn finished(id: &str, bytes: f64) -> CdpEvent {
        event(
            "Network.loadingFinished",
            json!({"requestId": id, "encodedDataLength": bytes}),
        )
    }

    #[test]
    fn request_and_response_make_one_record() {
        let mut collector = NetworkCollector::default();
        collector.handle(&request("1", "https://example.test/", "Document", 10.0));
        collector.handle(&response("1", "Document", 200, 10.25));
        let report = collector.finish();

        assert_eq!(report.requests.len(), 1);
        let record = &report.requests[0];
        assert_eq!(record.resource_type, "document");
        assert_eq!(record.status, 200);
        assert_eq!(record.mime_type.as_deref(), Some("text/html"));
        assert_eq!(record.timing.start_time, 1_700_000_010_000.0);
        assert!((record.timing.duration - 250.0).abs() < 1e-6);
        assert_eq!(record.timing.end_time - record.timing.start_time, record.timing.duration);
        assert_eq!(record.size.response, 512);
    }

    #[test]
    fn loading_finished_replaces_header_size() {
        let mut collector = NetworkCollector::default();
        let post = event(
            "Network.requestWillBeSent",
            json!({
                "requestId": "p",
                "type": "Fetch",
                "timestamp": 1.0,
                "wallTime": 1_700_000_000.0,
                "request": {"url": "https://api.test/x", "method": "POST", "headers": {}, "postData": "abcd"}
            }),
        );
        collector.handle(&post);
        collector.handle(&response("p", "Fetch", 201, 1.1));
        collector.handle(&finished("p", 1_024.0));
        let report = collector.finish();
        let size = report.requests[0].size;
        assert_eq!(size, RequestSize { request: 4, response: 1_024, total: 1_028 });
        assert_eq!(report.summary.total_bytes, 1_028);
    }

    #[test]
    fn failure_before_response_has_status_zero() {
        let mut collector = NetworkCollector::default();
        collector.handle(&request("f", "https://gone.test/", "Script", 2.0));
        collector.handle(&event(
            "Network.loadingFailed",
            json!({"requestId": "f", "type": "Script", "timestamp": 2.5, "errorText": "net::ERR_NAME_NOT_RESOLVED"}),
        ));
        let report = collector.finish();
        let record = &report.requests[0];
        assert!(record.failed);
        assert_eq!(record.status, 0);
        assert_eq!(record.error_text.as_deref(), Some("net::ERR_NAME_NOT_RESOLVED"));
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.by_status.get("failed"), Some(&1));
    }

    #[test]
    fn redirect_resolves_previous_hop() {
        let mut collector = NetworkCollector::default();
        collector.handle(&request("r", "http://example.test/", "Document", 1.0));
        collector.handle(&event(
            "Network.requestWillBeSent",
            json!({
                "requestId": "r",
                "type": "Document",
                "timestamp": 1.1,
                "wallTime": 1_700_000_001.1,
                "request": {"url": "https://example.test/", "method": "GET", "headers": {}},
                "redirectResponse": {"status": 301, "statusText": "Moved", "headers": {}}
            }),
        ));
        collector.handle(&response("r", "Document", 200, 1.3));
        let report = collector.finish();

        let hops: Vec<_> = report
            .requests
            .iter()
            .map(|r| (r.url.as_str(), r.status))
            .collect();
        assert_eq!(hops, [("http://example.test/", 301), ("https://example.test/", 200)]);
        assert_eq!(report.summary.by_status.get("3xx"), Some(&1));
        assert_eq!(report.summary.by_status.get("2xx"), Some(&1));
    }

    #[test]
    fn filter_applies_at_start_and_resolution() {
        let mut collector = NetworkCollector::new(["script"]);
        collector.handle(&request("img", "https://example.test/a.png", "Image", 1.0));
        collector.handle(&response("img", "Image", 200, 1.1));
        // Starts as "other", resolves as "script".
        collector.handle(&event(
            "Network.requestWillBeSent",
            json!({"requestId": "s", "timestamp": 1.0, "wallTime": 1.0,
                   "request": {"url": "https://example.test/a.js", "method": "GET", "headers": {}}}),
        ));
        collector.handle(&response("s", "Script", 200, 1.2));
        let report = collector.finish();
        assert!(report.requests.is_empty());

        let mut collector = NetworkCollector::new(["script", "other"]);
        collector.handle(&request("x", "https://example.test/b.js", "Other", 1.0));
        collector.handle(&response("x", "Script", 200, 1.2));
        let report = collector.finish();
        assert_eq!(report.requests.len(), 1);
        assert_eq!(report.requests[0].resource_type, "script");
    }

    #[test]
    fn unresolved_requests_are_dropped() {
        let mut collector = NetworkCollector::default();
        collector.handle(&request("1", "https://example.test/slow", "XHR", 1.0));
        let report = collector.finish();
        assert!(report.requests.is_empty());
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.average_duration, 0.0);
    }

    #[test]
    fn summary_groups_by_type_and_status() {
        let mut collector = NetworkCollector::default();
        collector.handle(&request("1", "https://example.test/", "Document", 1.0));
        collector.handle(&response("1", "Document", 200, 1.1));
        collector.handle(&request("2", "https://example.test/missing.js", "Script", 1.0));
        collector.handle(&response("2", "Script", 404, 1.3));
        let summary = collector.finish().summary;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_type.get("document"), Some(&1));
        assert_eq!(summary.by_type.get("script"), Some(&1));
        assert_eq!(summary.by_status.get("4xx"), Some(&1));
        assert!((summary.average_duration - 200.0).abs() < 1e-6);
    }

    #[test]
    fn content_length_lookup_is_case_insensitive() {
        assert_eq!(content_length(&json!({"Content-Length": "42"})), 42);
        assert_eq!(content_length(&json!({"content-length": 7})), 7);
        assert_eq!(content_length(&json!({"x": "1"})), 0);
        assert_eq!(content_length(&Value::Null), 0);
    }
}
