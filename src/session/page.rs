use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::cdp::{CdpError, CdpEvent, CdpSession};
use crate::error::AppError;

use super::Viewport;

/// A page-level CDP session that enables each domain at most once.
#[derive(Debug)]
pub struct ManagedSession {
    session: CdpSession,
    enabled_domains: HashSet<String>,
}

impl ManagedSession {
    #[must_use]
    pub fn new(session: CdpSession) -> Self {
        Self {
            session,
            enabled_domains: HashSet::new(),
        }
    }

    /// Send `{domain}.enable` unless this session already did.
    ///
    /// # Errors
    ///
    /// Returns `CdpError` if the enable command fails.
    pub async fn ensure_domain(&mut self, domain: &str) -> Result<(), CdpError> {
        if self.enabled_domains.contains(domain) {
            return Ok(());
        }
        self.session
            .send_command(&format!("{domain}.enable"), None)
            .await?;
        self.enabled_domains.insert(domain.to_owned());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `CdpError` if the command fails.
    pub async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        self.session.send_command(method, params).await
    }

    /// Subscribe to several event methods on one channel, preserving their
    /// relative order.
    ///
    /// # Errors
    ///
    /// Returns `CdpError` if the transport task has exited.
    pub async fn subscribe(&self, methods: &[&str]) -> Result<mpsc::Receiver<CdpEvent>, CdpError> {
        self.session.subscribe(methods).await
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Evaluate an expression by value, awaiting promises.
    ///
    /// # Errors
    ///
    /// `ScriptExecutionFailure` when the page throws, or the underlying CDP
    /// error.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, AppError> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;
        into_value(result)
    }

    /// Run `function` with `arguments` against the first element matching
    /// `selector`. The function receives the element as `this`.
    ///
    /// # Errors
    ///
    /// As [`ManagedSession::evaluate`]; a missing element yields `Value::Null`
    /// only if `function` handles it, otherwise the page throws.
    pub async fn call_on_selector(
        &self,
        selector: &str,
        function: &str,
        arguments: &[Value],
    ) -> Result<Value, AppError> {
        let lookup = self
            .send_command(
                "Runtime.evaluate",
                Some(json!({
                    "expression": format!("document.querySelector({})", json!(selector)),
                })),
            )
            .await?;
        let Some(object_id) = lookup["result"]["objectId"].as_str() else {
            return Err(AppError::element_not_found(selector, None));
        };

        let args: Vec<Value> = arguments.iter().map(|v| json!({ "value": v })).collect();
        let result = self
            .send_command(
                "Runtime.callFunctionOn",
                Some(json!({
                    "objectId": object_id,
                    "functionDeclaration": function,
                    "arguments": args,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;
        into_value(result)
    }
}

/// Unwrap a `Runtime.evaluate`/`callFunctionOn` result into its value.
fn into_value(mut result: Value) -> Result<Value, AppError> {
    if let Some(details) = result.get("exceptionDetails") {
        let (message, stack) = describe_exception(details);
        return Err(AppError::script_failed(&message, stack));
    }
    Ok(result
        .get_mut("result")
        .and_then(|r| r.get_mut("value"))
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// Pull a readable message and the JS stack out of `exceptionDetails`.
#[must_use]
pub fn describe_exception(details: &Value) -> (String, Option<String>) {
    let exception = &details["exception"];
    let description = exception["description"].as_str();
    let message = description
        .and_then(|d| d.lines().next())
        .or_else(|| exception["value"].as_str())
        .or_else(|| details["text"].as_str())
        .unwrap_or("Uncaught exception")
        .to_owned();

    let stack = description
        .filter(|d| d.contains('\n'))
        .map(str::to_owned)
        .or_else(|| format_stack_trace(&details["stackTrace"]));
    (message, stack)
}

fn format_stack_trace(trace: &Value) -> Option<String> {
    let frames = trace["callFrames"].as_array()?;
    if frames.is_empty() {
        return None;
    }
    let lines: Vec<String> = frames
        .iter()
        .map(|f| {
            let name = f["functionName"]
                .as_str()
                .filter(|n| !n.is_empty())
                .unwrap_or("<anonymous>");
            format!(
                "    at {name} ({}:{}:{})",
                f["url"].as_str().unwrap_or(""),
                f["lineNumber"].as_u64().unwrap_or(0) + 1,
                f["columnNumber"].as_u64().unwrap_or(0) + 1,
            )
        })
        .collect();
    Some(lines.join("\n"))
}

/// Current location and title of the page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// # Errors
///
/// Returns `AppError` if the page cannot be evaluated.
pub async fn page_info(page: &ManagedSession) -> Result<PageInfo, AppError> {
    let value = page
        .evaluate("({ url: location.href, title: document.title })")
        .await?;
    Ok(PageInfo {
        url: value["url"].as_str().unwrap_or_default().to_owned(),
        title: value["title"].as_str().unwrap_or_default().to_owned(),
    })
}

/// Device-metrics overrides live on the page session, so this runs on
/// every attach.
///
/// # Errors
///
/// Returns `CdpError` if Chrome rejects the override.
pub async fn apply_viewport(page: &ManagedSession, viewport: Viewport) -> Result<(), CdpError> {
    page.send_command(
        "Emulation.setDeviceMetricsOverride",
        Some(json!({
            "width": viewport.width,
            "height": viewport.height,
            "deviceScaleFactor": 1,
            "mobile": false,
        })),
    )
    .await
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_with_description_keeps_first_line_and_stack() {
        let details = json!({
            "text": "Uncaught",
            "exception": {
                "description": "TypeError: x is undefined\n    at <anonymous>:1:3"
            }
        });
        let (message, stack) = describe_exception(&details);
        assert_eq!(message, "TypeError: x is undefined");
        assert!(stack.unwrap().contains("<anonymous>:1:3"));
    }

    #[test]
    fn thrown_primitive_uses_value() {
        let details = json!({"text": "Uncaught", "exception": {"type": "string", "value": "boom"}});
        let (message, stack) = describe_exception(&details);
        assert_eq!(message, "boom");
        assert!(stack.is_none());
    }

    #[test]
    fn stack_trace_frames_are_formatted_one_based() {
        let details = json!({
            "text": "Uncaught",
            "stackTrace": {"callFrames": [
                {"functionName": "", "url": "https://example.test/app.js", "lineNumber": 9, "columnNumber": 4}
            ]}
        });
        let (message, stack) = describe_exception(&details);
        assert_eq!(message, "Uncaught");
        assert_eq!(
            stack.as_deref(),
            Some("    at <anonymous> (https://example.test/app.js:10:5)")
        );
    }

    #[test]
    fn into_value_extracts_result_value() {
        let value = into_value(json!({"result": {"type": "number", "value": 42}})).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn into_value_undefined_is_null() {
        let value = into_value(json!({"result": {"type": "undefined"}})).unwrap();
        assert!(value.is_null());
    }
}
