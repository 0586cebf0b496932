use std::fmt;

use serde::Serialize;

/// Category of a failed command, reported as `kind` in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    SessionLaunchFailure,
    NavigationFailure,
    ElementNotFound,
    ElementNotVisible,
    NotFillable,
    ScriptExecutionFailure,
    NoActiveSession,
    Timeout,
    InvalidArgument,
    Connection,
    Protocol,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SessionLaunchFailure => "session launch failure",
            Self::NavigationFailure => "navigation failure",
            Self::ElementNotFound => "element not found",
            Self::ElementNotVisible => "element not visible",
            Self::NotFillable => "element not fillable",
            Self::ScriptExecutionFailure => "script execution failure",
            Self::NoActiveSession => "no active session",
            Self::Timeout => "timeout",
            Self::InvalidArgument => "invalid argument",
            Self::Connection => "connection error",
            Self::Protocol => "protocol error",
            Self::Io => "I/O error",
        };
        f.write_str(label)
    }
}

/// The one error type that reaches `main`. Every failure exits with status 1.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    /// JavaScript stack for script failures.
    pub stack: Option<String>,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack = stack;
        self
    }

    #[must_use]
    pub fn launch_failed(reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::SessionLaunchFailure,
            format!("Failed to launch browser session: {reason}"),
        )
    }

    #[must_use]
    pub fn navigation_failed(url: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::NavigationFailure,
            format!("Navigation to {url} failed: {reason}"),
        )
    }

    #[must_use]
    pub fn element_not_found(selector: &str, timeout_ms: Option<u64>) -> Self {
        let message = match timeout_ms {
            Some(ms) => format!("Element not found: '{selector}' (waited {ms}ms)"),
            None => format!("Element not found: '{selector}'"),
        };
        Self::new(ErrorKind::ElementNotFound, message)
    }

    #[must_use]
    pub fn element_not_visible(selector: &str) -> Self {
        Self::new(
            ErrorKind::ElementNotVisible,
            format!("Element '{selector}' is present but has no visible size"),
        )
    }

    #[must_use]
    pub fn not_fillable(selector: &str, tag: &str) -> Self {
        Self::new(
            ErrorKind::NotFillable,
            format!(
                "Element '{selector}' is a <{tag}>; only input, textarea and select can be filled"
            ),
        )
    }

    #[must_use]
    pub fn script_failed(message: &str, stack: Option<String>) -> Self {
        Self::new(
            ErrorKind::ScriptExecutionFailure,
            format!("Script execution failed: {message}"),
        )
        .with_stack(stack)
    }

    #[must_use]
    pub fn no_active_session() -> Self {
        Self::new(
            ErrorKind::NoActiveSession,
            "No active browser session. Pass --url to start one, or run a page command \
             with --keep-open first.",
        )
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        let output = ErrorOutput {
            success: false,
            error: &self.message,
            kind: self.kind,
            stack: self.stack.as_deref(),
        };
        serde_json::to_string(&output).unwrap_or_else(|_| {
            format!(
                r#"{{"success":false,"error":{:?},"kind":"{:?}"}}"#,
                self.message, self.kind
            )
        })
    }

    pub fn print_json_stderr(&self) {
        eprintln!("{}", self.to_json());
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Protocol, format!("JSON error: {e}"))
    }
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    success: bool,
    error: &'a str,
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<&'a str>,
}
