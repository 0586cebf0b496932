use crate::error::{AppError, ErrorKind};

/// Errors from locating, launching and probing the browser process.
#[derive(Debug, thiserror::Error)]
pub enum ChromeError {
    /// No executable for the requested engine exists on this machine.
    #[error("browser executable not found: {0}")]
    NotFound(String),

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    /// The process started but never answered on its debugging port.
    #[error("browser startup timed out on port {port}")]
    StartupTimeout { port: u16 },

    #[error("browser HTTP error: {0}")]
    HttpError(String),

    #[error("browser parse error: {0}")]
    ParseError(String),

    #[error("browser I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChromeError> for AppError {
    fn from(e: ChromeError) -> Self {
        match &e {
            ChromeError::NotFound(_)
            | ChromeError::LaunchFailed(_)
            | ChromeError::StartupTimeout { .. } => Self::launch_failed(&e),
            ChromeError::HttpError(_) => Self::new(ErrorKind::Connection, e.to_string()),
            ChromeError::ParseError(_) => Self::new(ErrorKind::Protocol, e.to_string()),
            ChromeError::Io(_) => Self::new(ErrorKind::Io, e.to_string()),
        }
    }
}
