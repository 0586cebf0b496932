use crate::error::{AppError, ErrorKind};

/// Errors from the CDP WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum CdpError {
    #[error("CDP connection error: {0}")]
    Connection(String),

    #[error("CDP connection timed out")]
    ConnectionTimeout,

    #[error("CDP command timed out: {method}")]
    CommandTimeout { method: String },

    #[error("CDP protocol error ({code}): {message}")]
    Protocol { code: i64, message: String },

    #[error("CDP connection closed")]
    ConnectionClosed,

    #[error("CDP invalid response: {0}")]
    InvalidResponse(String),

    /// The transport task is gone or a channel broke.
    #[error("CDP internal error: {0}")]
    Internal(String),
}

impl From<CdpError> for AppError {
    fn from(e: CdpError) -> Self {
        let kind = match &e {
            CdpError::Connection(_) | CdpError::ConnectionClosed => ErrorKind::Connection,
            CdpError::ConnectionTimeout | CdpError::CommandTimeout { .. } => ErrorKind::Timeout,
            CdpError::Protocol { .. } | CdpError::InvalidResponse(_) | CdpError::Internal(_) => {
                ErrorKind::Protocol
            }
        };
        Self::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            CdpError::CommandTimeout {
                method: "Page.navigate".into()
            }
            .to_string(),
            "CDP command timed out: Page.navigate"
        );
        assert_eq!(
            CdpError::Protocol {
                code: -32000,
                message: "Not found".into()
            }
            .to_string(),
            "CDP protocol error (-32000): Not found"
        );
        assert_eq!(CdpError::ConnectionClosed.to_string(), "CDP connection closed");
    }

    #[test]
    fn command_timeout_maps_to_timeout_kind() {
        let err: AppError = CdpError::CommandTimeout {
            method: "Runtime.evaluate".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("Runtime.evaluate"));
    }

    #[test]
    fn closed_connection_maps_to_connection_kind() {
        let err: AppError = CdpError::ConnectionClosed.into();
        assert_eq!(err.kind, ErrorKind::Connection);
    }
}
