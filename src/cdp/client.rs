use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};

use super::error::CdpError;
use super::transport::{TransportCommand, TransportHandle, spawn_transport};
use super::types::{CdpCommand, CdpEvent};

/// Configuration for a CDP client connection.
#[derive(Debug, Clone)]
pub struct CdpConfig {
    /// Timeout for the WebSocket handshake (default: 10s).
    pub connect_timeout: Duration,
    /// Timeout for a single command round-trip (default: 30s).
    pub command_timeout: Duration,
    /// Capacity of the command channel and of each event subscription.
    pub channel_capacity: usize,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            channel_capacity: 1024,
        }
    }
}

impl CdpConfig {
    /// Default config with the per-command timeout replaced.
    #[must_use]
    pub fn with_command_timeout(timeout: Duration) -> Self {
        Self {
            command_timeout: timeout,
            ..Self::default()
        }
    }
}

/// Browser-level CDP connection.
///
/// Owns nothing but a handle to the background transport task; dropping the
/// client does not close the browser.
#[derive(Debug)]
pub struct CdpClient {
    handle: TransportHandle,
    config: CdpConfig,
}

impl CdpClient {
    /// Connect to a browser WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Connection` if the handshake fails, or
    /// `CdpError::ConnectionTimeout` if it exceeds the configured timeout.
    pub async fn connect(url: &str, config: CdpConfig) -> Result<Self, CdpError> {
        let handle =
            spawn_transport(url, config.channel_capacity, config.connect_timeout).await?;
        Ok(Self { handle, config })
    }

    /// Send a browser-level command.
    ///
    /// # Errors
    ///
    /// `CdpError::CommandTimeout`, `CdpError::Protocol`, or a transport error.
    pub async fn send_command(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CdpError> {
        send_command_impl(&self.handle, self.config.command_timeout, method, params, None).await
    }

    /// Attach to a target (`flatten` mode) and return a session bound to it.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Protocol` if the target cannot be attached.
    pub async fn attach(&self, target_id: &str) -> Result<CdpSession, CdpError> {
        let result = self
            .send_command(
                "Target.attachToTarget",
                Some(serde_json::json!({ "targetId": target_id, "flatten": true })),
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| {
                CdpError::InvalidResponse("Target.attachToTarget response missing sessionId".into())
            })?
            .to_owned();

        Ok(CdpSession {
            session_id,
            handle: self.handle.clone(),
            config: self.config.clone(),
        })
    }

    /// Shut the transport down. The browser keeps running.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Internal` if the transport task already exited.
    pub async fn close(self) -> Result<(), CdpError> {
        self.handle.send(TransportCommand::Shutdown).await
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }
}

/// A CDP session attached to one page target.
#[derive(Debug, Clone)]
pub struct CdpSession {
    session_id: String,
    handle: TransportHandle,
    config: CdpConfig,
}

impl CdpSession {
    /// # Errors
    ///
    /// Same as [`CdpClient::send_command`].
    pub async fn send_command(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CdpError> {
        send_command_impl(
            &self.handle,
            self.config.command_timeout,
            method,
            params,
            Some(self.session_id.clone()),
        )
        .await
    }

    /// Subscribe to a set of event methods on one ordered channel.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Internal` if the transport task has exited.
    pub async fn subscribe(&self, methods: &[&str]) -> Result<mpsc::Receiver<CdpEvent>, CdpError> {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        self.handle
            .send(TransportCommand::Subscribe {
                methods: methods.iter().map(|m| (*m).to_owned()).collect::<HashSet<_>>(),
                session_id: Some(self.session_id.clone()),
                event_tx,
            })
            .await?;
        Ok(event_rx)
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }
}

async fn send_command_impl(
    handle: &TransportHandle,
    command_timeout: Duration,
    method: &str,
    params: Option<serde_json::Value>,
    session_id: Option<String>,
) -> Result<serde_json::Value, CdpError> {
    let command = CdpCommand {
        id: handle.next_message_id(),
        method: method.to_owned(),
        params,
        session_id,
    };

    let (response_tx, response_rx) = oneshot::channel();
    handle
        .send(TransportCommand::SendCommand {
            command,
            response_tx,
            deadline: Instant::now() + command_timeout,
        })
        .await?;

    response_rx
        .await
        .map_err(|_| CdpError::Internal("transport task exited before responding".into()))?
}
