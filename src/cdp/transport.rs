use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::CdpError;
use super::types::{CdpCommand, CdpEvent, MessageKind, RawCdpMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from client handles to the transport task.
pub enum TransportCommand {
    SendCommand {
        command: CdpCommand,
        response_tx: oneshot::Sender<Result<serde_json::Value, CdpError>>,
        deadline: Instant,
    },
    /// Deliver every event whose method is in `methods` (and whose session
    /// matches) to `event_tx`, in the order Chrome emitted them.
    Subscribe {
        methods: HashSet<String>,
        session_id: Option<String>,
        event_tx: mpsc::Sender<CdpEvent>,
    },
    Shutdown,
}

struct PendingRequest {
    response_tx: oneshot::Sender<Result<serde_json::Value, CdpError>>,
    method: String,
    deadline: Instant,
}

struct Subscription {
    methods: HashSet<String>,
    session_id: Option<String>,
    event_tx: mpsc::Sender<CdpEvent>,
}

impl Subscription {
    fn wants(&self, event: &CdpEvent) -> bool {
        self.session_id == event.session_id && self.methods.contains(&event.method)
    }
}

/// Clonable handle to the transport task.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    command_tx: mpsc::Sender<TransportCommand>,
    connected: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl TransportHandle {
    /// # Errors
    ///
    /// Returns `CdpError::Internal` if the transport task has exited.
    pub async fn send(&self, cmd: TransportCommand) -> Result<(), CdpError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| CdpError::Internal("transport task is not running".into()))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Connect to `url` and spawn the task that owns the socket.
///
/// # Errors
///
/// Returns `CdpError::Connection` or `CdpError::ConnectionTimeout` if the
/// WebSocket handshake does not complete.
pub async fn spawn_transport(
    url: &str,
    channel_capacity: usize,
    connect_timeout: Duration,
) -> Result<TransportHandle, CdpError> {
    let ws_stream = connect_ws(url, connect_timeout).await?;
    let connected = Arc::new(AtomicBool::new(true));
    let (command_tx, command_rx) = mpsc::channel(channel_capacity);

    let handle = TransportHandle {
        command_tx,
        connected: Arc::clone(&connected),
        next_id: Arc::new(AtomicU64::new(1)),
    };

    tracing::debug!(url, "CDP transport connected");
    tokio::spawn(async move {
        let mut task = TransportTask {
            ws_stream,
            command_rx,
            pending: HashMap::new(),
            subscriptions: Vec::new(),
            connected,
        };
        task.run().await;
    });

    Ok(handle)
}

async fn connect_ws(url: &str, timeout: Duration) -> Result<WsStream, CdpError> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(CdpError::Connection(e.to_string())),
        Err(_) => Err(CdpError::ConnectionTimeout),
    }
}

struct TransportTask {
    ws_stream: WsStream,
    command_rx: mpsc::Receiver<TransportCommand>,
    pending: HashMap<u64, PendingRequest>,
    subscriptions: Vec<Subscription>,
    connected: Arc<AtomicBool>,
}

impl TransportTask {
    async fn run(&mut self) {
        loop {
            if !self.connected.load(Ordering::Relaxed) {
                self.refuse_until_shutdown().await;
                return;
            }

            let next_deadline = self.pending.values().map(|p| p.deadline).min();
            let timeout_sleep = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                ws_msg = self.ws_stream.next() => match ws_msg {
                    Some(Ok(Message::Text(text))) => self.handle_text_message(&text),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => self.handle_disconnect(),
                    Some(Ok(_)) => {}
                },

                cmd = self.command_rx.recv() => match cmd {
                    Some(TransportCommand::SendCommand { command, response_tx, deadline }) => {
                        self.handle_send_command(command, response_tx, deadline).await;
                    }
                    Some(TransportCommand::Subscribe { methods, session_id, event_tx }) => {
                        self.subscriptions.push(Subscription { methods, session_id, event_tx });
                    }
                    Some(TransportCommand::Shutdown) | None => {
                        self.fail_pending(|| CdpError::ConnectionClosed);
                        let _ = self.ws_stream.close(None).await;
                        self.connected.store(false, Ordering::Relaxed);
                        return;
                    }
                },

                () = timeout_sleep => self.sweep_timeouts(),
            }
        }
    }

    /// After the socket is gone every command fails fast until a shutdown.
    async fn refuse_until_shutdown(&mut self) {
        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                TransportCommand::SendCommand { response_tx, .. } => {
                    let _ = response_tx.send(Err(CdpError::ConnectionClosed));
                }
                TransportCommand::Subscribe { .. } => {}
                TransportCommand::Shutdown => return,
            }
        }
    }

    fn handle_text_message(&mut self, text: &str) {
        let Ok(raw) = serde_json::from_str::<RawCdpMessage>(text) else {
            tracing::debug!("ignoring malformed CDP frame");
            return;
        };

        match raw.classify() {
            Some(MessageKind::Response(response)) => {
                if let Some(pending) = self.pending.remove(&response.id) {
                    let result = response.result.map_err(|e| CdpError::Protocol {
                        code: e.code,
                        message: e.message,
                    });
                    let _ = pending.response_tx.send(result);
                }
            }
            Some(MessageKind::Event(event)) => self.dispatch_event(&event),
            None => {}
        }
    }

    fn dispatch_event(&mut self, event: &CdpEvent) {
        self.subscriptions.retain(|sub| {
            if !sub.wants(event) {
                return !sub.event_tx.is_closed();
            }
            match sub.event_tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(method = %event.method, "event subscriber is full, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    async fn handle_send_command(
        &mut self,
        command: CdpCommand,
        response_tx: oneshot::Sender<Result<serde_json::Value, CdpError>>,
        deadline: Instant,
    ) {
        let json = match serde_json::to_string(&command) {
            Ok(j) => j,
            Err(e) => {
                let _ =
                    response_tx.send(Err(CdpError::Internal(format!("serialization error: {e}"))));
                return;
            }
        };

        if let Err(e) = self.ws_stream.send(Message::Text(json.into())).await {
            let _ = response_tx.send(Err(CdpError::Connection(format!(
                "WebSocket write error: {e}"
            ))));
            return;
        }

        self.pending.insert(
            command.id,
            PendingRequest {
                response_tx,
                method: command.method,
                deadline,
            },
        );
    }

    fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&id, _)| id)
            .collect();

        for id in expired {
            if let Some(pending) = self.pending.remove(&id) {
                let _ = pending.response_tx.send(Err(CdpError::CommandTimeout {
                    method: pending.method,
                }));
            }
        }
    }

    fn fail_pending(&mut self, err: impl Fn() -> CdpError) {
        for (_, req) in self.pending.drain() {
            let _ = req.response_tx.send(Err(err()));
        }
    }

    /// The browser went away. The session built on this socket is finished:
    /// pending commands fail and subscribers see their channel close.
    fn handle_disconnect(&mut self) {
        tracing::debug!("CDP socket closed by peer");
        self.connected.store(false, Ordering::Relaxed);
        self.fail_pending(|| CdpError::ConnectionClosed);
        self.subscriptions.clear();
    }
}
