//! Live channel for server-pushed record changes.
//!
//! A connection sends the authorization handshake as its first frame, then
//! forwards every parsed [`LiveMessage`] into a channel owned by the runtime.
//! Connections are never reused: the runtime closes the current one and opens
//! a fresh one whenever the token or connectivity changes.

use std::future::Future;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use stockpile_engine::{ClientMessage, Error, LiveMessage, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, protocol::Message};

/// Opens live connections.
pub trait LiveConnector: Send + Sync + 'static {
    /// Connect, authorize with `token` and start forwarding messages to `sink`.
    fn connect(
        &self,
        token: &str,
        sink: mpsc::Sender<LiveMessage>,
    ) -> impl Future<Output = Result<LiveConnection>> + Send;
}

impl<T: LiveConnector> LiveConnector for Arc<T> {
    fn connect(
        &self,
        token: &str,
        sink: mpsc::Sender<LiveMessage>,
    ) -> impl Future<Output = Result<LiveConnection>> + Send {
        (**self).connect(token, sink)
    }
}

/// Handle to an open connection's reader task.
///
/// Dropping the handle also stops the task.
#[derive(Debug)]
pub struct LiveConnection {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LiveConnection {
    /// Wrap a reader task that stops when `shutdown` fires or is dropped.
    pub fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Stop the reader task and wait for it to finish.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Live channel task failed: {}", e);
        }
    }
}

/// [`LiveConnector`] over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl LiveConnector for WsConnector {
    async fn connect(&self, token: &str, sink: mpsc::Sender<LiveMessage>) -> Result<LiveConnection> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(connect_error)?;
        let (mut write, mut read) = stream.split();

        let handshake = serde_json::to_string(&ClientMessage::authorization(token))
            .map_err(|e| Error::Protocol(e.to_string()))?;
        write
            .send(Message::Text(handshake.into()))
            .await
            .map_err(|e| Error::Network(format!("live handshake failed: {}", e)))?;

        tracing::info!(url = %self.url, "Live channel connected");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<LiveMessage>(text.as_str()) {
                                Ok(message) => {
                                    tracing::debug!(kind = message.kind(), "Live message received");
                                    if sink.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Skipping unparseable live message: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Live channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("Live channel error: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        Ok(LiveConnection::new(shutdown_tx, task))
    }
}

fn connect_error(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Http(response)
            if response.status() == 401 || response.status() == 403 =>
        {
            Error::Auth(format!("live channel rejected: {}", response.status()))
        }
        other => Error::Network(format!("live channel connect failed: {}", other)),
    }
}
