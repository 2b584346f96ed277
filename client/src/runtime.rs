//! Single-writer runtime around a [`SyncEngine`].
//!
//! One task owns the engine and the live connection. Everything that touches
//! the local store (caller commands, live messages, reconciliation passes)
//! is serialized through that task, so passes never overlap and a live message
//! is applied either before or after a pass, never in the middle of a step.
//!
//! Reconcile triggers that pile up while the task is busy are drained together
//! and run as a single follow-up pass.

use stockpile_engine::{Error, LiveMessage, Record, RecordId, Result, SyncEvent, SyncState};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{SaveOutcome, SyncEngine};
use crate::live::{LiveConnection, LiveConnector};
use crate::remote::RemoteApi;
use crate::session::Session;
use crate::storage::BlobStorage;

const COMMAND_BUFFER: usize = 64;
const LIVE_BUFFER: usize = 64;

/// Requests handled by the runtime task.
#[derive(Debug)]
pub enum Command {
    SetToken(Option<String>),
    SetConnectivity(bool),
    Reconcile,
    Save {
        record: Record,
        reply: oneshot::Sender<Result<SaveOutcome>>,
    },
    Delete {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },
    ResolveConflict {
        id: RecordId,
        resolved: Option<Record>,
        reply: oneshot::Sender<Result<Record>>,
    },
    Shutdown,
}

/// Handle to a running engine.
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Replace the session token. `None` signs out.
    pub async fn set_token(&self, token: Option<String>) -> Result<()> {
        self.send(Command::SetToken(token)).await
    }

    pub async fn set_connected(&self, connected: bool) -> Result<()> {
        self.send(Command::SetConnectivity(connected)).await
    }

    /// Request a reconciliation pass.
    pub async fn trigger_reconcile(&self) -> Result<()> {
        self.send(Command::Reconcile).await
    }

    pub async fn save(&self, record: Record) -> Result<SaveOutcome> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Save { record, reply }).await?;
        response.await.map_err(|_| Error::Cancelled)?
    }

    pub async fn delete(&self, id: impl Into<RecordId>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Delete {
            id: id.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| Error::Cancelled)?
    }

    pub async fn resolve_conflict(
        &self,
        id: impl Into<RecordId>,
        resolved: Option<Record>,
    ) -> Result<Record> {
        let (reply, response) = oneshot::channel();
        self.send(Command::ResolveConflict {
            id: id.into(),
            resolved,
            reply,
        })
        .await?;
        response.await.map_err(|_| Error::Cancelled)?
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Watch projected state changes.
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Receive every dispatched event from now on.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Cancel any running pass or remote call, close the live channel and
    /// wait for the task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!("Sync runtime task failed: {}", e);
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Cancelled)
    }
}

/// Start the runtime task.
///
/// The task loads the local store immediately; the first pass runs as soon
/// as a token and connectivity are supplied.
pub fn spawn<R, S, C>(engine: SyncEngine<R, S>, connector: C) -> SyncHandle
where
    R: RemoteApi,
    S: BlobStorage,
    C: LiveConnector,
{
    let (commands, inbox) = mpsc::channel(COMMAND_BUFFER);
    let state = engine.subscribe();
    let events = engine.event_sender();
    let cancel = engine.cancellation();

    let actor = Actor {
        engine,
        connector,
        session: Session::default(),
        live: None,
        reconcile_requested: false,
    };
    let task = tokio::spawn(actor.run(inbox));

    SyncHandle {
        commands,
        state,
        events,
        cancel,
        task,
    }
}

struct LiveLink {
    connection: LiveConnection,
    messages: mpsc::Receiver<LiveMessage>,
}

enum Input {
    Command(Option<Command>),
    Live(Option<LiveMessage>),
}

struct Actor<R, S, C> {
    engine: SyncEngine<R, S>,
    connector: C,
    session: Session,
    live: Option<LiveLink>,
    reconcile_requested: bool,
}

impl<R, S, C> Actor<R, S, C>
where
    R: RemoteApi,
    S: BlobStorage,
    C: LiveConnector,
{
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        if self.engine.initialize().is_ok() {
            self.reconcile_requested = true;
        }

        'outer: loop {
            let input = tokio::select! {
                command = inbox.recv() => Input::Command(command),
                message = next_live(&mut self.live) => Input::Live(message),
            };

            match input {
                Input::Command(None) => break,
                Input::Command(Some(command)) => {
                    if !self.handle(command).await {
                        break;
                    }
                }
                Input::Live(Some(message)) => self.apply_live(message),
                Input::Live(None) => {
                    tracing::info!("Live channel ended");
                    self.close_live().await;
                }
            }

            while let Ok(command) = inbox.try_recv() {
                if !self.handle(command).await {
                    break 'outer;
                }
            }

            self.run_requested_pass().await;
        }

        self.close_live().await;
        tracing::info!("Sync runtime stopped");
    }

    /// Returns `false` when the task should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::SetToken(token) => {
                if self.session.token != token {
                    self.session.token = token;
                    self.session_changed().await;
                }
            }
            Command::SetConnectivity(connected) => {
                if self.session.connected != connected {
                    tracing::info!(connected, "Connectivity changed");
                    self.session.connected = connected;
                    self.session_changed().await;
                }
            }
            Command::Reconcile => self.reconcile_requested = true,
            Command::Save { record, reply } => {
                let _ = reply.send(self.engine.save(&self.session, record).await);
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.engine.delete(&self.session, &id).await);
            }
            Command::ResolveConflict {
                id,
                resolved,
                reply,
            } => {
                let result = self
                    .engine
                    .resolve_conflict(&self.session, &id, resolved)
                    .await;
                let _ = reply.send(result);
            }
            Command::Shutdown => return false,
        }

        true
    }

    async fn session_changed(&mut self) {
        self.reconcile_requested = true;
        self.close_live().await;

        let Some(token) = self.session.online_token() else {
            tracing::debug!("Live channel held closed while offline or signed out");
            return;
        };

        let (sink, messages) = mpsc::channel(LIVE_BUFFER);
        match self.connector.connect(token, sink).await {
            Ok(connection) => {
                self.live = Some(LiveLink {
                    connection,
                    messages,
                })
            }
            Err(e) => tracing::warn!("Failed to open live channel: {}", e),
        }
    }

    async fn close_live(&mut self) {
        if let Some(link) = self.live.take() {
            link.connection.close().await;
        }
    }

    fn apply_live(&mut self, message: LiveMessage) {
        let kind = message.kind();
        match self.engine.handle_live_message(message) {
            Ok(outcome) => tracing::debug!(kind, ?outcome, "Live message applied"),
            Err(e) => tracing::warn!(kind, "Failed to apply live message: {}", e),
        }
    }

    async fn run_requested_pass(&mut self) {
        if !self.reconcile_requested
            || self.engine.is_cancelled()
            || !self.engine.is_ready(&self.session)
        {
            return;
        }
        self.reconcile_requested = false;

        if let Err(e) = self.engine.reconcile(&self.session).await {
            tracing::debug!("Pass ended with error: {}", e);
        }
    }
}

async fn next_live(live: &mut Option<LiveLink>) -> Option<LiveMessage> {
    match live {
        Some(link) => link.messages.recv().await,
        None => std::future::pending().await,
    }
}
