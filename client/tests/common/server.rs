//! In-process item server for HTTP and WebSocket tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use stockpile_engine::{ClientMessage, LiveMessage, Record};
use tokio::sync::mpsc;

/// Server state shared across handlers.
#[derive(Debug)]
pub struct ServerState {
    token: String,
    items: DashMap<String, Record>,
    next_id: AtomicU64,
    revision: AtomicU64,
    sockets: DashMap<u64, mpsc::UnboundedSender<String>>,
    next_socket: AtomicU64,
    handshakes: Mutex<Vec<String>>,
    send_validator: AtomicBool,
    conditional_headers: Mutex<Vec<Option<String>>>,
}

impl ServerState {
    fn validator(&self) -> String {
        format!("rev-{}", self.revision.load(Ordering::SeqCst))
    }

    fn changed(&self, message: LiveMessage) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        self.broadcast(&message);
    }

    fn broadcast(&self, message: &LiveMessage) -> usize {
        let Ok(text) = serde_json::to_string(message) else {
            return 0;
        };
        self.sockets
            .iter()
            .filter(|entry| entry.value().send(text.clone()).is_ok())
            .count()
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FakeServer {
    /// Start a server accepting `token` on an ephemeral port.
    pub async fn start(token: &str) -> Self {
        let state = Arc::new(ServerState {
            token: token.to_string(),
            items: DashMap::new(),
            next_id: AtomicU64::new(0),
            revision: AtomicU64::new(0),
            sockets: DashMap::new(),
            next_socket: AtomicU64::new(0),
            handshakes: Mutex::new(Vec::new()),
            send_validator: AtomicBool::new(true),
            conditional_headers: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/", get(ws_upgrade))
            .route("/items", get(list_items).post(create_item))
            .route("/items/{id}", put(update_item).delete(delete_item))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Items sorted by id.
    pub fn items(&self) -> Vec<Record> {
        let mut items: Vec<Record> = self
            .state
            .items
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Seed a record without notifying anyone.
    pub fn insert(&self, record: Record) {
        if let Some(id) = record.id.clone() {
            self.state.items.insert(id, record);
            self.state.revision.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn broadcast(&self, message: &LiveMessage) -> usize {
        self.state.broadcast(message)
    }

    pub fn handshakes(&self) -> Vec<String> {
        self.state.handshakes.lock().unwrap().clone()
    }

    pub fn socket_count(&self) -> usize {
        self.state.sockets.len()
    }

    /// Answer collection fetches without `Last-Modified`.
    pub fn omit_validator(&self) {
        self.state.send_validator.store(false, Ordering::SeqCst);
    }

    /// `If-Modified-Since` of every collection fetch, in arrival order.
    pub fn conditional_headers(&self) -> Vec<Option<String>> {
        self.state.conditional_headers.lock().unwrap().clone()
    }
}

fn authorize(state: &ServerState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {}", state.token);
    let given = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if given == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid token" })),
        )
            .into_response())
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

async fn list_items(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let validator = state.validator();
    let since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok());
    state
        .conditional_headers
        .lock()
        .unwrap()
        .push(since.map(str::to_string));
    if since == Some(validator.as_str()) {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let mut items: Vec<Record> = state.items.iter().map(|e| e.value().clone()).collect();
    items.sort_by(|a, b| a.id.cmp(&b.id));
    if !state.send_validator.load(Ordering::SeqCst) {
        return Json(items).into_response();
    }
    ([(header::LAST_MODIFIED, validator)], Json(items)).into_response()
}

async fn create_item(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(record): Json<Record>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    if record.name.trim().is_empty() {
        return reject(StatusCode::BAD_REQUEST, "Missing name");
    }

    let id = format!("srv-{}", state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let mut created = record.for_remote();
    created.id = Some(id.clone());
    created.version = 1;

    state.items.insert(id, created.clone());
    state.changed(LiveMessage::Created(created.clone()));
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn update_item(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(record): Json<Record>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    if !state.items.contains_key(&id) {
        return reject(StatusCode::METHOD_NOT_ALLOWED, "Resource no longer exists");
    }

    let mut updated = record.for_remote();
    updated.id = Some(id.clone());
    state.items.insert(id, updated.clone());
    state.changed(LiveMessage::Updated(updated.clone()));
    Json(updated).into_response()
}

async fn delete_item(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    match state.items.remove(&id) {
        Some((_, record)) => {
            state.changed(LiveMessage::Deleted(Some(record)));
            StatusCode::NO_CONTENT.into_response()
        }
        None => reject(StatusCode::NOT_FOUND, "Not found"),
    }
}

async fn ws_upgrade(State(state): State<Arc<ServerState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();

    // The first frame must be the authorization handshake
    let token = match receiver.next().await {
        Some(Ok(Message::Text(text))) => {
            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Authorization { token }) => token,
                Err(_) => return,
            }
        }
        _ => return,
    };
    state.handshakes.lock().unwrap().push(token.clone());

    if token != state.token {
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let socket_id = state.next_socket.fetch_add(1, Ordering::SeqCst);
    state.sockets.insert(socket_id, tx);

    let forward = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }

    state.sockets.remove(&socket_id);
    forward.abort();
}
