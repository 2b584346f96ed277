//! Shared fixtures for client integration tests.

#![allow(dead_code)]

pub mod server;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stockpile_client::{
    FetchOutcome, ItemStore, LiveConnection, LiveConnector, MemoryStorage, RemoteApi, Session,
    SyncEngine,
};
use stockpile_engine::{Error, LiveMessage, Record, Result, SyncEvent};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};

pub const TOKEN: &str = "test-token";

pub type TestEngine = SyncEngine<Arc<MockRemote>, Arc<MemoryStorage>>;

/// A record that has never been saved.
pub fn apples() -> Record {
    Record::draft("Apples", "Poland", 10.0, 2.5)
}

/// A record as the server would hold it.
pub fn stored(id: &str, name: &str, version: u64) -> Record {
    Record::new(name, "Poland", 1.0, 1.0)
        .with_id(id)
        .with_version(version)
}

pub fn online() -> Session {
    Session::online(TOKEN)
}

pub fn offline() -> Session {
    Session::offline(Some(TOKEN.to_string()))
}

/// Engine over `local`, with the offline load already done.
pub fn engine_with(remote: Arc<MockRemote>, local: &[Record]) -> (TestEngine, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    ItemStore::new(storage.clone()).replace_all(local).unwrap();

    let mut engine = SyncEngine::new(remote, storage.clone());
    engine.initialize().unwrap();
    (engine, storage)
}

pub fn engine(remote: Arc<MockRemote>) -> TestEngine {
    engine_with(remote, &[]).0
}

/// Collect every event already sent.
pub fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Wait until `condition` holds, or panic after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for the next event matching `predicate`.
pub async fn next_event(
    events: &mut broadcast::Receiver<SyncEvent>,
    predicate: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// A call received by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch { since: Option<String> },
    Create(Record),
    Update(Record),
    Delete(String),
}

#[derive(Debug, Default)]
struct RemoteState {
    records: Vec<Record>,
    next_id: u64,
    revision: u64,
    calls: Vec<Call>,
    fail_fetch: Option<Error>,
    fail_create: Option<Error>,
    fail_update: Option<Error>,
    fail_delete: Option<Error>,
    anonymous_creates: bool,
}

impl RemoteState {
    fn validator(&self) -> String {
        format!("rev-{}", self.revision)
    }
}

/// In-memory stand-in for the item API.
///
/// Failures are injected per operation and stay in place until cleared.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_records(records: Vec<Record>) -> Arc<Self> {
        let remote = Self::new();
        remote.state.lock().unwrap().records = records;
        remote
    }

    /// Insert or replace a record on the server side.
    pub fn put(&self, record: Record) {
        let mut state = self.state.lock().unwrap();
        match state.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => state.records.push(record),
        }
        state.revision += 1;
    }

    pub fn records(&self) -> Vec<Record> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fetches(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Fetch { since } => Some(since),
                _ => None,
            })
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches().len()
    }

    pub fn creates(&self) -> Vec<Record> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn fail_fetch(&self, error: Option<Error>) {
        self.state.lock().unwrap().fail_fetch = error;
    }

    pub fn fail_create(&self, error: Option<Error>) {
        self.state.lock().unwrap().fail_create = error;
    }

    pub fn fail_update(&self, error: Option<Error>) {
        self.state.lock().unwrap().fail_update = error;
    }

    pub fn fail_delete(&self, error: Option<Error>) {
        self.state.lock().unwrap().fail_delete = error;
    }

    /// Answer creates with a record that has no id.
    pub fn answer_creates_without_id(&self) {
        self.state.lock().unwrap().anonymous_creates = true;
    }

    /// Make every fetch wait for a permit from the returned semaphore.
    pub fn gate_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

impl RemoteApi for MockRemote {
    async fn fetch_all(&self, _token: &str, if_modified_since: Option<&str>) -> Result<FetchOutcome> {
        self.state.lock().unwrap().calls.push(Call::Fetch {
            since: if_modified_since.map(str::to_string),
        });

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let state = self.state.lock().unwrap();
        if let Some(error) = &state.fail_fetch {
            return Err(error.clone());
        }
        let validator = state.validator();
        if if_modified_since == Some(validator.as_str()) {
            return Ok(FetchOutcome::NotModified);
        }
        Ok(FetchOutcome::Fetched {
            records: state.records.clone(),
            last_modified: Some(validator),
        })
    }

    async fn create(&self, _token: &str, record: &Record) -> Result<Record> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create(record.clone()));
        if let Some(error) = &state.fail_create {
            return Err(error.clone());
        }

        state.next_id += 1;
        let mut created = record.for_remote();
        created.id = Some(format!("srv-{}", state.next_id));
        created.version = 1;
        state.records.push(created.clone());
        state.revision += 1;
        if state.anonymous_creates {
            created.id = None;
        }
        Ok(created)
    }

    async fn update(&self, _token: &str, record: &Record) -> Result<Record> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Update(record.clone()));
        if let Some(error) = &state.fail_update {
            return Err(error.clone());
        }

        let updated = record.for_remote();
        let Some(slot) = state.records.iter_mut().find(|r| r.id == updated.id) else {
            return Err(Error::Network("server responded with 405: gone".into()));
        };
        *slot = updated.clone();
        state.revision += 1;
        Ok(updated)
    }

    async fn delete(&self, _token: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(id.to_string()));
        if let Some(error) = &state.fail_delete {
            return Err(error.clone());
        }

        state.records.retain(|r| r.id() != Some(id));
        state.revision += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    tokens: Vec<String>,
    sinks: Vec<mpsc::Sender<LiveMessage>>,
}

/// Live connector that records every connection and lets tests push
/// messages into the latest one.
#[derive(Debug, Default)]
pub struct MockConnector {
    state: Mutex<ConnectorState>,
    closed: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Push a message through the most recent connection.
    pub async fn push(&self, message: LiveMessage) {
        let sink = self
            .state
            .lock()
            .unwrap()
            .sinks
            .last()
            .cloned()
            .expect("no live connection");
        sink.send(message).await.unwrap();
    }
}

impl LiveConnector for MockConnector {
    async fn connect(&self, token: &str, sink: mpsc::Sender<LiveMessage>) -> Result<LiveConnection> {
        {
            let mut state = self.state.lock().unwrap();
            state.tokens.push(token.to_string());
            state.sinks.push(sink);
        }

        let (shutdown, stopped) = oneshot::channel::<()>();
        let closed = self.closed.clone();
        let task = tokio::spawn(async move {
            let _ = stopped.await;
            closed.fetch_add(1, Ordering::SeqCst);
        });

        Ok(LiveConnection::new(shutdown, task))
    }
}
