//! In-memory fakes for the remote collaborators.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};

use crate::error::{Result, SyncError};
use crate::model::{
    InstanceState, Phase, RecencyMarker, Selector, SessionRecord, UpdateEvent,
};
use crate::provider::{Connector, GetSessionsOptions, UpdateFeed, WorkspaceApi};

/// Build an instance state for `instance` with the given status version.
pub fn instance(phase: Phase, instance: &str, version: u64) -> InstanceState {
    InstanceState {
        phase,
        failure: None,
        ide_url: format!("https://{instance}.ws.example"),
        recency: RecencyMarker {
            instance_id: instance.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            version,
        },
    }
}

pub fn record(id: &str, state: Option<InstanceState>) -> SessionRecord {
    SessionRecord {
        id: id.to_string(),
        context_url: format!("https://github.com/acme/{id}"),
        latest_instance: state,
    }
}

pub fn update(session_id: &str, state: InstanceState) -> UpdateEvent {
    UpdateEvent {
        session_id: session_id.to_string(),
        state,
    }
}

#[derive(Default)]
struct FakeApiState {
    sessions: Vec<SessionRecord>,
    snapshot_error: Option<String>,
    subscribe_error: Option<String>,
    subscriptions: Vec<mpsc::UnboundedSender<Result<UpdateEvent>>>,
    calls: Vec<String>,
}

/// Scriptable remote. Clones share state.
#[derive(Clone)]
pub struct FakeApi {
    state: Arc<Mutex<FakeApiState>>,
    snapshot_gate: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for FakeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeApi")
            .field("sessions", &state.sessions.len())
            .field("subscriptions", &state.subscriptions.len())
            .field("calls", &state.calls)
            .finish()
    }
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeApi {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(FakeApiState::default())),
            snapshot_gate: Arc::new(gate),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeApiState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_sessions(self, sessions: Vec<SessionRecord>) -> Self {
        self.lock().sessions = sessions;
        self
    }

    pub fn fail_snapshots(&self, reason: Option<&str>) {
        self.lock().snapshot_error = reason.map(String::from);
    }

    pub fn fail_subscribe(&self, reason: Option<&str>) {
        self.lock().subscribe_error = reason.map(String::from);
    }

    /// Block snapshot fetches until `release_snapshots` is called.
    pub fn hold_snapshots(&self) {
        self.snapshot_gate.send_replace(false);
    }

    pub fn release_snapshots(&self) {
        self.snapshot_gate.send_replace(true);
    }

    /// Deliver an event to every open subscription.
    pub fn push(&self, event: UpdateEvent) {
        let mut state = self.lock();
        state.subscriptions.retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Fail every open subscription as if the connection dropped.
    pub fn break_subscriptions(&self, reason: &str) {
        let mut state = self.lock();
        for tx in state.subscriptions.drain(..) {
            let _ = tx.send(Err(SyncError::SubscriptionBroken(reason.to_string())));
        }
    }

    /// Close every open subscription without an error item.
    pub fn close_subscriptions(&self) {
        self.lock().subscriptions.clear();
    }

    /// Subscriptions whose consumer is still attached.
    pub fn active_subscriptions(&self) -> usize {
        let mut state = self.lock();
        state.subscriptions.retain(|tx| !tx.is_closed());
        state.subscriptions.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

impl WorkspaceApi for FakeApi {
    fn get_sessions(
        &self,
        options: GetSessionsOptions,
    ) -> impl Future<Output = Result<Vec<SessionRecord>>> + Send {
        let api = self.clone();
        async move {
            api.lock().calls.push("get_sessions".to_string());
            let mut gate = api.snapshot_gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;

            let state = api.lock();
            if let Some(reason) = &state.snapshot_error {
                return Err(SyncError::SnapshotFetch(reason.clone()));
            }
            Ok(state.sessions.iter().take(options.limit).cloned().collect())
        }
    }

    fn subscribe_updates(
        &self,
        selector: &Selector,
    ) -> impl Future<Output = Result<UpdateFeed>> + Send {
        let api = self.clone();
        let selector = selector.clone();
        async move {
            let mut state = api.lock();
            state.calls.push(format!("subscribe:{selector}"));
            if let Some(reason) = &state.subscribe_error {
                return Err(SyncError::SubscriptionBroken(reason.clone()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.subscriptions.push(tx);
            let feed = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(feed.boxed())
        }
    }
}

/// Connector handing out clones of one [`FakeApi`].
pub struct FakeConnector {
    api: FakeApi,
    connected: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    fail_next: Mutex<Option<String>>,
}

impl FakeConnector {
    pub fn new(api: FakeApi) -> Self {
        Self {
            api,
            connected: Arc::new(AtomicBool::new(true)),
            connects: Arc::new(AtomicUsize::new(0)),
            fail_next: Mutex::new(None),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub fn connect_count(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }

    pub fn fail_next_connect(&self, reason: &str) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }
}

impl Connector for FakeConnector {
    type Api = FakeApi;

    fn is_connected(&self, _host: &str) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self, host: &str) -> impl Future<Output = Result<FakeApi>> + Send {
        let failure = self
            .fail_next
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let api = self.api.clone();
        let connects = self.connects.clone();
        let host = host.to_string();
        async move {
            tokio::task::yield_now().await;
            if let Some(reason) = failure {
                return Err(SyncError::Connectivity { host, reason });
            }
            connects.fetch_add(1, Ordering::SeqCst);
            Ok(api)
        }
    }
}
