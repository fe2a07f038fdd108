//! Sync Controller
//!
//! Drives refresh cycles for one host:
//!
//! ```text
//! Idle ─refresh─▶ Connecting ─▶ Syncing ─▶ Live
//!   ▲                 │            │         │
//!   └── not connected ┘   failure ─┘  broken ┘
//!
//! any state ── ui scope terminated ──▶ Disposed
//! ```
//!
//! Each cycle runs in a child of the UI scope. Starting a cycle terminates the
//! previous child and waits for its task to unwind, so at most one
//! subscription is ever live. Failures never escape; they show up as state
//! transitions and a warning in the log.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::model::Selector;
use crate::provider::{ConnectionProvider, Connector};
use crate::reconciler::{Reconciler, RenderReceiver};
use crate::scope::Scope;
use crate::snapshot::{DEFAULT_SNAPSHOT_LIMIT, load_snapshot};
use crate::subscriber::{StreamEnd, StreamItem, subscribe};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Connecting,
    Syncing,
    Live,
    Disposed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    pub host: String,
    pub snapshot_limit: usize,
    pub selector: Selector,
}

impl SyncOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            selector: Selector::All,
        }
    }
}

struct SyncCycle {
    scope: Scope,
    task: JoinHandle<()>,
}

pub struct SyncController<C: Connector> {
    options: SyncOptions,
    provider: Arc<ConnectionProvider<C>>,
    reconciler: Arc<Reconciler>,
    ui_scope: Scope,
    cycle: Mutex<Option<SyncCycle>>,
    state: Arc<watch::Sender<SyncState>>,
}

impl<C: Connector> SyncController<C> {
    /// Bind a controller to `ui_scope`. Terminating that scope disposes the
    /// controller. Table changes are delivered on the returned receiver.
    pub fn new(
        ui_scope: Scope,
        provider: Arc<ConnectionProvider<C>>,
        options: SyncOptions,
    ) -> Result<(Self, RenderReceiver)> {
        let (reconciler, render_rx) = Reconciler::new();
        let (state, _) = watch::channel(SyncState::Idle);
        let state = Arc::new(state);

        let on_dispose = state.clone();
        ui_scope.on_termination(move || {
            on_dispose.send_replace(SyncState::Disposed);
        })?;

        let controller = Self {
            options,
            provider,
            reconciler: Arc::new(reconciler),
            ui_scope,
            cycle: Mutex::new(None),
            state,
        };
        Ok((controller, render_rx))
    }

    /// Start a new sync cycle, cancelling the current one first.
    ///
    /// Never fails: connectivity problems leave the controller `Idle`.
    pub async fn refresh(&self) {
        let mut cycle = self.cycle.lock().await;

        if let Some(previous) = cycle.take() {
            previous.scope.terminate();
            // Aborted tasks report a JoinError; either way it has stopped.
            let _ = previous.task.await;
        }

        if !self.ui_scope.is_alive() {
            return;
        }
        transition(&self.state, &self.ui_scope, SyncState::Connecting);

        let host = &self.options.host;
        if !self.provider.is_connected(host) {
            info!(host = %host, "not connected; showing empty table");
            self.reconciler.clear(&self.ui_scope).await;
            transition(&self.state, &self.ui_scope, SyncState::Idle);
            return;
        }

        let Ok(scope) = self.ui_scope.create_child() else {
            return;
        };
        let run = run_cycle(
            scope.clone(),
            self.options.clone(),
            self.provider.clone(),
            self.reconciler.clone(),
            self.state.clone(),
        );
        match scope.spawn(run) {
            Ok(task) => *cycle = Some(SyncCycle { scope, task }),
            Err(e) => debug!(error = %e, "sync cycle not started"),
        }
    }

    /// Terminate the UI scope and everything under it.
    pub fn dispose(&self) {
        self.ui_scope.terminate();
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Connectivity predicate for the view.
    pub fn is_connected(&self) -> bool {
        self.provider.is_connected(&self.options.host)
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Scope of the most recently started cycle, if any.
    pub async fn cycle_scope(&self) -> Option<Scope> {
        self.cycle.lock().await.as_ref().map(|c| c.scope.clone())
    }
}

/// Move to `next` unless disposed or `scope` has died. Checked under the
/// channel lock so a dying cycle cannot overwrite `Disposed`.
fn transition(state: &watch::Sender<SyncState>, scope: &Scope, next: SyncState) {
    state.send_if_modified(|current| {
        if *current == SyncState::Disposed || *current == next || !scope.is_alive() {
            return false;
        }
        debug!(from = ?current, to = ?next, "sync state");
        *current = next;
        true
    });
}

async fn run_cycle<C: Connector>(
    scope: Scope,
    options: SyncOptions,
    provider: Arc<ConnectionProvider<C>>,
    reconciler: Arc<Reconciler>,
    state: Arc<watch::Sender<SyncState>>,
) {
    let host = options.host.as_str();
    transition(&state, &scope, SyncState::Syncing);

    let client = match scope.run(provider.obtain_client(host)).await.and_then(|r| r) {
        Ok(client) => client,
        Err(e) if e.is_cancellation() => return,
        Err(e) => {
            warn!(host = %host, error = %e, code = e.error_code(), "connect failed");
            reconciler.clear(&scope).await;
            transition(&state, &scope, SyncState::Idle);
            return;
        }
    };

    let snapshot = scope
        .run(load_snapshot(&*client, options.snapshot_limit))
        .await
        .and_then(|r| r);
    let sessions = match snapshot {
        Ok(sessions) => sessions,
        Err(e) if e.is_cancellation() => return,
        Err(e) => {
            abandon(&provider, &state, &scope, host, e).await;
            return;
        }
    };
    if !reconciler.apply_snapshot(&scope, sessions).await {
        return;
    }

    let mut updates = match subscribe(&scope, &*client, options.selector.clone()).await {
        Ok(updates) => updates,
        Err(e) if e.is_cancellation() => return,
        Err(e) => {
            abandon(&provider, &state, &scope, host, e).await;
            return;
        }
    };
    transition(&state, &scope, SyncState::Live);
    info!(host = %host, "live");

    loop {
        match updates.next().await {
            StreamItem::Update(event) => {
                reconciler.apply_update(&scope, event).await;
            }
            StreamItem::End(StreamEnd::Stopped) => return,
            StreamItem::End(StreamEnd::Failed(e)) => {
                abandon(&provider, &state, &scope, host, e).await;
                return;
            }
        }
    }
}

/// End a cycle after a remote failure. The table keeps its last accepted
/// state until the next refresh.
async fn abandon<C: Connector>(
    provider: &ConnectionProvider<C>,
    state: &watch::Sender<SyncState>,
    scope: &Scope,
    host: &str,
    error: SyncError,
) {
    if !scope.is_alive() {
        return;
    }
    warn!(host = %host, error = %error, code = error.error_code(), "sync cycle ended");
    if error.invalidates_client() {
        provider.invalidate(host).await;
    }
    transition(state, scope, SyncState::Idle);
}
