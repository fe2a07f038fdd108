//! State Reconciler
//!
//! Owns the session table. Snapshots replace it wholesale, updates are merged
//! under the staleness filter, and every accepted change is published to the
//! render channel as an immutable [`SessionTable`] snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use crate::model::{UpdateEvent, WorkspaceSession};
use crate::scope::Scope;

/// Read-only view of the sessions, in snapshot relevance order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionTable {
    order: Vec<String>,
    sessions: HashMap<String, WorkspaceSession>,
}

impl SessionTable {
    fn from_snapshot(snapshot: Vec<WorkspaceSession>) -> Self {
        let mut table = SessionTable::default();
        for session in snapshot {
            // First occurrence wins; later duplicates are less relevant.
            if table.sessions.contains_key(&session.id) {
                continue;
            }
            table.order.push(session.id.clone());
            table.sessions.insert(session.id.clone(), session);
        }
        table
    }

    pub fn get(&self, id: &str) -> Option<&WorkspaceSession> {
        self.sessions.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkspaceSession> {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Receiving end of the render channel.
pub type RenderReceiver = mpsc::UnboundedReceiver<Arc<SessionTable>>;

pub struct Reconciler {
    table: Mutex<Arc<SessionTable>>,
    render_tx: mpsc::UnboundedSender<Arc<SessionTable>>,
}

impl Reconciler {
    /// Create a reconciler with an empty table. Each accepted change is sent
    /// once on the returned receiver.
    pub fn new() -> (Self, RenderReceiver) {
        let (render_tx, render_rx) = mpsc::unbounded_channel();
        let reconciler = Self {
            table: Mutex::new(Arc::new(SessionTable::default())),
            render_tx,
        };
        (reconciler, render_rx)
    }

    /// Replace the table with `snapshot`. Dropped if `scope` is already dead.
    pub async fn apply_snapshot(&self, scope: &Scope, snapshot: Vec<WorkspaceSession>) -> bool {
        let mut table = self.table.lock().await;
        if !scope.is_alive() {
            return false;
        }
        *table = Arc::new(SessionTable::from_snapshot(snapshot));
        debug!(sessions = table.len(), "applied snapshot");
        self.publish(&table);
        true
    }

    /// Merge one update. Returns whether the table changed.
    pub async fn apply_update(&self, scope: &Scope, event: UpdateEvent) -> bool {
        let mut table = self.table.lock().await;
        if !scope.is_alive() {
            return false;
        }

        let Some(stored) = table.get(&event.session_id) else {
            trace!(session = %event.session_id, "update for unknown session ignored");
            return false;
        };
        if !event.state.recency.is_newer_than(&stored.latest.recency) {
            trace!(session = %event.session_id, "stale update rejected");
            return false;
        }

        debug!(
            session = %event.session_id,
            phase = %event.state.phase,
            "applied update"
        );
        let next = Arc::make_mut(&mut *table);
        if let Some(session) = next.sessions.get_mut(&event.session_id) {
            session.latest = event.state;
        }
        self.publish(&table);
        true
    }

    /// Reset to the empty table. Publishes only if something was removed.
    pub async fn clear(&self, scope: &Scope) {
        let mut table = self.table.lock().await;
        if !scope.is_alive() || table.is_empty() {
            return;
        }
        *table = Arc::new(SessionTable::default());
        debug!("cleared session table");
        self.publish(&table);
    }

    pub async fn current(&self) -> Arc<SessionTable> {
        self.table.lock().await.clone()
    }

    fn publish(&self, table: &Arc<SessionTable>) {
        // A closed receiver means the view is gone; nothing left to render.
        let _ = self.render_tx.send(table.clone());
    }
}
