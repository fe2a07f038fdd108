//! Workspace Sync - live view of a user's remote workspace sessions
//!
//! Keeps an in-memory session table correct by combining one bulk snapshot
//! with an unbounded stream of per-instance status updates. All work is bound
//! to a [`Scope`] tree tied to the lifetime of the view showing the table.
//!
//! Transport and authentication are not handled here; callers supply a
//! [`Connector`] that knows how to reach a host.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use workspace_sync::{ConnectionProvider, Connector, Scope, SyncController, SyncOptions};
//!
//! async fn show<C: Connector>(connector: C) -> workspace_sync::Result<()> {
//!     let view = Scope::root();
//!     let provider = Arc::new(ConnectionProvider::new(connector));
//!     let (controller, mut tables) =
//!         SyncController::new(view.clone(), provider, SyncOptions::new("gitpod.io"))?;
//!
//!     controller.refresh().await;
//!     while let Some(table) = tables.recv().await {
//!         for session in table.iter() {
//!             println!("{} {}", session.id, session.category().label());
//!         }
//!     }
//!
//!     view.terminate();
//!     Ok(())
//! }
//! ```

mod controller;
mod error;
mod model;
mod provider;
mod reconciler;
mod scope;
mod snapshot;
mod subscriber;

#[cfg(test)]
mod test_helpers;

pub use controller::{SyncController, SyncOptions, SyncState};
pub use error::{Result, SyncError};
pub use model::{
    ConnectAction, InstanceState, Phase, PresentationCategory, RecencyMarker, Selector,
    SessionRecord, UpdateEvent, WorkspaceSession,
};
pub use provider::{ConnectionProvider, Connector, GetSessionsOptions, UpdateFeed, WorkspaceApi};
pub use reconciler::{Reconciler, RenderReceiver, SessionTable};
pub use scope::Scope;
pub use snapshot::{DEFAULT_SNAPSHOT_LIMIT, load_snapshot};
pub use subscriber::{StreamEnd, StreamItem, UpdateStream, subscribe};
