//! Connection Provider
//!
//! Resolves and memoizes one API client per remote host. Network and auth
//! setup live behind the [`Connector`] trait; this module only guarantees that
//! concurrent callers for the same host share a single connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::model::{Selector, SessionRecord, UpdateEvent};

/// Options for the bulk session fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GetSessionsOptions {
    pub limit: usize,
}

/// Raw push feed from the remote. `None` from the stream means the remote
/// side went away.
pub type UpdateFeed = BoxStream<'static, Result<UpdateEvent>>;

/// Remote calls consumed by the sync core.
pub trait WorkspaceApi: Send + Sync + 'static {
    fn get_sessions(
        &self,
        options: GetSessionsOptions,
    ) -> impl Future<Output = Result<Vec<SessionRecord>>> + Send;

    fn subscribe_updates(
        &self,
        selector: &Selector,
    ) -> impl Future<Output = Result<UpdateFeed>> + Send;
}

/// Connectivity and authentication collaborator.
pub trait Connector: Send + Sync + 'static {
    type Api: WorkspaceApi;

    /// Whether credentials for `host` are present.
    fn is_connected(&self, host: &str) -> bool;

    fn connect(&self, host: &str) -> impl Future<Output = Result<Self::Api>> + Send;
}

/// Memoizing front for a [`Connector`].
pub struct ConnectionProvider<C: Connector> {
    connector: C,
    clients: Mutex<HashMap<String, Arc<C::Api>>>,
}

impl<C: Connector> ConnectionProvider<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_connected(&self, host: &str) -> bool {
        self.connector.is_connected(host)
    }

    /// Return the client for `host`, connecting on first use.
    ///
    /// The lock is held across the connect so two callers racing for the same
    /// host cannot open duplicate connections.
    pub async fn obtain_client(&self, host: &str) -> Result<Arc<C::Api>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(host) {
            return Ok(client.clone());
        }

        if !self.connector.is_connected(host) {
            return Err(SyncError::NotConnected {
                host: host.to_string(),
            });
        }

        debug!(host = %host, "opening connection");
        let client = Arc::new(self.connector.connect(host).await?);
        clients.insert(host.to_string(), client.clone());
        info!(host = %host, "connected");
        Ok(client)
    }

    /// Forget the memoized client for `host`; the next `obtain_client` reconnects.
    pub async fn invalidate(&self, host: &str) {
        if self.clients.lock().await.remove(host).is_some() {
            debug!(host = %host, "dropped memoized connection");
        }
    }

    pub async fn has_client(&self, host: &str) -> bool {
        self.clients.lock().await.contains_key(host)
    }
}
