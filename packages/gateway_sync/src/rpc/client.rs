//! Websocket JSON-RPC connection to a workspace host.
//!
//! One socket per host. A single task owns the socket: it writes queued
//! requests, routes responses to their waiting callers, and fans
//! `onInstanceUpdate` notifications out to subscribers. When the socket ends
//! for any reason every pending request fails and every subscription ends
//! with `SubscriptionBroken`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    http::{
        HeaderValue,
        header::{AUTHORIZATION, ORIGIN},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use workspace_sync::{
    Connector, GetSessionsOptions, Selector, SessionRecord, SyncError, UpdateEvent, UpdateFeed,
    WorkspaceApi,
};

use super::RpcError;
use super::protocol::{
    Inbound, METHOD_GET_WORKSPACES, METHOD_INSTANCE_UPDATE, Request, WorkspaceInfo,
    instance_update,
};

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

/// Capacity of the notification fan-out. A subscriber that falls further
/// behind than this is treated as broken and must resync.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Where and how to reach a host.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub host: String,
    pub token: String,
    pub tls: bool,
    pub request_timeout: Duration,
}

impl Endpoint {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}/api/v1", self.host)
    }

    pub fn origin(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }
}

/// State shared between the connection handle and its socket task.
struct Shared {
    pending: Mutex<PendingMap>,
    updates: broadcast::Sender<UpdateEvent>,
    closed: CancellationToken,
    close_reason: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            pending: Mutex::new(HashMap::new()),
            updates,
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
        }
    }

    /// Park a waiter for response `id`. Checked under the pending lock:
    /// `close` cancels before draining, so a waiter is either drained or refused.
    fn register(
        &self,
        id: u64,
    ) -> Result<oneshot::Receiver<Result<Value, RpcError>>, RpcError> {
        let mut pending = self.pending();
        if self.closed.is_cancelled() {
            drop(pending);
            return Err(RpcError::Closed(self.close_reason()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close_reason(&self) -> String {
        self.close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "connection closed".to_string())
    }

    fn dispatch(&self, text: &str) {
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "unparseable frame from server");
                return;
            }
        };
        match inbound {
            Inbound::Response { id, result } => {
                let Some(waiter) = self.pending().remove(&id) else {
                    debug!(id, "response for unknown or expired request");
                    return;
                };
                let _ = waiter.send(result.map_err(|e| RpcError::Remote {
                    code: e.code,
                    message: e.message,
                }));
            }
            Inbound::Notification { method, params } if method == METHOD_INSTANCE_UPDATE => {
                match instance_update(params) {
                    // No receivers just means nobody is subscribed right now.
                    Ok(instance) => {
                        if let Some(event) = instance.into_update() {
                            let _ = self.updates.send(event);
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed instance update"),
                }
            }
            Inbound::Notification { method, .. } => {
                debug!(method = %method, "ignoring notification");
            }
            Inbound::Ignored => {}
        }
    }

    fn close(&self, reason: String) {
        {
            let mut slot = self.close_reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(reason.clone());
            }
        }
        self.closed.cancel();
        let waiters: Vec<_> = self.pending().drain().map(|(_, tx)| tx).collect();
        for tx in waiters {
            let _ = tx.send(Err(RpcError::Closed(reason.clone())));
        }
    }
}

/// A live JSON-RPC connection. Dropping the last handle closes the socket.
pub struct RpcConnection {
    host: String,
    outbound: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl RpcConnection {
    /// Open the websocket and start the socket task.
    pub async fn open(endpoint: &Endpoint) -> Result<Self, RpcError> {
        let mut request = endpoint
            .url()
            .into_client_request()
            .map_err(RpcError::from_tungstenite)?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", endpoint.token))
                .map_err(|e| RpcError::Other(e.into()))?,
        );
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(&endpoint.origin()).map_err(|e| RpcError::Other(e.into()))?,
        );

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(RpcError::from_tungstenite)?;
        info!(host = %endpoint.host, "websocket connected");

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let shared = Arc::new(Shared::new());
        let shutdown = CancellationToken::new();

        tokio::spawn(run_socket(
            ws_stream,
            outbound_rx,
            shared.clone(),
            shutdown.clone(),
            endpoint.host.clone(),
        ));

        Ok(Self {
            host: endpoint.host.clone(),
            outbound: outbound_tx,
            shared,
            next_id: AtomicU64::new(1),
            request_timeout: endpoint.request_timeout,
            shutdown,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Send a request and wait for its response, bounded by the request timeout.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed(self.shared.close_reason()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&Request::new(id, method, params))
            .map_err(|e| RpcError::Other(e.into()))?;
        let rx = self.shared.register(id)?;
        if self.outbound.send(Message::Text(text.into())).await.is_err() {
            self.shared.pending().remove(&id);
            return Err(RpcError::Closed(self.shared.close_reason()));
        }
        debug!(id, method, "request sent");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Closed(self.shared.close_reason())),
            Err(_) => {
                self.shared.pending().remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    after: self.request_timeout,
                })
            }
        }
    }

    /// Fetch up to `limit` workspaces, most recent first.
    pub async fn get_workspaces(&self, limit: usize) -> Result<Vec<WorkspaceInfo>, RpcError> {
        let result = self
            .request(METHOD_GET_WORKSPACES, json!([{ "limit": limit }]))
            .await?;
        serde_json::from_value(result).map_err(|e| RpcError::Other(e.into()))
    }

    /// Stream of instance updates matching `selector`.
    pub fn updates(&self, selector: Selector) -> UpdateFeed {
        update_feed(
            self.shared.updates.subscribe(),
            self.shared.clone(),
            selector,
        )
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        debug!(host = %self.host, "releasing connection");
        self.shutdown.cancel();
    }
}

impl WorkspaceApi for RpcConnection {
    async fn get_sessions(&self, options: GetSessionsOptions) -> workspace_sync::Result<Vec<SessionRecord>> {
        let infos = self
            .get_workspaces(options.limit)
            .await
            .map_err(|e| SyncError::SnapshotFetch(e.to_string()))?;
        Ok(infos.into_iter().map(SessionRecord::from).collect())
    }

    async fn subscribe_updates(&self, selector: &Selector) -> workspace_sync::Result<UpdateFeed> {
        if self.is_closed() {
            return Err(SyncError::SubscriptionBroken(self.shared.close_reason()));
        }
        Ok(self.updates(selector.clone()))
    }
}

struct FeedState {
    rx: broadcast::Receiver<UpdateEvent>,
    shared: Arc<Shared>,
    selector: Selector,
}

fn update_feed(
    rx: broadcast::Receiver<UpdateEvent>,
    shared: Arc<Shared>,
    selector: Selector,
) -> UpdateFeed {
    let state = FeedState {
        rx,
        shared,
        selector,
    };
    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            tokio::select! {
                biased;
                msg = state.rx.recv() => match msg {
                    Ok(event) if state.selector.matches(&event.session_id) => {
                        return Some((Ok(event), Some(state)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "update subscriber lagged; resync required");
                        let err = SyncError::SubscriptionBroken(format!("missed {n} updates"));
                        return Some((Err(err), None));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let err = SyncError::SubscriptionBroken(state.shared.close_reason());
                        return Some((Err(err), None));
                    }
                },
                _ = state.shared.closed.cancelled() => {
                    let err = SyncError::SubscriptionBroken(state.shared.close_reason());
                    return Some((Err(err), None));
                }
            }
        }
    })
    .boxed()
}

async fn run_socket(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut outbound: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    host: String,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_write.send(Message::Close(None)).await;
                break "connection released".to_string();
            }

            Some(msg) = outbound.recv() => {
                if let Err(e) = ws_write.send(msg).await {
                    break format!("write failed: {e}");
                }
            }

            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => {
                            format!("closed by server: {} {}", u16::from(frame.code), &*frame.reason)
                        }
                        None => "closed by server".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("read failed: {e}"),
                None => break "stream ended".to_string(),
            }
        }
    };

    info!(host = %host, reason = %reason, "websocket disconnected");
    shared.close(reason);
}

/// [`Connector`] backed by [`RpcConnection`]. A host counts as connected when
/// a token is configured.
pub struct RpcConnector {
    token: Option<String>,
    tls: bool,
    request_timeout: Duration,
}

impl RpcConnector {
    pub fn new(token: Option<String>, tls: bool, request_timeout: Duration) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
            tls,
            request_timeout,
        }
    }

    fn endpoint(&self, host: &str, token: &str) -> Endpoint {
        Endpoint {
            host: host.to_string(),
            token: token.to_string(),
            tls: self.tls,
            request_timeout: self.request_timeout,
        }
    }
}

impl Connector for RpcConnector {
    type Api = RpcConnection;

    fn is_connected(&self, _host: &str) -> bool {
        self.token.is_some()
    }

    async fn connect(&self, host: &str) -> workspace_sync::Result<RpcConnection> {
        let Some(token) = self.token.as_deref() else {
            return Err(SyncError::NotConnected {
                host: host.to_string(),
            });
        };
        RpcConnection::open(&self.endpoint(host, token))
            .await
            .map_err(|e| SyncError::Connectivity {
                host: host.to_string(),
                reason: e.to_string(),
            })
    }
}

impl RpcError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            return Self::Unavailable;
        }
        match err {
            tungstenite::Error::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
            },
            other => Self::Other(other.into()),
        }
    }
}
