//! JSON-RPC 2.0 framing and the server's workspace shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use workspace_sync::{InstanceState, Phase, RecencyMarker, SessionRecord, UpdateEvent};

pub const METHOD_GET_WORKSPACES: &str = "getWorkspaces";
pub const METHOD_INSTANCE_UPDATE: &str = "onInstanceUpdate";

// =============================================================================
// Framing
// =============================================================================

#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

/// Any frame the server can send, before classification.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Debug, PartialEq)]
pub enum Inbound {
    Response {
        id: u64,
        result: Result<Value, ErrorObject>,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// Server-to-client requests and frames we cannot correlate.
    Ignored,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Inbound, serde_json::Error> {
        let frame: RawFrame = serde_json::from_str(text)?;
        Ok(match (frame.method, frame.id) {
            (Some(method), None) => Inbound::Notification {
                method,
                params: frame.params.unwrap_or(Value::Null),
            },
            (None, Some(id)) => match id.as_u64() {
                Some(id) => Inbound::Response {
                    id,
                    result: match frame.error {
                        Some(err) => Err(err),
                        None => Ok(frame.result.unwrap_or(Value::Null)),
                    },
                },
                None => Inbound::Ignored,
            },
            _ => Inbound::Ignored,
        })
    }
}

// =============================================================================
// Workspace shapes
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub workspace: Workspace,
    #[serde(default)]
    pub latest_instance: Option<WorkspaceInstance>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Workspace {
    pub id: String,
    #[serde(default)]
    pub context: WorkspaceContext,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkspaceContext {
    #[serde(rename = "normalizedContextURL", default)]
    pub normalized_context_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInstance {
    pub id: String,
    pub workspace_id: String,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub ide_url: String,
    pub status: InstanceStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceStatus {
    pub phase: Phase,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub conditions: InstanceConditions,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstanceConditions {
    #[serde(default)]
    pub failed: Option<String>,
}

impl WorkspaceInstance {
    /// The instance's state, or `None` when the status carries no version and
    /// so cannot be ordered against other observations.
    pub fn to_state(&self) -> Option<InstanceState> {
        let Some(version) = self.status.version else {
            warn!(
                instance = %self.id,
                workspace = %self.workspace_id,
                "instance status without version dropped"
            );
            return None;
        };
        Some(InstanceState {
            phase: self.status.phase,
            failure: self.status.conditions.failed.clone(),
            ide_url: self.ide_url.clone(),
            recency: RecencyMarker {
                instance_id: self.id.clone(),
                created_at: self.creation_time,
                version,
            },
        })
    }

    pub fn into_update(self) -> Option<UpdateEvent> {
        let state = self.to_state()?;
        Some(UpdateEvent {
            session_id: self.workspace_id,
            state,
        })
    }
}

impl From<WorkspaceInfo> for SessionRecord {
    fn from(info: WorkspaceInfo) -> Self {
        SessionRecord {
            latest_instance: info
                .latest_instance
                .as_ref()
                .and_then(WorkspaceInstance::to_state),
            id: info.workspace.id,
            context_url: info.workspace.context.normalized_context_url,
        }
    }
}

/// Extract the instance carried by an `onInstanceUpdate` notification.
/// Params arrive either positionally (`[instance]`) or bare.
pub fn instance_update(params: Value) -> Result<WorkspaceInstance, serde_json::Error> {
    let payload = match params {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    serde_json::from_value(payload)
}
