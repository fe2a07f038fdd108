//! Session and instance-state types.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Runtime phase of a workspace instance. The set is closed; unrecognised
/// wire values map to `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Unknown,
    Preparing,
    Building,
    Pending,
    Creating,
    Initializing,
    Running,
    Interrupted,
    Stopping,
    Stopped,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::Unknown,
        Phase::Preparing,
        Phase::Building,
        Phase::Pending,
        Phase::Creating,
        Phase::Initializing,
        Phase::Running,
        Phase::Interrupted,
        Phase::Stopping,
        Phase::Stopped,
    ];

    pub fn parse(s: &str) -> Phase {
        match s {
            "preparing" => Phase::Preparing,
            "building" => Phase::Building,
            "pending" => Phase::Pending,
            "creating" => Phase::Creating,
            "initializing" => Phase::Initializing,
            "running" => Phase::Running,
            "interrupted" => Phase::Interrupted,
            "stopping" => Phase::Stopping,
            "stopped" => Phase::Stopped,
            _ => Phase::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Unknown => "unknown",
            Phase::Preparing => "preparing",
            Phase::Building => "building",
            Phase::Pending => "pending",
            Phase::Creating => "creating",
            Phase::Initializing => "initializing",
            Phase::Running => "running",
            Phase::Interrupted => "interrupted",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Phase::parse(&s))
    }
}

/// How a session is presented to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationCategory {
    Connectable,
    StoppedOk,
    StoppedFailed,
    Transitioning,
}

impl PresentationCategory {
    /// Whether the IDE can attach directly (starting instances are attachable
    /// and the gateway waits for them).
    pub fn can_connect(self) -> bool {
        matches!(
            self,
            PresentationCategory::Connectable | PresentationCategory::Transitioning
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            PresentationCategory::Connectable => "running",
            PresentationCategory::StoppedOk => "stopped",
            PresentationCategory::StoppedFailed => "failed",
            PresentationCategory::Transitioning => "starting",
        }
    }
}

/// Ordering information attached to every instance state by the remote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyMarker {
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
    /// Status version, increasing over the life of one instance.
    pub version: u64,
}

impl RecencyMarker {
    /// Total order over markers, keyed on `(created_at, version)`.
    ///
    /// Every status of one instance shares its creation time, so versions
    /// decide within an instance and a later-created instance supersedes an
    /// earlier one. Distinct instances created at the same instant fall back
    /// to their versions.
    pub fn compare(&self, other: &RecencyMarker) -> Ordering {
        (self.created_at, self.version).cmp(&(other.created_at, other.version))
    }

    pub fn is_newer_than(&self, other: &RecencyMarker) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

/// Latest observed runtime status of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub ide_url: String,
    pub recency: RecencyMarker,
}

impl InstanceState {
    /// Failure detail, with blank strings treated as absent.
    pub fn failure(&self) -> Option<&str> {
        self.failure
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    pub fn category(&self) -> PresentationCategory {
        match self.phase {
            Phase::Running => PresentationCategory::Connectable,
            Phase::Stopped if self.failure().is_some() => PresentationCategory::StoppedFailed,
            Phase::Stopped => PresentationCategory::StoppedOk,
            Phase::Interrupted | Phase::Unknown => PresentationCategory::StoppedFailed,
            Phase::Preparing
            | Phase::Building
            | Phase::Pending
            | Phase::Creating
            | Phase::Initializing
            | Phase::Stopping => PresentationCategory::Transitioning,
        }
    }
}

/// A remote workspace session visible in the table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSession {
    pub id: String,
    pub context_url: String,
    pub latest: InstanceState,
}

/// What the UI should do when the user picks a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectAction {
    /// Hand the session to the IDE gateway.
    Gateway { host: String, session_id: String },
    /// Open the IDE URL in a browser instead.
    Browser { url: String },
}

impl WorkspaceSession {
    pub fn category(&self) -> PresentationCategory {
        self.latest.category()
    }

    pub fn connect_action(&self, host: &str) -> ConnectAction {
        if self.category().can_connect() {
            ConnectAction::Gateway {
                host: host.to_string(),
                session_id: self.id.clone(),
            }
        } else {
            ConnectAction::Browser {
                url: self.latest.ide_url.clone(),
            }
        }
    }
}

/// A session as returned by the bulk fetch, before filtering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub context_url: String,
    #[serde(default)]
    pub latest_instance: Option<InstanceState>,
}

impl SessionRecord {
    /// Only sessions with an instance are visible.
    pub fn into_session(self) -> Option<WorkspaceSession> {
        let latest = self.latest_instance?;
        Some(WorkspaceSession {
            id: self.id,
            context_url: self.context_url,
            latest,
        })
    }
}

/// An incremental change to one session's instance state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub session_id: String,
    pub state: InstanceState,
}

/// Which sessions a subscription covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    All,
    Session(String),
}

impl Selector {
    pub fn parse(s: &str) -> Selector {
        match s {
            "*" => Selector::All,
            id => Selector::Session(id.to_string()),
        }
    }

    pub fn matches(&self, session_id: &str) -> bool {
        match self {
            Selector::All => true,
            Selector::Session(id) => id == session_id,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => f.write_str("*"),
            Selector::Session(id) => f.write_str(id),
        }
    }
}
