//! Snapshot Loader: one bounded bulk fetch of the host's sessions.

use tracing::debug;

use crate::error::Result;
use crate::model::WorkspaceSession;
use crate::provider::{GetSessionsOptions, WorkspaceApi};

/// Default cap on the number of sessions fetched per cycle.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 20;

/// Fetch up to `limit` sessions in relevance order, dropping records that have
/// no instance yet.
pub async fn load_snapshot<A: WorkspaceApi>(api: &A, limit: usize) -> Result<Vec<WorkspaceSession>> {
    let records = api.get_sessions(GetSessionsOptions { limit }).await?;
    let fetched = records.len();
    let sessions: Vec<WorkspaceSession> = records
        .into_iter()
        .take(limit)
        .filter_map(|record| record.into_session())
        .collect();
    debug!(
        fetched,
        visible = sessions.len(),
        limit,
        "loaded session snapshot"
    );
    Ok(sessions)
}
