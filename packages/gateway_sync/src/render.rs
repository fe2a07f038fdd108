//! Plain-text and JSON views of the session table.

use serde::Serialize;
use std::fmt::Write;

use workspace_sync::{ConnectAction, Phase, PresentationCategory, SyncState, WorkspaceSession};

fn marker(category: PresentationCategory) -> char {
    match category {
        PresentationCategory::Connectable => '●',
        PresentationCategory::Transitioning => '◐',
        PresentationCategory::StoppedOk => '○',
        PresentationCategory::StoppedFailed => '✗',
    }
}

/// One line per session, plus an indented line for any failure detail.
pub fn render_table<'a>(sessions: impl IntoIterator<Item = &'a WorkspaceSession>) -> String {
    let mut out = String::new();
    let mut count = 0;
    for session in sessions {
        if count == 0 {
            let _ = writeln!(
                out,
                "  {:<28} {:<9} {:<13} {}",
                "WORKSPACE", "STATUS", "PHASE", "CONTEXT"
            );
            let _ = writeln!(out, "{}", "-".repeat(90));
        }
        count += 1;
        let category = session.category();
        let _ = writeln!(
            out,
            "{} {:<28} {:<9} {:<13} {}",
            marker(category),
            session.id,
            category.label(),
            session.latest.phase,
            session.context_url
        );
        if let Some(failure) = session.latest.failure() {
            let _ = writeln!(out, "  └ {failure}");
        }
    }
    if count == 0 {
        out.push_str("No workspaces.\n");
    } else {
        let _ = writeln!(out, "\n{count} workspace(s)");
    }
    out
}

pub fn state_line(state: SyncState, host: &str) -> String {
    let what = match state {
        SyncState::Idle => "idle",
        SyncState::Connecting => "connecting",
        SyncState::Syncing => "loading workspaces",
        SyncState::Live => "live",
        SyncState::Disposed => "stopped",
    };
    format!("[{host}: {what}]")
}

/// Machine-readable row for `list --json`.
#[derive(Debug, Serialize)]
pub struct SessionRow<'a> {
    pub id: &'a str,
    pub context_url: &'a str,
    pub phase: Phase,
    pub category: PresentationCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<&'a str>,
    pub ide_url: &'a str,
    pub action: ConnectAction,
}

pub fn rows<'a>(
    sessions: impl IntoIterator<Item = &'a WorkspaceSession>,
    host: &str,
) -> Vec<SessionRow<'a>> {
    sessions
        .into_iter()
        .map(|s| SessionRow {
            id: &s.id,
            context_url: &s.context_url,
            phase: s.latest.phase,
            category: s.category(),
            failure: s.latest.failure(),
            ide_url: &s.latest.ide_url,
            action: s.connect_action(host),
        })
        .collect()
}
