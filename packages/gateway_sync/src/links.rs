//! Browser links into the host's dashboard.

/// Referrer tag the dashboard uses to hand a new workspace back to the gateway.
const GATEWAY_REFERRER: &str = "jetbrains-gateway";

pub fn dashboard_url(host: &str) -> String {
    format!("https://{host}")
}

/// Dashboard link that creates a workspace for `context_url`. `None` when the
/// context is blank.
pub fn new_workspace_url(host: &str, context_url: &str) -> Option<String> {
    let context = context_url.trim();
    if context.is_empty() {
        return None;
    }
    Some(format!("https://{host}#referrer:{GATEWAY_REFERRER}/{context}"))
}
