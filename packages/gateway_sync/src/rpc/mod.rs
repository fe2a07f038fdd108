//! JSON-RPC client for the workspace host API.

mod client;
mod protocol;

use std::time::Duration;

pub use client::RpcConnector;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("handshake rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("connection closed: {0}")]
    Closed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
