use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use workspace_sync::{Selector, SyncOptions};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [sync]
//                    snapshot_limit = 50
//
//   env var:         GATEWAY_SYNC__SNAPSHOT_LIMIT=50   (double underscore = nesting)
//
//   (single underscore stays within field names: GATEWAY_TRANSPORT__REQUEST_TIMEOUT_SECS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Access token for `host`. Absent or blank means "not connected".
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub sync: SyncFileConfig,
    #[serde(default)]
    pub transport: TransportFileConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            token: None,
            sync: SyncFileConfig::default(),
            transport: TransportFileConfig::default(),
        }
    }
}

/// Sync tunables (lives under `[sync]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncFileConfig {
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
    /// `*` for every workspace, or a single workspace id.
    #[serde(default = "default_selector")]
    pub selector: String,
}

impl Default for SyncFileConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: default_snapshot_limit(),
            selector: default_selector(),
        }
    }
}

/// Transport tunables (lives under `[transport]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportFileConfig {
    /// Use `wss://` (default) or plain `ws://`.
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TransportFileConfig {
    fn default() -> Self {
        Self {
            tls: default_tls(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "gitpod.io".to_string()
}
fn default_snapshot_limit() -> usize {
    workspace_sync::DEFAULT_SNAPSHOT_LIMIT
}
fn default_selector() -> String {
    "*".to_string()
}
fn default_tls() -> bool {
    true
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl FileConfig {
    /// The token, with blank values treated as absent.
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            host: self.host.clone(),
            snapshot_limit: self.sync.snapshot_limit,
            selector: Selector::parse(self.sync.selector.trim()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.request_timeout_secs)
    }
}

/// Build a figment that layers: defaults → config.toml → GATEWAY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `GATEWAY_TOKEN=...`  →  `token = "..."`
///   `GATEWAY_TRANSPORT__TLS=false`  →  `transport.tls = false`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("GATEWAY_").split("__"))
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub data_dir: PathBuf,
}

impl GatewayConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".gateway-sync"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Resolve the layered file config, applying a CLI host override last.
    pub fn load(&self, host_override: Option<&str>) -> Result<FileConfig> {
        let mut fc: FileConfig = load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_toml_path()))?;
        if let Some(host) = host_override {
            fc.host = host.to_string();
        }
        Ok(fc)
    }
}
