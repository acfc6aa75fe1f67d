use anyhow::{Context, Result};
use pterm_client::{ClientConfig, DrainLimits, HostRecord, PollIntervals, TransferConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [client]
//                    input_batch_ms = 8
//
//   env var:         PTERM_CLIENT__INPUT_BATCH_MS=8   (double underscore = nesting)
//
//   (single underscore stays within field names: PTERM_TRANSFER__CHUNK_KIB)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub bridge: BridgeFileConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
    #[serde(default)]
    pub transfer: TransferFileConfig,
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
}

/// Where the remote side listens (lives under `[bridge]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeFileConfig {
    #[serde(default = "default_bridge_url")]
    pub url: String,
}

impl Default for BridgeFileConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
        }
    }
}

/// Session tuning knobs (lives under `[client]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientFileConfig {
    #[serde(default = "default_input_batch_ms")]
    pub input_batch_ms: u64,
    #[serde(default = "default_drain_max_bytes")]
    pub drain_max_bytes: usize,
    #[serde(default = "default_drain_max_ms")]
    pub drain_max_ms: u64,
    #[serde(default = "default_poll_reconnecting_ms")]
    pub poll_reconnecting_ms: u64,
    #[serde(default = "default_poll_connected_ms")]
    pub poll_connected_ms: u64,
    #[serde(default = "default_poll_idle_ms")]
    pub poll_idle_ms: u64,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            input_batch_ms: default_input_batch_ms(),
            drain_max_bytes: default_drain_max_bytes(),
            drain_max_ms: default_drain_max_ms(),
            poll_reconnecting_ms: default_poll_reconnecting_ms(),
            poll_connected_ms: default_poll_connected_ms(),
            poll_idle_ms: default_poll_idle_ms(),
        }
    }
}

/// File transfer knobs (lives under `[transfer]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferFileConfig {
    #[serde(default = "default_chunk_kib")]
    pub chunk_kib: usize,
    #[serde(default = "default_read_limit_kib")]
    pub read_limit_kib: usize,
}

impl Default for TransferFileConfig {
    fn default() -> Self {
        Self {
            chunk_kib: default_chunk_kib(),
            read_limit_kib: default_read_limit_kib(),
        }
    }
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:7681/ws".to_string()
}
fn default_input_batch_ms() -> u64 {
    4
}
fn default_drain_max_bytes() -> usize {
    96 * 1024
}
fn default_drain_max_ms() -> u64 {
    8
}
fn default_poll_reconnecting_ms() -> u64 {
    300
}
fn default_poll_connected_ms() -> u64 {
    1200
}
fn default_poll_idle_ms() -> u64 {
    2500
}
fn default_chunk_kib() -> usize {
    256
}
fn default_read_limit_kib() -> usize {
    2048
}

impl ClientFileConfig {
    /// Runtime view. Zero limits fall back to the defaults.
    pub fn to_runtime(&self) -> ClientConfig {
        let nonzero = |v: u64, fallback: u64| if v == 0 { fallback } else { v };
        ClientConfig {
            input_batch: Duration::from_millis(self.input_batch_ms),
            drain: DrainLimits {
                max_bytes: if self.drain_max_bytes == 0 {
                    default_drain_max_bytes()
                } else {
                    self.drain_max_bytes
                },
                max_duration: Duration::from_millis(nonzero(
                    self.drain_max_ms,
                    default_drain_max_ms(),
                )),
            },
            poll: PollIntervals {
                reconnecting: Duration::from_millis(nonzero(
                    self.poll_reconnecting_ms,
                    default_poll_reconnecting_ms(),
                )),
                connected: Duration::from_millis(nonzero(
                    self.poll_connected_ms,
                    default_poll_connected_ms(),
                )),
                idle: Duration::from_millis(nonzero(self.poll_idle_ms, default_poll_idle_ms())),
            },
            ..ClientConfig::default()
        }
    }
}

impl TransferFileConfig {
    pub fn to_runtime(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.chunk_kib.max(1) * 1024,
            read_limit: self.read_limit_kib.max(1) * 1024,
        }
    }
}

/// Build a figment that layers: defaults → config.toml → PTERM_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PTERM_BRIDGE__URL=ws://10.0.0.5:7681/ws`  →  `bridge.url = "ws://10.0.0.5:7681/ws"`
///   `PTERM_TRANSFER__CHUNK_KIB=64`  →  `transfer.chunk_kib = 64`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PTERM_").split("__"))
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct PtermDirs {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl PtermDirs {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".pterm"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, logs_dir })
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("pterm.log")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pterm_client::HostId;
    use pterm_client::host::{AuthMethod, CredentialMode};

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_client_file_config_defaults_match_runtime_defaults() {
        let rt = ClientFileConfig::default().to_runtime();
        assert_eq!(rt, ClientConfig::default());
    }

    #[test]
    fn test_transfer_file_config_defaults() {
        let rt = TransferFileConfig::default().to_runtime();
        assert_eq!(rt.chunk_size, 256 * 1024);
        assert_eq!(rt.read_limit, 2 * 1024 * 1024);
    }

    #[test]
    fn test_zero_limits_fall_back() {
        let fc = ClientFileConfig {
            input_batch_ms: 0,
            drain_max_bytes: 0,
            drain_max_ms: 0,
            poll_reconnecting_ms: 0,
            poll_connected_ms: 0,
            poll_idle_ms: 0,
        };
        let rt = fc.to_runtime();
        assert_eq!(rt.input_batch, Duration::ZERO);
        assert_eq!(rt.drain, DrainLimits::default());
        assert_eq!(rt.poll, PollIntervals::default());
    }

    // ── PtermDirs ───────────────────────────────────────────────────────

    #[test]
    fn test_dirs_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = PtermDirs::new(Some(tmp.path().to_path_buf())).unwrap();

        assert_eq!(dirs.data_dir, tmp.path());
        assert_eq!(dirs.logs_dir, tmp.path().join("logs"));
        assert!(tmp.path().join("logs").exists());
        assert_eq!(dirs.log_path(), tmp.path().join("logs/pterm.log"));
        assert_eq!(dirs.config_toml_path(), tmp.path().join("config.toml"));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.bridge.url, default_bridge_url());
        assert_eq!(fc.client.input_batch_ms, 4);
        assert!(fc.hosts.is_empty());
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[client]\npoll_connected_ms = 2000\n\n[transfer]\nchunk_kib = 64\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.client.poll_connected_ms, 2000);
        assert_eq!(fc.client.poll_idle_ms, 2500);
        assert_eq!(fc.transfer.to_runtime().chunk_size, 64 * 1024);
    }

    #[test]
    fn test_load_config_hosts() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            r#"
[[hosts]]
id = 1
name = "router"
address = "10.0.0.1"
user = "admin"

[hosts.auth]
method = "key"
key_path = "~/.ssh/id_ed25519"

[[hosts]]
id = 2
name = "nas"
address = "10.0.0.2"
port = 2222

[hosts.sftp]
enabled = true
credentials = "custom"
user = "files"
"#,
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.hosts.len(), 2);
        assert_eq!(fc.hosts[0].id, HostId(1));
        assert_eq!(fc.hosts[0].port, 22);
        assert_eq!(fc.hosts[0].auth.method, AuthMethod::Key);
        assert_eq!(fc.hosts[1].port, 2222);
        assert_eq!(fc.hosts[1].auth.method, AuthMethod::Password);
        assert_eq!(fc.hosts[1].sftp.credentials, CredentialMode::Custom);
    }
}
