//! Host records and the directory the client looks them up in.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::HostId;

/// How the remote side reaches a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Ssh,
    /// A local helper process that bridges to the device.
    Telecom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    #[default]
    Password,
    Key,
    Agent,
    KeyboardInteractive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    /// Stored password, used when no session password has been entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

/// Whether file transfer reuses the terminal connection's credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    #[default]
    Connection,
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub credentials: CredentialMode,
    /// Only meaningful with [`CredentialMode::Custom`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A configured host as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub driver: Driver,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sftp: SftpConfig,
}

fn default_port() -> u16 {
    22
}

impl HostRecord {
    pub fn uses_password_auth(&self) -> bool {
        self.auth.method == AuthMethod::Password
    }

    /// Whether a transfer's password error can be answered with the connection password.
    pub fn connection_password_reusable_for_sftp(&self) -> bool {
        self.sftp.credentials == CredentialMode::Connection && self.uses_password_auth()
    }

    pub fn custom_sftp_password(&self) -> Option<&str> {
        match self.sftp.credentials {
            CredentialMode::Custom => self.sftp.password.as_deref().filter(|p| !p.is_empty()),
            CredentialMode::Connection => None,
        }
    }

    pub fn stored_password(&self) -> Option<&str> {
        self.auth.password.as_deref().filter(|p| !p.is_empty())
    }
}

/// Lookup and write-back surface of the host configuration store.
///
/// The store itself (CRUD, persistence) lives outside this crate; the client
/// only reads records and reports trust/password outcomes back.
pub trait HostDirectory: Send + Sync {
    fn host(&self, id: HostId) -> Option<HostRecord>;

    fn hosts(&self) -> Vec<HostRecord>;

    /// A host key was accepted for this host.
    fn host_trusted(&self, _id: HostId, _fingerprint: Option<&str>) {}

    /// The user entered a password for this host.
    fn remember_password(&self, _id: HostId, _password: &str) {}
}

/// In-memory directory built from a fixed list of records.
#[derive(Debug, Default)]
pub struct StaticHosts {
    records: RwLock<BTreeMap<HostId, HostRecord>>,
}

impl StaticHosts {
    pub fn new(records: impl IntoIterator<Item = HostRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }

    /// Resolve a host by numeric id or by name (case-insensitive).
    pub fn find(&self, needle: &str) -> Option<HostRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = needle.parse::<u32>().ok().and_then(|id| records.get(&HostId(id))) {
            return Some(record.clone());
        }
        records
            .values()
            .find(|r| r.name.eq_ignore_ascii_case(needle))
            .cloned()
    }
}

impl HostDirectory for StaticHosts {
    fn host(&self, id: HostId) -> Option<HostRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn hosts(&self) -> Vec<HostRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn host_trusted(&self, id: HostId, fingerprint: Option<&str>) {
        debug!(host = %id, ?fingerprint, "host key trusted");
    }

    fn remember_password(&self, id: HostId, password: &str) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = records.get_mut(&id) {
            record.auth.password = Some(password.to_string());
        }
    }
}

#[cfg(test)]
pub(crate) fn test_host(id: u32) -> HostRecord {
    HostRecord {
        id: HostId(id),
        name: format!("host-{id}"),
        address: "10.0.0.1".into(),
        port: 22,
        user: "root".into(),
        driver: Driver::Ssh,
        auth: AuthConfig::default(),
        sftp: SftpConfig {
            enabled: true,
            ..Default::default()
        },
    }
}
