//! Session-lifetime password cache.
//!
//! Passwords entered at a prompt live here for the life of the process and
//! take precedence over whatever the host record stores.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::host::HostRecord;
use crate::protocol::HostId;

#[derive(Debug, Default)]
pub struct CredentialCache {
    inner: Mutex<Cached>,
}

#[derive(Debug, Default)]
struct Cached {
    connection: HashMap<HostId, String>,
    sftp: HashMap<HostId, String>,
}

/// Credentials attached to one transfer request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferCredentials {
    pub password: Option<String>,
    pub sftp_password: Option<String>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cached> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_password(&self, host: HostId, password: String) {
        if password.is_empty() {
            return;
        }
        self.lock().connection.insert(host, password);
    }

    pub fn set_sftp_password(&self, host: HostId, password: String) {
        if password.is_empty() {
            return;
        }
        self.lock().sftp.insert(host, password);
    }

    pub fn cached_password(&self, host: HostId) -> Option<String> {
        self.lock().connection.get(&host).cloned()
    }

    /// Drop the cached password if it is the one the remote side just
    /// rejected. A password entered since then is kept.
    pub fn evict_rejected(&self, host: HostId, rejected: &str) -> bool {
        let mut cached = self.lock();
        if cached.connection.get(&host).map(String::as_str) != Some(rejected) {
            return false;
        }
        cached.connection.remove(&host);
        cached.sftp.remove(&host);
        true
    }

    pub fn forget_all(&self) {
        let mut cached = self.lock();
        cached.connection.clear();
        cached.sftp.clear();
    }

    /// The password to send with a `select`: cached, else stored.
    pub fn connection_password(&self, host: &HostRecord) -> Option<String> {
        self.cached_password(host.id)
            .or_else(|| host.stored_password().map(str::to_string))
    }

    /// Credentials for a transfer request.
    ///
    /// Custom mode sends only the custom password. Connection mode sends the
    /// connection password under both fields so either side of the remote
    /// lookup finds it.
    pub fn transfer_credentials(&self, host: &HostRecord) -> TransferCredentials {
        if let Some(custom) = host.custom_sftp_password() {
            return TransferCredentials {
                password: None,
                sftp_password: Some(custom.to_string()),
            };
        }
        let cached_sftp = self.lock().sftp.get(&host.id).cloned();
        let connection = self.connection_password(host);
        TransferCredentials {
            sftp_password: cached_sftp.or_else(|| connection.clone()),
            password: connection,
        }
    }
}
