use async_trait::async_trait;

use crate::host::HostRecord;
use crate::protocol::{ConnectionState, HostId, TabKey};

/// Everything the user is asked about an unrecognized host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRequest {
    pub host: HostId,
    pub host_name: String,
    pub host_port: Option<String>,
    pub fingerprint: Option<String>,
    /// True when the host presented a different key than the recorded one.
    pub mismatch: bool,
}

/// Events for the UI layer. Delivery is fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    StateChanged {
        key: TabKey,
        state: ConnectionState,
    },
    TabsChanged {
        host: HostId,
    },
    ActiveChanged {
        active: Option<TabKey>,
    },
    ListingChanged {
        host: HostId,
    },
    Failed {
        operation: &'static str,
        message: String,
    },
}

/// The user-facing side of the client: dialogs and notifications.
#[async_trait]
pub trait Frontend: Send + Sync {
    /// Ask whether to trust a host key. `false` means rejected.
    async fn confirm_trust(&self, request: &TrustRequest) -> bool;

    /// Ask for a connection password. `None` means cancelled.
    async fn request_password(&self, host: &HostRecord) -> Option<String>;

    fn notify(&self, notice: Notice);
}
