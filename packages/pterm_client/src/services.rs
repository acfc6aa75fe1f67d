//! Shared collaborators plus the trust and password flows.
//!
//! Both the client actor and the transfer client resolve credential errors
//! through [`Services`], so a host never has two dialogs of the same kind
//! open at once no matter which path hit the error.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::credentials::CredentialCache;
use crate::error::{ErrorCode, RemoteError};
use crate::frontend::{Frontend, Notice, TrustRequest};
use crate::host::{HostDirectory, HostRecord};
use crate::interaction::{Interactions, Outcome, PromptKind, Resolution};
use crate::protocol::{Op, Request};
use crate::transport::{Transport, TransportExt};

#[derive(Clone)]
pub struct Services {
    pub transport: Arc<dyn Transport>,
    pub frontend: Arc<dyn Frontend>,
    pub hosts: Arc<dyn HostDirectory>,
    pub credentials: Arc<CredentialCache>,
    pub interactions: Arc<Interactions>,
}

impl Services {
    pub fn new(
        transport: Arc<dyn Transport>,
        frontend: Arc<dyn Frontend>,
        hosts: Arc<dyn HostDirectory>,
    ) -> Self {
        Self {
            transport,
            frontend,
            hosts,
            credentials: Arc::new(CredentialCache::new()),
            interactions: Arc::new(Interactions::new()),
        }
    }

    /// Ask the user to trust the key described by `error`.
    ///
    /// Returns `None` when trust prompts for the host are suppressed.
    pub async fn resolve_trust(&self, host: &HostRecord, error: &RemoteError) -> Option<Resolution> {
        if self.interactions.is_suppressed(PromptKind::Trust, host.id) {
            debug!(host = %host.id, "trust prompt suppressed");
            return None;
        }

        let request = TrustRequest {
            host: host.id,
            host_name: host.name.clone(),
            host_port: error.host_port.clone(),
            fingerprint: error.fingerprint.clone(),
            mismatch: error.code == ErrorCode::HostKeyMismatch,
        };
        let services = self.clone();
        let (outcome, originator) = self
            .interactions
            .trust
            .run(host.id, move || {
                async move { services.run_trust_dialog(request).await }.boxed()
            })
            .await;
        Some(Resolution {
            outcome,
            originator,
        })
    }

    async fn run_trust_dialog(&self, request: TrustRequest) -> Outcome {
        let id = request.host;
        if !self.frontend.confirm_trust(&request).await {
            info!(host = %id, "host key rejected");
            self.interactions.suppress(PromptKind::Trust, id);
            return Outcome::Declined;
        }

        match self
            .transport
            .request(Request::from(Op::TrustHost { host_id: id }))
            .await
        {
            Ok(_) => {
                info!(host = %id, fingerprint = ?request.fingerprint, "host key trusted");
                self.hosts.host_trusted(id, request.fingerprint.as_deref());
                Outcome::Accepted
            }
            Err(e) => {
                warn!(host = %id, "trust_host failed: {}", e);
                self.frontend.notify(Notice::Failed {
                    operation: "trust_host",
                    message: e.to_string(),
                });
                Outcome::Failed(e.to_string())
            }
        }
    }

    /// Prompt for a connection password. `rejected` is the password the
    /// failed request carried; it is evicted from the cache first.
    ///
    /// Returns `None` when the host does not authenticate by password or when
    /// password prompts for it are suppressed.
    pub async fn resolve_password(
        &self,
        host: &HostRecord,
        rejected: Option<&str>,
    ) -> Option<Resolution> {
        if !host.uses_password_auth() {
            return None;
        }
        if let Some(rejected) = rejected {
            if self.credentials.evict_rejected(host.id, rejected) {
                debug!(host = %host.id, "evicted rejected cached password");
            }
        }
        if self.interactions.is_suppressed(PromptKind::Password, host.id) {
            debug!(host = %host.id, "password prompt suppressed");
            return None;
        }

        let services = self.clone();
        let record = host.clone();
        let (outcome, originator) = self
            .interactions
            .password
            .run(host.id, move || {
                async move { services.run_password_prompt(record).await }.boxed()
            })
            .await;
        Some(Resolution {
            outcome,
            originator,
        })
    }

    async fn run_password_prompt(&self, host: HostRecord) -> Outcome {
        match self.frontend.request_password(&host).await {
            Some(password) if !password.is_empty() => {
                self.credentials.set_password(host.id, password.clone());
                self.hosts.remember_password(host.id, &password);
                Outcome::Accepted
            }
            _ => {
                info!(host = %host.id, "password prompt cancelled");
                self.interactions.suppress(PromptKind::Password, host.id);
                Outcome::Declined
            }
        }
    }
}
