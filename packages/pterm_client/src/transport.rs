use async_trait::async_trait;
use std::sync::Arc;

use crate::error::CallError;
use crate::protocol::{ConnectionState, Op, Request, TabKey, reply_into_result};

/// The single request/response channel to the remote side.
///
/// Implementations return the raw reply body. A body with `ok: false` may be
/// returned as-is; callers run it through [`reply_into_result`] via
/// [`TransportExt::request`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: Request) -> Result<serde_json::Value, CallError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn call(&self, request: Request) -> Result<serde_json::Value, CallError> {
        (**self).call(request).await
    }
}

/// Convenience wrapper that folds `ok: false` replies into [`CallError::Remote`].
#[async_trait]
pub trait TransportExt: Transport {
    async fn request(&self, request: Request) -> Result<serde_json::Value, CallError> {
        let body = self.call(request).await?;
        reply_into_result(body)
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

/// Source of connection state for the active tab.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn poll(&self, key: TabKey) -> Result<ConnectionState, CallError>;
}

/// Polls by issuing `state` requests on the transport.
pub struct TransportStateSource {
    transport: Arc<dyn Transport>,
}

impl TransportStateSource {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl StateSource for TransportStateSource {
    async fn poll(&self, key: TabKey) -> Result<ConnectionState, CallError> {
        let body = self
            .transport
            .request(Request::from(Op::State {
                host_id: key.host,
                tab_id: key.tab,
            }))
            .await?;
        ConnectionState::from_reply(body)
            .map_err(|e| CallError::Transport(format!("malformed state reply: {e}")))
    }
}
