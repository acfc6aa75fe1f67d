//! WebSocket bridge to the remote terminal service.
//!
//! Requests go out as `{"kind":"call","id":n,"request":{...}}` and are matched
//! to `{"kind":"reply","id":n,"body":{...}}` by id. Output arrives unsolicited
//! as `{"kind":"output",...}` frames and is forwarded on a channel.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pterm_client::{CallError, OutputFrame, Request, Transport};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge unavailable at {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] tungstenite::Error),
}

impl BridgeError {
    fn from_tungstenite(url: &str, err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable(url.to_string())
        } else {
            Self::Other(err)
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Outbound<'a> {
    Call { id: u64, request: &'a Request },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Inbound {
    Reply { id: u64, body: Value },
    Output(OutputFrame),
}

/// Calls waiting for their reply.
#[derive(Default)]
struct Pending {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    closed: AtomicBool,
}

impl Pending {
    fn register(&self) -> Option<(u64, oneshot::Receiver<Value>)> {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, tx);
        Some((id, rx))
    }

    fn resolve(&self, id: u64, body: Value) -> bool {
        let waiter = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match waiter {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    fn forget(&self, id: u64) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Drop every waiter; their calls fail with a transport error.
    fn close(&self) -> usize {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
        let n = waiters.len();
        waiters.clear();
        n
    }
}

/// Route one inbound text frame.
fn dispatch(text: &str, pending: &Pending, output: &mpsc::UnboundedSender<OutputFrame>) {
    match serde_json::from_str::<Inbound>(text) {
        Ok(Inbound::Reply { id, body }) => {
            if !pending.resolve(id, body) {
                debug!(id, "reply for unknown or abandoned call");
            }
        }
        Ok(Inbound::Output(frame)) => {
            let _ = output.send(frame);
        }
        Err(e) => debug!("ignoring unparseable frame: {}", e),
    }
}

pub struct WsBridge {
    outgoing: mpsc::UnboundedSender<tungstenite::Message>,
    pending: Arc<Pending>,
    closed: CancellationToken,
}

impl WsBridge {
    /// Connect and start the socket tasks. Output frames arrive on the
    /// returned receiver until the socket closes.
    pub async fn connect(
        url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<OutputFrame>), BridgeError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| BridgeError::from_tungstenite(url, e))?;
        info!("bridge connected to {}", url);
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<tungstenite::Message>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = out_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = ws_write.send(msg).await {
                            warn!("bridge write failed: {}", e);
                            break;
                        }
                    }
                    _ = writer_closed.cancelled() => break,
                }
            }
            let _ = ws_write.close().await;
            writer_closed.cancel();
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = ws_read.next() => match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            dispatch(&text, &reader_pending, &frame_tx);
                        }
                        Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    _ = reader_closed.cancelled() => break,
                }
            }
            let dropped = reader_pending.close();
            if dropped > 0 {
                warn!(dropped, "bridge closed with calls in flight");
            }
            info!("bridge closed");
            reader_closed.cancel();
        });

        Ok((
            Arc::new(Self {
                outgoing: out_tx,
                pending,
                closed,
            }),
            frame_rx,
        ))
    }

    /// Resolves once the socket is gone.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn shutdown(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl Transport for WsBridge {
    async fn call(&self, request: Request) -> Result<Value, CallError> {
        let Some((id, rx)) = self.pending.register() else {
            return Err(CallError::Transport("bridge closed".into()));
        };
        let json = serde_json::to_string(&Outbound::Call {
            id,
            request: &request,
        })
        .map_err(|e| CallError::Transport(e.to_string()))?;
        if self
            .outgoing
            .send(tungstenite::Message::Text(json.into()))
            .is_err()
        {
            self.pending.forget(id);
            return Err(CallError::Transport("bridge closed".into()));
        }
        rx.await
            .map_err(|_| CallError::Transport("bridge closed".into()))
    }
}
