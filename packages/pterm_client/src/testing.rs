//! In-memory fakes for the transport, sinks and frontend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::CallError;
use crate::frontend::{Frontend, Notice, TrustRequest};
use crate::host::HostRecord;
use crate::protocol::{Request, TabKey};
use crate::sink::{Geometry, RenderSink, SinkFactory};
use crate::transport::Transport;

type Responder = Box<dyn FnMut(&Request) -> Result<Value, CallError> + Send>;

pub fn ok() -> Value {
    json!({"ok": true})
}

pub fn fail(code: &str) -> Value {
    json!({"ok": false, "error": code})
}

pub fn fail_trust(code: &str) -> Value {
    json!({
        "ok": false,
        "error": code,
        "hostPort": "10.0.0.1:22",
        "fingerprint": "SHA256:test",
    })
}

pub fn state(phase: &str) -> Value {
    json!({"ok": true, "state": phase, "attempts": 0})
}

// ── transport ─────────────────────────────────────────────────────────

pub struct FakeTransport {
    log: Mutex<Vec<Request>>,
    responder: Mutex<Responder>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    inputs_in_flight: AtomicUsize,
    max_inputs_in_flight: AtomicUsize,
}

impl FakeTransport {
    /// Replies `ok` to everything; `state` reports connected.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            responder: Mutex::new(Box::new(|req: &Request| {
                Ok(match req.op.kind() {
                    "state" => state("connected"),
                    _ => ok(),
                })
            })),
            delays: Mutex::new(HashMap::new()),
            inputs_in_flight: AtomicUsize::new(0),
            max_inputs_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn respond(
        &self,
        responder: impl FnMut(&Request) -> Result<Value, CallError> + Send + 'static,
    ) {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    /// Hold replies for `kind` requests for `delay`.
    pub fn delay(&self, kind: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(kind, delay);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.op.kind() == kind)
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.of_kind(kind).len()
    }

    pub fn max_inputs_in_flight(&self) -> usize {
        self.max_inputs_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn call(&self, request: Request) -> Result<Value, CallError> {
        self.log.lock().unwrap().push(request.clone());
        let is_input = request.op.kind() == "input";
        if is_input {
            let now = self.inputs_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inputs_in_flight.fetch_max(now, Ordering::SeqCst);
        }

        let delay = self.delays.lock().unwrap().get(request.op.kind()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.responder.lock().unwrap())(&request);

        if is_input {
            self.inputs_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }
}

// ── sinks ─────────────────────────────────────────────────────────────

pub struct FakeSink {
    writes: Mutex<Vec<Vec<u8>>>,
    visible: AtomicBool,
    released: AtomicBool,
    busy: AtomicBool,
    overlapped: AtomicBool,
    geometry: Mutex<Option<Geometry>>,
    write_delay: Mutex<Option<Duration>>,
}

impl FakeSink {
    pub fn new(geometry: Option<Geometry>) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            visible: AtomicBool::new(false),
            released: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            geometry: Mutex::new(geometry),
            write_delay: Mutex::new(None),
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.writes().concat()
    }

    pub fn visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// True if a write ever started while another was still running.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn set_geometry(&self, geometry: Option<Geometry>) {
        *self.geometry.lock().unwrap() = geometry;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl RenderSink for FakeSink {
    async fn write(&self, bytes: Vec<u8>) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.writes.lock().unwrap().push(bytes);
        self.busy.store(false, Ordering::SeqCst);
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    fn measure(&self) -> Option<Geometry> {
        *self.geometry.lock().unwrap()
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub struct FakeSinks {
    sinks: Mutex<HashMap<TabKey, Arc<FakeSink>>>,
    created: Mutex<Vec<TabKey>>,
    geometry: Option<Geometry>,
}

impl Default for FakeSinks {
    fn default() -> Self {
        Self::with_geometry(Some(Geometry::new(120, 40)))
    }
}

impl FakeSinks {
    pub fn with_geometry(geometry: Option<Geometry>) -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            geometry,
        }
    }

    pub fn sink(&self, key: TabKey) -> Option<Arc<FakeSink>> {
        self.sinks.lock().unwrap().get(&key).cloned()
    }

    pub fn created(&self) -> Vec<TabKey> {
        self.created.lock().unwrap().clone()
    }
}

impl SinkFactory for FakeSinks {
    fn create(&self, key: TabKey) -> Arc<dyn RenderSink> {
        let sink = Arc::new(FakeSink::new(self.geometry));
        self.sinks.lock().unwrap().insert(key, sink.clone());
        self.created.lock().unwrap().push(key);
        sink
    }
}

// ── frontend ──────────────────────────────────────────────────────────

pub struct FakeFrontend {
    trust_answer: AtomicBool,
    password: Mutex<Option<String>>,
    prompt_delay: Mutex<Duration>,
    trust_prompts: AtomicUsize,
    password_prompts: AtomicUsize,
    notices: Mutex<Vec<Notice>>,
}

impl FakeFrontend {
    /// Accepts host keys, cancels password prompts.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            trust_answer: AtomicBool::new(true),
            password: Mutex::new(None),
            prompt_delay: Mutex::new(Duration::ZERO),
            trust_prompts: AtomicUsize::new(0),
            password_prompts: AtomicUsize::new(0),
            notices: Mutex::new(Vec::new()),
        })
    }

    pub fn set_trust_answer(&self, accept: bool) {
        self.trust_answer.store(accept, Ordering::SeqCst);
    }

    pub fn set_password(&self, password: Option<&str>) {
        *self.password.lock().unwrap() = password.map(str::to_string);
    }

    /// Keep dialogs open for `delay` before answering.
    pub fn set_prompt_delay(&self, delay: Duration) {
        *self.prompt_delay.lock().unwrap() = delay;
    }

    pub fn trust_prompts(&self) -> usize {
        self.trust_prompts.load(Ordering::SeqCst)
    }

    pub fn password_prompts(&self) -> usize {
        self.password_prompts.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<&'static str> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Failed { operation, .. } => Some(operation),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Frontend for FakeFrontend {
    async fn confirm_trust(&self, _request: &TrustRequest) -> bool {
        self.trust_prompts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.prompt_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.trust_answer.load(Ordering::SeqCst)
    }

    async fn request_password(&self, _host: &HostRecord) -> Option<String> {
        self.password_prompts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.prompt_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.password.lock().unwrap().clone()
    }

    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}
