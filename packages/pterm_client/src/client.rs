//! The client actor and its handle.
//!
//! All session state lives in one [`ClientActor`] task. Handles send
//! commands over a bounded channel; request round trips, timers and sink
//! writes run in spawned tasks that post an [`Event`] back when they finish.
//! Event handlers re-check that the tab still exists (and, for polls, that it
//! is still the active one) before applying anything.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::browser::{Listing, ListingView};
use crate::config::{ClientConfig, TransferConfig};
use crate::connection::{SideChannel, poll_interval};
use crate::error::{CallError, ClientError, RemoteError};
use crate::frontend::Notice;
use crate::input::Append;
use crate::interaction::{Outcome, PromptKind, Resolution};
use crate::protocol::{ConnectionState, HostId, Op, OutputFrame, Request, TabId, TabKey};
use crate::registry::{Registry, TabInfo};
use crate::services::Services;
use crate::sink::SinkFactory;
use crate::transfer::TransferClient;
use crate::transport::{StateSource, TransportExt, TransportStateSource};

enum Command {
    Connect {
        host: HostId,
        tab: Option<TabId>,
        respond_to: oneshot::Sender<TabKey>,
    },
    Disconnect {
        key: TabKey,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },
    Submit {
        key: TabKey,
        data: Vec<u8>,
    },
    Resize {
        key: TabKey,
    },
    Activate {
        key: Option<TabKey>,
        respond_to: oneshot::Sender<bool>,
    },
    AddTab {
        host: HostId,
        respond_to: oneshot::Sender<TabKey>,
    },
    CloseTab {
        key: TabKey,
        respond_to: oneshot::Sender<bool>,
    },
    RenameTab {
        key: TabKey,
        name: String,
        respond_to: oneshot::Sender<bool>,
    },
    Tabs {
        host: HostId,
        respond_to: oneshot::Sender<Vec<TabInfo>>,
    },
    State {
        key: TabKey,
        respond_to: oneshot::Sender<Option<ConnectionState>>,
    },
    Active {
        respond_to: oneshot::Sender<Option<TabKey>>,
    },
    Browse {
        host: HostId,
        path: String,
    },
    SelectEntry {
        host: HostId,
        path: Option<String>,
        respond_to: oneshot::Sender<bool>,
    },
    Listing {
        host: HostId,
        respond_to: oneshot::Sender<Option<ListingView>>,
    },
    Reset {
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

enum Event {
    Output(OutputFrame),
    InputTimer {
        key: TabKey,
        generation: u64,
    },
    InputSent {
        key: TabKey,
    },
    Drain {
        key: TabKey,
    },
    SinkIdle {
        key: TabKey,
    },
    PollTick {
        generation: u64,
    },
    Polled {
        key: TabKey,
        seq: u64,
        result: Result<ConnectionState, CallError>,
    },
    SelectDone {
        key: TabKey,
        attempt: Attempt,
        /// Password the request carried.
        password: Option<String>,
        result: Result<(), CallError>,
    },
    SideChannelDone {
        key: TabKey,
        resolution: Option<Resolution>,
    },
    DisconnectFinished {
        key: TabKey,
        result: Result<(), CallError>,
        respond_to: Option<oneshot::Sender<Result<(), ClientError>>>,
    },
    Listed {
        host: HostId,
        seq: u64,
        result: Result<Listing, String>,
    },
}

/// Entry point for building a client.
pub struct Client;

impl Client {
    pub fn builder(services: Services, sinks: Arc<dyn SinkFactory>) -> ClientBuilder {
        ClientBuilder {
            services,
            sinks,
            config: ClientConfig::default(),
            transfer: TransferConfig::default(),
            state_source: None,
        }
    }
}

pub struct ClientBuilder {
    services: Services,
    sinks: Arc<dyn SinkFactory>,
    config: ClientConfig,
    transfer: TransferConfig,
    state_source: Option<Arc<dyn StateSource>>,
}

impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transfer_config(mut self, config: TransferConfig) -> Self {
        self.transfer = config;
        self
    }

    /// Replace state polling over the transport (e.g. with a push-fed source).
    pub fn state_source(mut self, source: Arc<dyn StateSource>) -> Self {
        self.state_source = Some(source);
        self
    }

    /// Spawn the actor on the current runtime.
    pub fn spawn(self) -> ClientHandle {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state_source = self.state_source.unwrap_or_else(|| {
            Arc::new(TransportStateSource::new(self.services.transport.clone()))
        });
        let transfer = TransferClient::new(self.services.clone(), self.transfer);

        let actor = ClientActor {
            services: self.services,
            state_source,
            transfer: transfer.clone(),
            config: self.config,
            registry: Registry::new(self.sinks),
            commands: command_rx,
            events: event_rx,
            events_tx: event_tx.clone(),
            poll_generation: 0,
            poll_in_flight: false,
            poll_seq: 0,
        };
        tokio::spawn(actor.run());

        ClientHandle {
            commands: command_tx,
            events: event_tx,
            transfer,
        }
    }
}

/// Cloneable handle to a running client.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedSender<Event>,
    transfer: TransferClient,
}

impl ClientHandle {
    async fn ask<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ClientError::ActorGone)?;
        rx.await.map_err(|_| ClientError::ActorGone)
    }

    async fn tell(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            debug!("client actor gone, dropping command");
        }
    }

    /// Open (or reuse) a tab on `host`, make it active and connect it.
    pub async fn connect(&self, host: HostId, tab: Option<TabId>) -> Result<TabKey, ClientError> {
        self.ask(|respond_to| Command::Connect {
            host,
            tab,
            respond_to,
        })
        .await
    }

    pub async fn disconnect(&self, key: TabKey) -> Result<(), ClientError> {
        self.ask(|respond_to| Command::Disconnect { key, respond_to })
            .await?
    }

    /// Queue keystrokes for a tab. Best-effort.
    pub async fn submit(&self, key: TabKey, data: impl Into<Vec<u8>>) {
        self.tell(Command::Submit {
            key,
            data: data.into(),
        })
        .await
    }

    /// Feed a pushed output chunk. Never blocks.
    pub fn push(&self, frame: OutputFrame) {
        if self.events.send(Event::Output(frame)).is_err() {
            debug!("client actor gone, dropping output");
        }
    }

    /// Tell the remote side about the tab's current sink size. Best-effort.
    pub async fn resize(&self, key: TabKey) {
        self.tell(Command::Resize { key }).await
    }

    pub async fn activate(&self, key: Option<TabKey>) -> Result<bool, ClientError> {
        self.ask(|respond_to| Command::Activate { key, respond_to })
            .await
    }

    pub async fn add_tab(&self, host: HostId) -> Result<TabKey, ClientError> {
        self.ask(|respond_to| Command::AddTab { host, respond_to })
            .await
    }

    /// Close a tab. Returns false when refused (unknown or last tab).
    pub async fn close_tab(&self, key: TabKey) -> Result<bool, ClientError> {
        self.ask(|respond_to| Command::CloseTab { key, respond_to })
            .await
    }

    pub async fn rename_tab(&self, key: TabKey, name: impl Into<String>) -> Result<bool, ClientError> {
        let name = name.into();
        self.ask(|respond_to| Command::RenameTab {
            key,
            name,
            respond_to,
        })
        .await
    }

    pub async fn tabs(&self, host: HostId) -> Result<Vec<TabInfo>, ClientError> {
        self.ask(|respond_to| Command::Tabs { host, respond_to })
            .await
    }

    pub async fn state(&self, key: TabKey) -> Result<Option<ConnectionState>, ClientError> {
        self.ask(|respond_to| Command::State { key, respond_to })
            .await
    }

    pub async fn active(&self) -> Result<Option<TabKey>, ClientError> {
        self.ask(|respond_to| Command::Active { respond_to }).await
    }

    /// Refresh the host's directory listing. The result arrives as
    /// [`Notice::ListingChanged`].
    pub async fn browse(&self, host: HostId, path: impl Into<String>) {
        self.tell(Command::Browse {
            host,
            path: path.into(),
        })
        .await
    }

    pub async fn select_entry(&self, host: HostId, path: Option<String>) -> Result<bool, ClientError> {
        self.ask(|respond_to| Command::SelectEntry {
            host,
            path,
            respond_to,
        })
        .await
    }

    pub async fn listing(&self, host: HostId) -> Result<Option<ListingView>, ClientError> {
        self.ask(|respond_to| Command::Listing { host, respond_to })
            .await
    }

    /// Drop every host, tab and listing (e.g. after a configuration import).
    pub async fn reset(&self) -> Result<(), ClientError> {
        self.ask(|respond_to| Command::Reset { respond_to }).await
    }

    pub fn transfer(&self) -> &TransferClient {
        &self.transfer
    }
}

struct ClientActor {
    services: Services,
    state_source: Arc<dyn StateSource>,
    transfer: TransferClient,
    config: ClientConfig,
    registry: Registry,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    events_tx: mpsc::UnboundedSender<Event>,
    poll_generation: u64,
    poll_in_flight: bool,
    /// Number of the last poll issued.
    poll_seq: u64,
}

impl ClientActor {
    async fn run(mut self) {
        info!("client actor started");
        self.arm_poll();
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }
        info!("client actor stopped");
    }

    /// Run `fut` in its own task and feed its event back to the actor.
    fn spawn_event<F>(&self, fut: F)
    where
        F: Future<Output = Option<Event>> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            if let Some(event) = fut.await {
                let _ = tx.send(event);
            }
        });
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                host,
                tab,
                respond_to,
            } => {
                let key = self.open_tab(host, tab);
                self.registry.activate(Some(key));
                self.services.interactions.clear_suppression(host);
                self.services.frontend.notify(Notice::ActiveChanged { active: Some(key) });
                info!("connecting {}", key);
                self.start_connect(key, Attempt::First);
                let _ = respond_to.send(key);
            }
            Command::Disconnect { key, respond_to } => {
                if !self.registry.contains(&key) {
                    let _ = respond_to.send(Err(ClientError::UnknownTab(key)));
                    return;
                }
                info!("disconnecting {}", key);
                self.send_disconnect(key, Some(respond_to));
            }
            Command::Submit { key, data } => self.submit(key, data),
            Command::Resize { key } => self.send_resize(key),
            Command::Activate { key, respond_to } => {
                let changed = self.registry.activate(key);
                if changed {
                    self.services.frontend.notify(Notice::ActiveChanged {
                        active: self.registry.active(),
                    });
                    self.arm_poll();
                }
                let _ = respond_to.send(changed);
            }
            Command::AddTab { host, respond_to } => {
                let key = self.registry.add_tab(host);
                self.services.frontend.notify(Notice::TabsChanged { host });
                self.services.frontend.notify(Notice::ActiveChanged { active: Some(key) });
                self.start_connect(key, Attempt::First);
                let _ = respond_to.send(key);
            }
            Command::CloseTab { key, respond_to } => {
                let closed = self.registry.close_tab(key);
                if let Some(closed) = closed {
                    info!("closed {}", key);
                    self.send_disconnect(key, None);
                    self.services.frontend.notify(Notice::TabsChanged { host: key.host });
                    if closed.was_active {
                        self.services.frontend.notify(Notice::ActiveChanged {
                            active: Some(closed.replacement),
                        });
                        self.start_connect(closed.replacement, Attempt::First);
                    }
                } else {
                    debug!("refusing to close {}", key);
                }
                let _ = respond_to.send(closed.is_some());
            }
            Command::RenameTab {
                key,
                name,
                respond_to,
            } => {
                let renamed = self.registry.rename_tab(key, name);
                if renamed {
                    self.services.frontend.notify(Notice::TabsChanged { host: key.host });
                }
                let _ = respond_to.send(renamed);
            }
            Command::Tabs { host, respond_to } => {
                let _ = respond_to.send(self.registry.tabs(host));
            }
            Command::State { key, respond_to } => {
                let state = self
                    .registry
                    .tab(&key)
                    .and_then(|tab| tab.lifecycle.state().cloned());
                let _ = respond_to.send(state);
            }
            Command::Active { respond_to } => {
                let _ = respond_to.send(self.registry.active());
            }
            Command::Browse { host, path } => self.browse(host, path),
            Command::SelectEntry {
                host,
                path,
                respond_to,
            } => {
                let selected = self.registry.listing_mut(host).select(path.as_deref());
                let _ = respond_to.send(selected);
            }
            Command::Listing { host, respond_to } => {
                let _ = respond_to.send(self.registry.listing(host).map(|l| l.view()));
            }
            Command::Reset { respond_to } => {
                let keys = self.registry.reset();
                info!(tabs = keys.len(), "resetting client state");
                for key in keys {
                    self.send_disconnect(key, None);
                }
                self.services.credentials.forget_all();
                self.services.interactions.clear_all();
                self.services.frontend.notify(Notice::ActiveChanged { active: None });
                self.arm_poll();
                let _ = respond_to.send(());
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Output(frame) => self.push_output(frame),
            Event::InputTimer { key, generation } => {
                let fired = self
                    .registry
                    .tab(&key)
                    .is_some_and(|tab| tab.input.timer_fired(generation));
                if fired {
                    self.flush_input(key);
                }
            }
            Event::InputSent { key } => {
                if let Some(tab) = self.registry.tab_mut(&key) {
                    tab.input.complete();
                    self.flush_input(key);
                }
            }
            Event::Drain { key } => self.drain(key),
            Event::SinkIdle { key } => {
                let again = self
                    .registry
                    .tab_mut(&key)
                    .is_some_and(|tab| tab.output.write_finished());
                if again {
                    let _ = self.events_tx.send(Event::Drain { key });
                }
            }
            Event::PollTick { generation } => self.poll_tick(generation),
            Event::Polled { key, seq, result } => {
                self.poll_in_flight = false;
                if self.registry.active() == Some(key) {
                    match result {
                        Ok(state) => self.apply_state(key, seq, state),
                        Err(e) => debug!("state poll for {} failed: {}", key, e),
                    }
                } else {
                    debug!("discarding poll result for inactive {}", key);
                }
                self.arm_poll();
            }
            Event::SelectDone {
                key,
                attempt,
                password,
                result,
            } => self.select_done(key, attempt, password, result),
            Event::SideChannelDone { key, resolution } => self.side_channel_done(key, resolution),
            Event::DisconnectFinished {
                key,
                result,
                respond_to,
            } => self.disconnect_finished(key, result, respond_to),
            Event::Listed { host, seq, result } => match result {
                Ok(listing) => {
                    if self.registry.listing_mut(host).apply(seq, listing) {
                        self.services.frontend.notify(Notice::ListingChanged { host });
                    } else {
                        debug!(host = %host, seq, "discarding superseded listing");
                    }
                }
                Err(message) => {
                    warn!(host = %host, "listing failed: {}", message);
                    self.services.frontend.notify(Notice::Failed {
                        operation: "sftp_ls",
                        message,
                    });
                }
            },
        }
    }

    fn open_tab(&mut self, host: HostId, tab: Option<TabId>) -> TabKey {
        let before = self.registry.tabs(host).len();
        let key = self.registry.ensure_tab(host, tab);
        if self.registry.tabs(host).len() != before {
            self.services.frontend.notify(Notice::TabsChanged { host });
        }
        key
    }

    // ── connection ────────────────────────────────────────────────────

    fn start_connect(&mut self, key: TabKey, attempt: Attempt) {
        let Some(record) = self.services.hosts.host(key.host) else {
            warn!("cannot connect {}: unknown host", key);
            self.services.frontend.notify(Notice::Failed {
                operation: "select",
                message: format!("unknown host {}", key.host),
            });
            return;
        };
        let default_geometry = self.config.default_geometry;
        let Some(tab) = self.registry.tab_mut(&key) else {
            return;
        };
        tab.lifecycle.connect_requested();
        let geometry = tab
            .sink
            .measure()
            .filter(|g| g.is_valid())
            .unwrap_or(default_geometry);
        self.services.frontend.notify(Notice::StateChanged {
            key,
            state: ConnectionState::optimistic(),
        });

        let password = self.services.credentials.connection_password(&record);
        let request = Request::from(Op::Select {
            host_id: key.host,
            tab_id: key.tab,
            cols: geometry.cols,
            rows: geometry.rows,
        })
        .with_password(password.clone());
        let transport = self.services.transport.clone();
        self.spawn_event(async move {
            let result = transport.request(request).await.map(|_| ());
            Some(Event::SelectDone {
                key,
                attempt,
                password,
                result,
            })
        });

        if self.registry.active() == Some(key) {
            self.arm_poll();
        }
    }

    fn select_done(
        &mut self,
        key: TabKey,
        attempt: Attempt,
        password: Option<String>,
        result: Result<(), CallError>,
    ) {
        if attempt == Attempt::Retry {
            let last_poll = self.poll_seq;
            if let Some(tab) = self.registry.tab_mut(&key) {
                tab.lifecycle.release_after(last_poll);
            }
        }
        if let Err(error) = result {
            self.connect_failed(key, attempt, password, error);
        }
    }

    fn connect_failed(
        &mut self,
        key: TabKey,
        attempt: Attempt,
        password: Option<String>,
        error: CallError,
    ) {
        if !self.registry.contains(&key) {
            return;
        }
        if attempt == Attempt::First {
            if let Some(remote) = error.remote() {
                let side = if remote.code.is_trust() {
                    Some(SideChannel::Trust)
                } else if remote.code.is_password() {
                    Some(SideChannel::Password)
                } else {
                    None
                };
                if let Some(side) = side {
                    if self.open_side_channel(key, side, remote.clone(), password) {
                        return;
                    }
                }
            }
        }
        warn!("connect {} failed: {}", key, error);
        self.services.frontend.notify(Notice::Failed {
            operation: "select",
            message: error.to_string(),
        });
    }

    /// Start a trust or password flow for `key`. Returns false when the
    /// prompt is not applicable (suppressed, non-password auth, unknown
    /// host) so the caller can report the error instead.
    ///
    /// A prompt already open for the host, even one a transfer opened, is
    /// joined rather than duplicated. `rejected` is the password the failed
    /// `select` carried.
    fn open_side_channel(
        &mut self,
        key: TabKey,
        side: SideChannel,
        error: RemoteError,
        rejected: Option<String>,
    ) -> bool {
        let Some(record) = self.services.hosts.host(key.host) else {
            return false;
        };
        let kind = match side {
            SideChannel::Trust => PromptKind::Trust,
            SideChannel::Password => PromptKind::Password,
        };
        if self.services.interactions.is_suppressed(kind, key.host) {
            return false;
        }
        if side == SideChannel::Password && !record.uses_password_auth() {
            return false;
        }
        let Some(tab) = self.registry.tab_mut(&key) else {
            return false;
        };
        if tab.lifecycle.is_prompting() {
            // This tab's open flow retries the connect.
            return true;
        }
        tab.lifecycle.hold_prompts();

        let services = self.services.clone();
        self.spawn_event(async move {
            let resolution = match side {
                SideChannel::Trust => services.resolve_trust(&record, &error).await,
                SideChannel::Password => {
                    services.resolve_password(&record, rejected.as_deref()).await
                }
            };
            Some(Event::SideChannelDone { key, resolution })
        });
        true
    }

    /// Every tab waiting on the prompt acts on its answer, whether or not it
    /// opened the dialog. The hold stays until the retried `select` resolves.
    fn side_channel_done(&mut self, key: TabKey, resolution: Option<Resolution>) {
        let last_poll = self.poll_seq;
        let Some(tab) = self.registry.tab_mut(&key) else {
            return;
        };
        let Some(resolution) = resolution else {
            tab.lifecycle.clear_hold();
            return;
        };
        match resolution.outcome {
            Outcome::Accepted => {
                info!("retrying connect for {}", key);
                self.start_connect(key, Attempt::Retry);
            }
            Outcome::Declined => {
                tab.lifecycle.release_after(last_poll);
                self.send_disconnect(key, None);
            }
            Outcome::Failed(_) => tab.lifecycle.release_after(last_poll),
        }
    }

    /// Issue a `disconnect`. With `respond_to` the request is user-initiated
    /// and failures are surfaced; otherwise it is best-effort.
    fn send_disconnect(
        &self,
        key: TabKey,
        respond_to: Option<oneshot::Sender<Result<(), ClientError>>>,
    ) {
        let transport = self.services.transport.clone();
        self.spawn_event(async move {
            let result = transport
                .request(Request::from(Op::Disconnect {
                    host_id: key.host,
                    tab_id: key.tab,
                }))
                .await
                .map(|_| ());
            Some(Event::DisconnectFinished {
                key,
                result,
                respond_to,
            })
        });
    }

    fn disconnect_finished(
        &mut self,
        key: TabKey,
        result: Result<(), CallError>,
        respond_to: Option<oneshot::Sender<Result<(), ClientError>>>,
    ) {
        match result {
            Ok(()) => {
                if let Some(tab) = self.registry.tab_mut(&key) {
                    tab.lifecycle.disconnected();
                    self.services.frontend.notify(Notice::StateChanged {
                        key,
                        state: ConnectionState::disconnected(),
                    });
                }
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(Ok(()));
                }
            }
            Err(e) => match respond_to {
                Some(respond_to) => {
                    warn!("disconnect {} failed: {}", key, e);
                    self.services.frontend.notify(Notice::Failed {
                        operation: "disconnect",
                        message: e.to_string(),
                    });
                    let _ = respond_to.send(Err(e.into()));
                }
                None => debug!("best-effort disconnect of {} failed: {}", key, e),
            },
        }
    }

    fn send_resize(&self, key: TabKey) {
        let Some(tab) = self.registry.tab(&key) else {
            return;
        };
        let Some(geometry) = tab.sink.measure().filter(|g| g.is_valid()) else {
            debug!("skipping resize for {}: sink not measurable", key);
            return;
        };
        let transport = self.services.transport.clone();
        self.spawn_event(async move {
            let request = Request::from(Op::Resize {
                host_id: key.host,
                tab_id: key.tab,
                cols: geometry.cols,
                rows: geometry.rows,
            });
            if let Err(e) = transport.request(request).await {
                debug!("resize of {} failed: {}", key, e);
            }
            None
        });
    }

    // ── polling ───────────────────────────────────────────────────────

    fn arm_poll(&mut self) {
        self.poll_generation += 1;
        let generation = self.poll_generation;
        let state = self
            .registry
            .active()
            .and_then(|key| self.registry.tab(&key))
            .and_then(|tab| tab.lifecycle.state());
        let delay = poll_interval(&self.config.poll, state);
        self.spawn_event(async move {
            tokio::time::sleep(delay).await;
            Some(Event::PollTick { generation })
        });
    }

    fn poll_tick(&mut self, generation: u64) {
        if generation != self.poll_generation || self.poll_in_flight {
            return;
        }
        let Some(key) = self.registry.active() else {
            self.arm_poll();
            return;
        };
        self.poll_in_flight = true;
        self.poll_seq += 1;
        let seq = self.poll_seq;
        let source = self.state_source.clone();
        self.spawn_event(async move {
            let result = source.poll(key).await;
            Some(Event::Polled { key, seq, result })
        });
    }

    fn apply_state(&mut self, key: TabKey, seq: u64, state: ConnectionState) {
        let Some(tab) = self.registry.tab_mut(&key) else {
            return;
        };
        let observation = tab.lifecycle.observe(state.clone());
        let may_prompt = tab.lifecycle.poll_may_prompt(seq);
        if observation.changed {
            debug!("{} is {}", key, state.phase);
            self.services.frontend.notify(Notice::StateChanged {
                key,
                state: state.clone(),
            });
        }
        if observation.remeasure {
            self.send_resize(key);
        }
        let Some(side) = observation.need.filter(|_| may_prompt) else {
            return;
        };
        if side == SideChannel::Password
            && self.services.credentials.cached_password(key.host).is_some()
        {
            // The cached password is only retried or evicted by a failed select.
            debug!("ignoring polled password_required for {}: password cached", key);
            return;
        }
        if let Some(code) = state.error {
            let error = RemoteError {
                code,
                detail: state.detail,
                host_port: state.host_port,
                fingerprint: state.fingerprint,
            };
            self.open_side_channel(key, side, error, None);
        }
    }

    // ── input ─────────────────────────────────────────────────────────

    fn submit(&mut self, key: TabKey, data: Vec<u8>) {
        let Some(tab) = self.registry.tab_mut(&key) else {
            debug!("dropping input for unknown {}", key);
            return;
        };
        if !tab.lifecycle.accepts_input() {
            debug!("dropping input for disconnected {}", key);
            return;
        }
        match tab.input.append(&data) {
            Append::Flush => self.flush_input(key),
            Append::ArmTimer(generation) => {
                let delay = self.config.input_batch;
                self.spawn_event(async move {
                    tokio::time::sleep(delay).await;
                    Some(Event::InputTimer { key, generation })
                });
            }
        }
    }

    fn flush_input(&mut self, key: TabKey) {
        let Some(batch) = self.registry.tab_mut(&key).and_then(|tab| tab.input.take_batch()) else {
            return;
        };
        let transport = self.services.transport.clone();
        self.spawn_event(async move {
            let request = Request::from(Op::Input {
                host_id: key.host,
                tab_id: key.tab,
                data: batch,
            });
            if let Err(e) = transport.request(request).await {
                debug!("input for {} failed: {}", key, e);
            }
            Some(Event::InputSent { key })
        });
    }

    // ── output ────────────────────────────────────────────────────────

    fn push_output(&mut self, frame: OutputFrame) {
        let key = frame.key();
        let Some(tab) = self.registry.tab_mut(&key) else {
            debug!("discarding output for unknown {}", key);
            return;
        };
        if tab.output.push(frame.data_b64) {
            let _ = self.events_tx.send(Event::Drain { key });
        }
    }

    fn drain(&mut self, key: TabKey) {
        let limits = self.config.drain;
        let Some(tab) = self.registry.tab_mut(&key) else {
            return;
        };
        let Some(buf) = tab.output.take_pass(limits) else {
            return;
        };
        let sink = tab.sink.clone();
        self.spawn_event(async move {
            sink.write(buf).await;
            Some(Event::SinkIdle { key })
        });
    }

    // ── browsing ──────────────────────────────────────────────────────

    fn browse(&mut self, host: HostId, path: String) {
        let seq = self.registry.listing_mut(host).begin_refresh();
        let transfer = self.transfer.clone();
        self.spawn_event(async move {
            let result = transfer.list(host, &path).await.map_err(|e| e.to_string());
            Some(Event::Listed { host, seq, result })
        });
    }
}
