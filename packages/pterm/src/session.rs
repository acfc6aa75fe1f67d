use anyhow::{Context, Result};
use pterm_client::{Client, ClientHandle, HostRecord, Services, SinkFactory, StaticHosts};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bridge::WsBridge;
use crate::config::FileConfig;
use crate::frontend::{CliFrontend, Prompt};

/// A running client wired to the bridge.
pub struct Session {
    pub client: ClientHandle,
    pub bridge: Arc<WsBridge>,
    pub hosts: Arc<StaticHosts>,
}

impl Session {
    pub async fn open(
        config: &FileConfig,
        sinks: Arc<dyn SinkFactory>,
        prompts: mpsc::Sender<Prompt>,
        verbose: bool,
    ) -> Result<Self> {
        let (bridge, mut frames) = WsBridge::connect(&config.bridge.url)
            .await
            .with_context(|| format!("Failed to connect to {}", config.bridge.url))?;

        let hosts = Arc::new(StaticHosts::new(config.hosts.iter().cloned()));
        let services = Services::new(
            bridge.clone(),
            Arc::new(CliFrontend::new(prompts, verbose)),
            hosts.clone(),
        );
        let client = Client::builder(services, sinks)
            .config(config.client.to_runtime())
            .transfer_config(config.transfer.to_runtime())
            .spawn();

        let forward = client.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                forward.push(frame);
            }
            debug!("output stream ended");
        });

        Ok(Self {
            client,
            bridge,
            hosts,
        })
    }

    /// Look a host up by id or name.
    pub fn resolve_host(&self, needle: &str) -> Result<HostRecord> {
        self.hosts
            .find(needle)
            .with_context(|| format!("No host named {:?} in config.toml", needle))
    }
}
