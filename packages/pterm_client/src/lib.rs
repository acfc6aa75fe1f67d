//! pterm client - session core for remote terminals
//!
//! This crate keeps the client side of a remote terminal service: tabs per
//! host, batched keystrokes, frame-budgeted output rendering, connection state
//! polling, host-key trust and password prompts, and SFTP file transfer. It
//! knows nothing about how requests travel or how bytes are drawn; callers
//! plug in a [`Transport`], a [`SinkFactory`] and a [`Frontend`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pterm_client::{Client, HostId, Services, StaticHosts};
//! # use pterm_client::{Frontend, SinkFactory, Transport};
//!
//! # async fn run(
//! #     transport: Arc<dyn Transport>,
//! #     frontend: Arc<dyn Frontend>,
//! #     sinks: Arc<dyn SinkFactory>,
//! # ) -> Result<(), pterm_client::ClientError> {
//! let services = Services::new(transport, frontend, Arc::new(StaticHosts::new([])));
//! let client = Client::builder(services, sinks).spawn();
//!
//! let tab = client.connect(HostId(1), None).await?;
//! client.submit(tab, "uptime\r").await;
//! # Ok(())
//! # }
//! ```

pub mod browser;
mod client;
pub mod config;
pub mod connection;
mod credentials;
mod error;
pub mod frontend;
pub mod host;
mod input;
pub mod interaction;
mod output;
pub mod protocol;
pub mod registry;
mod services;
pub mod sink;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod testing;

pub use browser::{Entry, Listing, ListingView, join_remote};
pub use client::{Client, ClientBuilder, ClientHandle};
pub use config::{ClientConfig, DrainLimits, PollIntervals, TransferConfig};
pub use credentials::{CredentialCache, TransferCredentials};
pub use error::{CallError, ClientError, ErrorClass, ErrorCode, RemoteError, TransferError};
pub use frontend::{Frontend, Notice, TrustRequest};
pub use host::{HostDirectory, HostRecord, StaticHosts};
pub use protocol::{ConnectionState, HostId, Op, OutputFrame, Phase, Request, TabId, TabKey};
pub use services::Services;
pub use sink::{Geometry, RenderSink, SinkFactory};
pub use transfer::{TransferClient, UploadReport};
pub use transport::{StateSource, Transport, TransportExt, TransportStateSource};
