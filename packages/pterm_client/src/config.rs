use std::time::Duration;

use crate::sink::Geometry;

/// Limits for a single output drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainLimits {
    pub max_bytes: usize,
    pub max_duration: Duration,
}

impl Default for DrainLimits {
    fn default() -> Self {
        Self {
            max_bytes: 96 * 1024,
            max_duration: Duration::from_millis(8),
        }
    }
}

/// Delay before the next state poll, by the active tab's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub reconnecting: Duration,
    pub connected: Duration,
    /// No active tab, or nothing known about it yet.
    pub idle: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            reconnecting: Duration::from_millis(300),
            connected: Duration::from_millis(1200),
            idle: Duration::from_millis(2500),
        }
    }
}

/// Runtime configuration of the client actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long keystrokes wait for company before being sent.
    pub input_batch: Duration,
    pub drain: DrainLimits,
    pub poll: PollIntervals,
    /// Used for `select` when the sink cannot be measured.
    pub default_geometry: Geometry,
    pub command_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            input_batch: Duration::from_millis(4),
            drain: DrainLimits::default(),
            poll: PollIntervals::default(),
            default_geometry: Geometry::default(),
            command_buffer: 64,
        }
    }
}

/// Runtime configuration of the transfer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub read_limit: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            read_limit: 2 * 1024 * 1024,
        }
    }
}
