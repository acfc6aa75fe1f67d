//! Connection lifecycle of a single tab.
//!
//! State only ever comes from polls. The two local fabrications are the
//! optimistic `Reconnecting { attempts: 0 }` right after a connect request and
//! `Disconnected` after an explicit disconnect succeeds.

use std::time::Duration;

use crate::config::PollIntervals;
use crate::protocol::{ConnectionState, Phase};

/// A prompt a polled error asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideChannel {
    Trust,
    Password,
}

/// What changed when a poll result was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    pub changed: bool,
    /// First confirmed `Connected` since the last non-connected state.
    pub remeasure: bool,
    pub need: Option<SideChannel>,
}

/// Why polled credential errors are currently ignored for a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    /// A prompt is open or its retried `select` has not resolved.
    Prompting,
    /// Polls numbered up to this were issued before the retry resolved.
    UntilPollAfter(u64),
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    state: Option<ConnectionState>,
    confirmed_connected: bool,
    hold: Option<Hold>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&ConnectionState> {
        self.state.as_ref()
    }

    /// Input is dropped only when the tab is known to be disconnected.
    pub fn accepts_input(&self) -> bool {
        !self.state.as_ref().is_some_and(ConnectionState::is_disconnected)
    }

    pub fn connect_requested(&mut self) {
        self.state = Some(ConnectionState::optimistic());
    }

    pub fn disconnected(&mut self) {
        self.state = Some(ConnectionState::disconnected());
        self.confirmed_connected = false;
    }

    /// A side channel was opened for this tab.
    pub fn hold_prompts(&mut self) {
        self.hold = Some(Hold::Prompting);
    }

    pub fn is_prompting(&self) -> bool {
        self.hold == Some(Hold::Prompting)
    }

    /// The side channel finished. Polls issued up to `last_poll` still carry
    /// the old error, and so does the first one after it.
    pub fn release_after(&mut self, last_poll: u64) {
        if self.hold.is_some() {
            self.hold = Some(Hold::UntilPollAfter(last_poll));
        }
    }

    pub fn clear_hold(&mut self) {
        self.hold = None;
    }

    /// Whether poll number `seq` may open a prompt.
    pub fn poll_may_prompt(&mut self, seq: u64) -> bool {
        match self.hold {
            None => true,
            Some(Hold::Prompting) => false,
            Some(Hold::UntilPollAfter(last)) => {
                if seq > last {
                    self.hold = None;
                }
                false
            }
        }
    }

    pub fn observe(&mut self, polled: ConnectionState) -> Observation {
        let changed = self.state.as_ref() != Some(&polled);
        let remeasure = polled.is_connected() && !self.confirmed_connected;
        self.confirmed_connected = polled.is_connected();

        let need = match &polled.error {
            Some(code) if code.is_trust() => Some(SideChannel::Trust),
            Some(code) if code.is_password() => Some(SideChannel::Password),
            _ => None,
        };
        self.state = Some(polled);
        Observation {
            changed,
            remeasure,
            need,
        }
    }
}

/// Delay before the next poll given the active tab's last known state.
pub fn poll_interval(intervals: &PollIntervals, state: Option<&ConnectionState>) -> Duration {
    match state.map(|s| s.phase) {
        None => intervals.idle,
        Some(Phase::Reconnecting { .. }) => intervals.reconnecting,
        Some(Phase::Connected) | Some(Phase::Disconnected) => intervals.connected,
    }
}
