//! Transport lifecycle state machine.
//!
//! One atomic integer is the single source of truth for the session
//! lifecycle. States only move forward:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Closing -> Closed
//!       ^              |
//!       +--------------+  (launch failure)
//! ```
//!
//! `Closed` is absorbing; a closed transport cannot be reused.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TransportState {
    /// No session has been started
    Disconnected = 0,
    /// `start_session` is launching the child
    Connecting = 1,
    /// The session is live
    Connected = 2,
    /// Shutdown is in progress
    Closing = 3,
    /// Terminal; the transport cannot be reused
    Closed = 4,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Atomic holder of the transport state
///
/// All transitions go through compare-and-set; there is no coarse lock
/// around the public transport API.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Start in `Disconnected`.
    pub fn new() -> Self {
        Self(AtomicU8::new(TransportState::Disconnected as u8))
    }

    /// Current state.
    pub fn load(&self) -> TransportState {
        TransportState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// CAS `from` to `to`. Returns whether the transition happened.
    ///
    /// `Closed` is absorbing: no transition out of it ever succeeds.
    pub fn transition(&self, from: TransportState, to: TransportState) -> bool {
        if from == TransportState::Closed {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to `Closing` from any earlier state.
    ///
    /// Returns `false` when already `Closing` or `Closed`.
    pub fn begin_close(&self) -> bool {
        loop {
            let current = self.load();
            if current >= TransportState::Closing {
                return false;
            }
            if self.transition(current, TransportState::Closing) {
                return true;
            }
        }
    }

    /// Finish the shutdown: `Closing` (or earlier) becomes `Closed`.
    pub fn finish_close(&self) {
        self.0.store(TransportState::Closed as u8, Ordering::SeqCst);
    }
}
