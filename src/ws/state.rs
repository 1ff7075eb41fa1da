//! Per-connection lifecycle state machine.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnState {
    /// Handshake in progress.
    #[default]
    Connecting = 0,
    /// Handshake done, keepalive running.
    Connected = 1,
    /// Teardown started, a close frame may be in flight.
    Closing = 2,
    /// Socket closed.
    Closed = 3,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::Connecting,
            1 => ConnState::Connected,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }

    #[must_use]
    pub const fn is_open(self) -> bool { matches!(self, ConnState::Connected) }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnState::Connecting => write!(f, "CONNECTING"),
            ConnState::Connected => write!(f, "CONNECTED"),
            ConnState::Closing => write!(f, "CLOSING"),
            ConnState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Atomic cell holding a [`ConnState`]. Transitions only move forward.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ConnState) -> Self { Self(AtomicU8::new(state as u8)) }

    pub(crate) fn get(&self) -> ConnState { ConnState::from_u8(self.0.load(Ordering::Acquire)) }

    /// `Connecting -> Connected`. Returns false if the connection already
    /// moved past it.
    pub(crate) fn connect(&self) -> bool { self.advance(ConnState::Connecting, ConnState::Connected) }

    /// `Connected -> Closing`. Exactly one caller wins; only the winner may
    /// send a close frame.
    pub(crate) fn begin_closing(&self) -> bool { self.advance(ConnState::Connected, ConnState::Closing) }

    /// Moves to `Closed` from any state. Returns false if it was already closed.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(ConnState::Closed as u8, Ordering::AcqRel) != ConnState::Closed as u8
    }

    fn advance(&self, from: ConnState, to: ConnState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions() {
        let state = StateCell::new(ConnState::Connecting);
        assert_eq!(state.get(), ConnState::Connecting);
        assert!(state.connect());
        assert!(state.get().is_open());
        assert!(state.begin_closing());
        assert_eq!(state.get(), ConnState::Closing);
        assert!(state.close());
        assert_eq!(state.get(), ConnState::Closed);
    }

    #[test]
    fn begin_closing_wins_once() {
        let state = StateCell::new(ConnState::Connected);
        assert!(state.begin_closing());
        assert!(!state.begin_closing());
    }

    #[test]
    fn closed_connection_cannot_begin_closing() {
        let state = StateCell::new(ConnState::Connected);
        assert!(state.close());
        assert!(!state.begin_closing());
        assert!(!state.close());
        assert!(!state.connect());
    }

    #[test]
    fn display() {
        assert_eq!(ConnState::Connected.to_string(), "CONNECTED");
        assert_eq!(ConnState::Closed.to_string(), "CLOSED");
        assert_eq!(ConnState::default(), ConnState::Connecting);
    }
}
