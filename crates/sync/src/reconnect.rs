//! Connection state and the fixed-delay reconnect policy.
//!
//! The event stream holds at most one connection. [`Connection`] is the
//! finite-state value tracking it; every change goes through one of its
//! named transitions so that "connecting" and "waiting to reconnect" can
//! never overlap.

use std::time::Duration;

use serde::Serialize;

/// Delay between a disconnection and the single reconnect attempt that
/// follows it.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Process-wide state of the event stream connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Reconnect timing. Constant delay, no backoff.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// A transition that is not allowed from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot move connection from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Finite-state tracker for the single stream connection.
#[derive(Debug, Default)]
pub struct Connection {
    state: ConnectionState,
    /// Number of completed `Connecting -> Connected` transitions.
    established: u64,
}

impl Connection {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn established_count(&self) -> u64 {
        self.established
    }

    /// `Disconnected -> Connecting`.
    pub fn begin_connect(&mut self) -> Result<ConnectionState, InvalidTransition> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connecting)
    }

    /// `Connecting -> Connected`.
    pub fn mark_connected(&mut self) -> Result<ConnectionState, InvalidTransition> {
        let state = self.transition(ConnectionState::Connecting, ConnectionState::Connected)?;
        self.established += 1;
        Ok(state)
    }

    /// Any state `-> Disconnected`. Returns the state that was left.
    pub fn mark_disconnected(&mut self) -> ConnectionState {
        std::mem::replace(&mut self.state, ConnectionState::Disconnected)
    }

    fn transition(
        &mut self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<ConnectionState, InvalidTransition> {
        if self.state != from {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_five_seconds() {
        assert_eq!(ReconnectPolicy::default().delay, Duration::from_secs(5));
    }

    #[test]
    fn full_cycle() {
        let mut conn = Connection::default();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.begin_connect(), Ok(ConnectionState::Connecting));
        assert_eq!(conn.mark_connected(), Ok(ConnectionState::Connected));
        assert_eq!(conn.mark_disconnected(), ConnectionState::Connected);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.established_count(), 1);
    }

    #[test]
    fn cannot_connect_twice() {
        let mut conn = Connection::default();
        conn.begin_connect().unwrap();
        let err = conn.begin_connect().unwrap_err();
        assert_eq!(err.from, ConnectionState::Connecting);
        assert_eq!(err.to, ConnectionState::Connecting);
    }

    #[test]
    fn cannot_skip_connecting() {
        let mut conn = Connection::default();
        assert!(conn.mark_connected().is_err());
        assert_eq!(conn.established_count(), 0);
    }

    #[test]
    fn failed_attempt_returns_to_disconnected() {
        let mut conn = Connection::default();
        conn.begin_connect().unwrap();
        assert_eq!(conn.mark_disconnected(), ConnectionState::Connecting);
        assert!(conn.begin_connect().is_ok());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            r#""connecting""#
        );
    }
}
