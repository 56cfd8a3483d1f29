//! Event stream client: connect, read envelopes, reconnect.
//!
//! [`EventStreamClient::run`] owns the single stream connection. It loops
//! connect -> read frames -> disconnected -> wait -> reconnect until its
//! [`CancellationToken`] fires. Decoded envelopes and connection state
//! changes are forwarded to the controller as [`StreamUpdate`]s.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::SessionRefresher;
use crate::client::{FrameStream, StreamConnector, StreamError};
use crate::messages::{parse_envelope, EventEnvelope};
use crate::reconnect::{Connection, ConnectionState, ReconnectPolicy};

/// What the stream client reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    State(ConnectionState),
    Event(EventEnvelope),
    /// The session was rejected and refreshing it failed.
    AuthFailed(String),
}

/// Persistent subscription to the case event stream.
pub struct EventStreamClient<C, R> {
    connector: C,
    session: Arc<R>,
    policy: ReconnectPolicy,
    updates: mpsc::UnboundedSender<StreamUpdate>,
    cancel: CancellationToken,
}

impl<C, R> EventStreamClient<C, R>
where
    C: StreamConnector,
    R: SessionRefresher,
{
    pub fn new(
        connector: C,
        session: Arc<R>,
        policy: ReconnectPolicy,
        updates: mpsc::UnboundedSender<StreamUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            session,
            policy,
            updates,
            cancel,
        }
    }

    /// Run the client on its own task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Connect and keep reconnecting until cancelled.
    ///
    /// Each disconnection schedules exactly one reconnect after the policy
    /// delay. Cancellation is checked before every attempt and interrupts
    /// both the wait and an active connection.
    pub async fn run(self) {
        let mut conn = Connection::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match conn.begin_connect() {
                Ok(state) => self.publish(StreamUpdate::State(state)),
                Err(e) => {
                    tracing::error!(error = %e, "Event stream in unexpected state");
                    break;
                }
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            let unauthorized = match result {
                Ok(frames) => {
                    if let Ok(state) = conn.mark_connected() {
                        self.publish(StreamUpdate::State(state));
                    }
                    self.pump(frames).await;
                    false
                }
                Err(StreamError::Unauthorized) => {
                    tracing::warn!("Event stream rejected the session");
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Event stream connection failed");
                    false
                }
            };

            conn.mark_disconnected();
            self.publish(StreamUpdate::State(ConnectionState::Disconnected));

            if self.cancel.is_cancelled() {
                break;
            }

            if unauthorized {
                self.refresh_session().await;
            }

            tracing::info!(
                delay_ms = self.policy.delay.as_millis() as u64,
                "Event stream reconnect scheduled",
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }

        if conn.state() != ConnectionState::Disconnected {
            conn.mark_disconnected();
            self.publish(StreamUpdate::State(ConnectionState::Disconnected));
        }
        tracing::info!(
            connections = conn.established_count(),
            "Event stream client stopped",
        );
    }

    // ---- private helpers ----

    /// Read frames until the connection ends or the client is cancelled.
    /// Dropping `frames` closes the socket.
    async fn pump(&self, mut frames: FrameStream) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("Closing event stream");
                    return;
                }
                frame = frames.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Event stream receive error");
                        return;
                    }
                    None => {
                        tracing::info!("Event stream ended");
                        return;
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match parse_envelope(text) {
            Ok(envelope) => {
                tracing::debug!(event_type = %envelope.event_type, "Event received");
                self.publish(StreamUpdate::Event(envelope));
            }
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Dropping malformed event");
            }
        }
    }

    async fn refresh_session(&self) {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = self.session.refresh_session() => result,
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Session refresh failed");
            self.publish(StreamUpdate::AuthFailed(e.to_string()));
        }
    }

    /// Forward an update. A dropped receiver means the consumer is gone,
    /// which tears the client down.
    fn publish(&self, update: StreamUpdate) {
        if self.updates.send(update).is_err() && !self.cancel.is_cancelled() {
            tracing::info!("Stream consumer dropped, stopping event stream client");
            self.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
