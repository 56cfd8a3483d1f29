//! WebSocket transport for the case event stream.
//!
//! [`StreamConnector`] opens one connection and hands back its text frames
//! as a [`FrameStream`]. [`WsConnector`] is the tokio-tungstenite
//! implementation; the stream client only ever sees the trait, which keeps
//! the reconnect logic testable without a socket.

use std::future::Future;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::session::SessionStore;

/// Text frames of one live connection. The stream ends when the
/// connection closes; a transport error is yielded once, then it ends.
pub type FrameStream = BoxStream<'static, Result<String, StreamError>>;

/// Opens event stream connections.
pub trait StreamConnector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<FrameStream, StreamError>> + Send;
}

/// Errors that can occur on the event stream transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the handshake with 401.
    #[error("Event stream rejected the session")]
    Unauthorized,

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Connection settings for the event WebSocket endpoint.
pub struct WsConnector {
    events_url: String,
    session: SessionStore,
}

impl WsConnector {
    /// * `events_url` - WebSocket URL, e.g. `wss://bot.example/api/events`.
    /// * `session`    - its current token is sent as a bearer token on
    ///   every handshake, so a refreshed token applies to the next attempt.
    pub fn new(events_url: String, session: SessionStore) -> Self {
        Self { events_url, session }
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }

    /// Handshake URL with a fresh `clientId` so server logs can tell
    /// reconnects apart.
    fn handshake_url(&self, client_id: &str) -> Result<String, StreamError> {
        let mut url = url::Url::parse(&self.events_url)
            .map_err(|e| StreamError::Connection(format!("Invalid events URL: {e}")))?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        Ok(url.into())
    }

    async fn handshake_request(&self, client_id: &str) -> Result<Request, StreamError> {
        let mut request = self
            .handshake_url(client_id)?
            .into_client_request()
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        if let Some(bearer) = self.session.bearer().await {
            let value = HeaderValue::from_str(&bearer)
                .map_err(|e| StreamError::Connection(format!("Invalid session token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

impl StreamConnector for WsConnector {
    async fn connect(&self) -> Result<FrameStream, StreamError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let request = self.handshake_request(&client_id).await?;

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| match e {
            tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                StreamError::Unauthorized
            }
            other => StreamError::Connection(format!(
                "Failed to connect to {}: {other}",
                self.events_url
            )),
        })?;

        tracing::info!(client_id = %client_id, "Connected to event stream at {}", self.events_url);

        let frames = futures::stream::unfold(Some(ws_stream), |state| async move {
            let mut ws = state?;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return Some((Ok(text), Some(ws))),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Event stream closed by server");
                        return None;
                    }
                    // Binary, ping/pong and raw frames carry no events.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Some((Err(StreamError::Protocol(e.to_string())), None));
                    }
                    None => return None,
                }
            }
        });

        Ok(frames.boxed())
    }
}
