//! REST client for the case endpoints of the bot backend.
//!
//! [`CaseBackend`] is the seam the controller talks to; [`CaseApi`] is the
//! [`reqwest`] implementation used in production. Tests substitute an
//! in-memory backend.

use std::future::Future;
use std::time::Duration;

use casehub_core::case::{Case, CaseListResponse};
use casehub_core::query::CaseQuery;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::actions::CaseMutation;
use crate::session::SessionStore;

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered 404 for the requested case.
    #[error("Case not found")]
    NotFound,

    /// The session is no longer valid.
    #[error("Session is not authorized")]
    Unauthorized,

    /// Any other non-2xx status code.
    #[error("Backend error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ApiError {
    /// Whether the same request can succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::NotFound | Self::Unauthorized => false,
        }
    }
}

/// Read and write access to cases.
pub trait CaseBackend: SessionRefresher {
    /// `GET /cases` with the canonical filter query.
    fn list_cases(
        &self,
        guild_id: &str,
        query: &CaseQuery,
    ) -> impl Future<Output = Result<CaseListResponse, ApiError>> + Send;

    /// `GET /cases/{id}`.
    fn get_case(
        &self,
        guild_id: &str,
        case_id: &str,
    ) -> impl Future<Output = Result<Case, ApiError>> + Send;

    /// `POST /cases/{id}/{endpoint}` for one mutation.
    fn submit(&self, mutation: &CaseMutation) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// External session check, called when the backend or the event stream
/// rejects the current session.
pub trait SessionRefresher: Send + Sync + 'static {
    fn refresh_session(&self) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// HTTP client for the case endpoints.
pub struct CaseApi {
    client: reqwest::Client,
    api_url: String,
    session: SessionStore,
}

/// Body of a successful `POST /auth/refresh`. Cookie-based sessions may
/// answer without a token.
#[derive(Debug, Default, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    token: Option<String>,
}

/// New bearer token from a refresh response body, if it carries one.
fn refreshed_token(body: &str) -> Option<String> {
    serde_json::from_str::<RefreshResponse>(body)
        .ok()
        .and_then(|r| r.token)
        .filter(|t| !t.trim().is_empty())
}

impl CaseApi {
    /// Create a client for `api_url` (e.g. `https://bot.example/api`).
    ///
    /// The cookie store keeps cookie-based sessions renewed by
    /// `/auth/refresh`; bearer tokens go through `session`.
    pub fn new(api_url: String, session: SessionStore, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self::with_client(client, api_url, session))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, session: SessionStore) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Attach the session's current token, read at send time.
    async fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session.token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map non-2xx responses onto [`ApiError`] variants.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            _ => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                Err(ApiError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl SessionRefresher for CaseApi {
    async fn refresh_session(&self) -> Result<(), ApiError> {
        let response = self
            .authorized(self.client.post(format!("{}/auth/refresh", self.api_url)))
            .await
            .send()
            .await?;
        let body = Self::ensure_success(response).await?.text().await?;

        let rotated = refreshed_token(&body);
        let token_rotated = rotated.is_some();
        if let Some(token) = rotated {
            self.session.replace(Some(token)).await;
        }
        tracing::info!(token_rotated, "Session refreshed");
        Ok(())
    }
}

impl CaseBackend for CaseApi {
    async fn list_cases(&self, guild_id: &str, query: &CaseQuery) -> Result<CaseListResponse, ApiError> {
        let mut params: Vec<(&str, &str)> = vec![("guildId", guild_id)];
        params.extend(query.pairs().iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .authorized(self.client.get(format!("{}/cases", self.api_url)))
            .await
            .query(&params)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn get_case(&self, guild_id: &str, case_id: &str) -> Result<Case, ApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/cases/{}", self.api_url, case_id)))
            .await
            .query(&[("guildId", guild_id)])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn submit(&self, mutation: &CaseMutation) -> Result<(), ApiError> {
        let url = format!(
            "{}/cases/{}/{}",
            self.api_url,
            mutation.case_id,
            mutation.endpoint()
        );
        let response = self
            .authorized(self.client.post(url))
            .await
            .json(&mutation.body())
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(!ApiError::NotFound.is_retryable());
        assert!(!ApiError::Unauthorized.is_retryable());
        assert!(ApiError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ApiError::Status {
            status: 422,
            body: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = CaseApi::with_client(
            reqwest::Client::new(),
            "http://localhost:3000/api/".into(),
            SessionStore::default(),
        );
        assert_eq!(api.api_url(), "http://localhost:3000/api");
    }

    #[test]
    fn display_status_error() {
        let err = ApiError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "Backend error (500): boom");
    }

    #[test]
    fn refresh_body_token_is_extracted() {
        assert_eq!(refreshed_token(r#"{"token":"abc"}"#).as_deref(), Some("abc"));
        assert_eq!(refreshed_token(r#"{"ok":true}"#), None);
        assert_eq!(refreshed_token(r#"{"token":"  "}"#), None);
        assert_eq!(refreshed_token(""), None);
    }

    // ---- against a local HTTP responder ----

    /// Answer one request per entry of `bodies` with `200` and that JSON
    /// body, closing each connection. Resolves to the raw request heads.
    async fn serve(bodies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&chunk[..n]);
                }
                requests.push(String::from_utf8_lossy(&head).to_ascii_lowercase());

                let reply = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn refreshed_token_is_used_by_next_request() {
        let (url, server) = serve(vec![r#"{"token":"fresh"}"#, r#"{"items":[],"total":0}"#]).await;
        let session = SessionStore::new(Some("stale".into()));
        let api = CaseApi::with_client(reqwest::Client::new(), url, session.clone());

        api.refresh_session().await.unwrap();
        let list = api.list_cases("g1", &CaseQuery::default()).await.unwrap();
        assert_eq!(list.total, 0);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("post /auth/refresh"));
        assert!(requests[0].contains("authorization: bearer stale"));
        assert!(requests[1].starts_with("get /cases?guildid=g1"));
        assert!(requests[1].contains("authorization: bearer fresh"));
        assert_eq!(session.token().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn tokenless_refresh_keeps_current_token() {
        let (url, server) = serve(vec![r#"{}"#]).await;
        let session = SessionStore::new(Some("kept".into()));
        let api = CaseApi::with_client(reqwest::Client::new(), url, session.clone());

        api.refresh_session().await.unwrap();
        server.await.unwrap();
        assert_eq!(session.token().await.as_deref(), Some("kept"));
    }
}
