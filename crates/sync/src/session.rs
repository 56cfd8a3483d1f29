//! Session credential shared by the REST client and the stream connector.
//!
//! A successful `/auth/refresh` may hand back a new bearer token. Both the
//! next REST request and the next stream handshake must carry it, so they
//! read the token from one [`SessionStore`] instead of holding a copy.

use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// `Authorization` header value for the current token.
    pub async fn bearer(&self) -> Option<String> {
        self.token().await.map(|t| format!("Bearer {t}"))
    }

    pub async fn replace(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}
