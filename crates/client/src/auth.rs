use async_trait::async_trait;

use crate::error::ClientError;

/// Source of bearer tokens for the engine.
///
/// Implementations own caching and renewal; the transport asks for a token
/// on every request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, ClientError>;
}

/// Fixed token, for tests and pre-authorized environments.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, ClientError> {
        if self.token.is_empty() {
            return Err(ClientError::Auth("empty static token".into()));
        }
        Ok(self.token.clone())
    }
}
