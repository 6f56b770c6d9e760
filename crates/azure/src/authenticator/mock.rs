//! Fixed-response authenticator for tests and connectivity checks.

use async_trait::async_trait;

use super::{AuthError, Authenticator};

pub struct MockAuthenticator {
    token: Option<String>,
}

impl MockAuthenticator {
    /// Always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Always fails.
    pub fn failing() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn token(&self) -> Result<String, AuthError> {
        self.token
            .clone()
            .ok_or_else(|| AuthError::Unavailable("mock authenticator".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_configured_token() {
        let auth = MockAuthenticator::new("token-value");
        assert_eq!(auth.token().await.unwrap(), "token-value");
    }

    #[tokio::test]
    async fn failing_mock_errors() {
        let auth = MockAuthenticator::failing();
        assert!(matches!(
            auth.token().await.unwrap_err(),
            AuthError::Unavailable(_)
        ));
    }
}
