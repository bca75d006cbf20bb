use anyhow::Result;
use jwt_simple::prelude::*;
use std::sync::Arc;

const TOKEN_SUBJECT: &str = "alarmdecoder-webapp";
const TOKEN_EXPIRE_HOURS: u64 = 2;
const TOKEN_TIME_TOLERANCE_MINS: u64 = 15;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    user: String,
}

/// Creates and verifies the session tokens stored in the session cookie
///
/// A token names the user it was issued to. Cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenManagerInner>,
}

struct TokenManagerInner {
    key: HS256Key,
}

impl TokenManager {
    /// Create a new TokenManager
    ///
    /// # Arguments
    /// * `secret` - Secret key for HMAC-SHA256 signing
    pub fn new(secret: &str) -> Self {
        Self {
            inner: Arc::new(TokenManagerInner {
                key: HS256Key::from_bytes(secret.as_bytes()),
            }),
        }
    }

    /// Create a signed token for `user`
    pub fn create_token(&self, user: &str) -> Result<String> {
        let claims = Claims::with_custom_claims(
            SessionClaims {
                user: user.to_string(),
            },
            Duration::from_hours(TOKEN_EXPIRE_HOURS),
        )
        .with_subject(TOKEN_SUBJECT);

        self.inner
            .key
            .authenticate(claims)
            .map_err(|e| anyhow::anyhow!("failed to create token: {e}"))
    }

    /// Verify a token
    ///
    /// Validates signature, expiration (with time tolerance), token age and
    /// subject.
    ///
    /// # Returns
    /// The user the token was issued to, `None` if the token is invalid
    pub fn verify_token(&self, token: &str) -> Option<String> {
        let options = VerificationOptions {
            accept_future: true,
            time_tolerance: Some(Duration::from_mins(TOKEN_TIME_TOLERANCE_MINS)),
            max_validity: Some(Duration::from_hours(TOKEN_EXPIRE_HOURS)),
            required_subject: Some(TOKEN_SUBJECT.to_string()),
            ..Default::default()
        };

        self.inner
            .key
            .verify_token::<SessionClaims>(token, Some(options))
            .ok()
            .map(|claims| claims.custom.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_verify_token() {
        let manager = TokenManager::new("test-token-secret");

        let token = manager.create_token("admin").expect("should create token");
        assert!(!token.is_empty());

        assert_eq!(manager.verify_token(&token).as_deref(), Some("admin"));
    }

    #[test]
    fn test_verify_invalid_token() {
        let manager = TokenManager::new("test-token-secret");

        assert!(manager.verify_token("invalid.token.here").is_none());
        assert!(manager.verify_token("").is_none());
    }

    #[test]
    fn test_verify_token_wrong_secret() {
        let manager1 = TokenManager::new("first-token-secret");
        let manager2 = TokenManager::new("second-token-secret");

        let token = manager1.create_token("admin").expect("should create token");

        assert!(manager2.verify_token(&token).is_none());
    }

    #[test]
    fn test_verify_token_wrong_subject() {
        let key = HS256Key::from_bytes(b"test-token-secret");
        let claims = Claims::with_custom_claims(
            SessionClaims {
                user: "admin".to_string(),
            },
            Duration::from_hours(1),
        )
        .with_subject("someone-else");
        let token = key.authenticate(claims).unwrap();

        assert!(TokenManager::new("test-token-secret").verify_token(&token).is_none());
    }
}
