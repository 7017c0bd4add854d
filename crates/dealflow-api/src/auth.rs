//! OIDC verification for queue dispatch.
//!
//! The durable queue signs every push with an OIDC ID token for the
//! invoker service account. The worker validates signature (JWKS, cached),
//! issuer, audience, and that the token's email matches the configured
//! invoker. `LOCAL_DEV` bypasses this entirely at the route layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::HeaderMap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tokio::sync::RwLock;

/// Google's OIDC token issuer.
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

const DEFAULT_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const JWKS_TTL: Duration = Duration::from_secs(300);

/// Dispatch auth verification error.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Authorization header is missing or malformed.
    #[error("missing bearer token")]
    MissingBearerToken,
    /// Token failed validation.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Token is valid but not from the configured invoker.
    #[error("caller is not the configured invoker")]
    NotInvoker,
    /// JWKS could not be fetched or parsed.
    #[error("jwks refresh failed: {0}")]
    JwksRefresh(String),
}

#[derive(Debug, Clone)]
struct CachedJwks {
    set: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Verifies queue-dispatch OIDC tokens.
pub struct DispatchVerifier {
    audience: String,
    invoker_email: String,
    jwks_url: String,
    hs256_secret: Option<String>,
    jwks_cache: RwLock<Option<CachedJwks>>,
    http: reqwest::Client,
}

impl std::fmt::Debug for DispatchVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchVerifier")
            .field("audience", &self.audience)
            .field("invoker_email", &self.invoker_email)
            .field("hs256_secret", &self.hs256_secret.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl DispatchVerifier {
    /// Creates a verifier for production Google-signed tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        audience: impl Into<String>,
        invoker_email: impl Into<String>,
    ) -> Result<Self, dealflow_core::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| dealflow_core::Error::internal(format!("auth http client: {e}")))?;

        Ok(Self {
            audience: audience.into(),
            invoker_email: invoker_email.into(),
            jwks_url: DEFAULT_JWKS_URL.to_string(),
            hs256_secret: None,
            jwks_cache: RwLock::new(None),
            http,
        })
    }

    /// Creates a test verifier that accepts HS256 tokens for `secret`.
    #[must_use]
    pub fn hs256_for_tests(
        audience: impl Into<String>,
        invoker_email: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            audience: audience.into(),
            invoker_email: invoker_email.into(),
            jwks_url: DEFAULT_JWKS_URL.to_string(),
            hs256_secret: Some(secret.into()),
            jwks_cache: RwLock::new(None),
            http: reqwest::Client::new(),
        }
    }

    /// Validates the bearer token in request headers.
    ///
    /// # Errors
    ///
    /// Returns an error when the header is missing or verification fails.
    pub async fn verify_headers(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let token = extract_bearer_token(headers).ok_or(AuthError::MissingBearerToken)?;
        self.verify_token(&token).await
    }

    /// Validates a raw JWT token.
    ///
    /// # Errors
    ///
    /// Returns an error when decoding fails or the email is not the
    /// configured invoker.
    pub async fn verify_token(&self, token: &str) -> Result<(), AuthError> {
        let claims = if let Some(secret) = self.hs256_secret.as_deref() {
            self.decode_hs256(token, secret)?
        } else {
            self.decode_with_jwks(token).await?
        };

        let email = claims
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if email != self.invoker_email {
            return Err(AuthError::NotInvoker);
        }
        Ok(())
    }

    fn validation_for(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[GOOGLE_ISSUER]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation
    }

    fn decode_hs256(&self, token: &str, secret: &str) -> Result<Value, AuthError> {
        let validation = self.validation_for(Algorithm::HS256);
        decode::<Value>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    async fn decode_with_jwks(&self, token: &str) -> Result<Value, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing kid".to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unsupported algorithm: {:?}",
                header.alg
            )));
        }

        let jwk = self
            .get_jwk(&kid)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("unknown kid".to_string()))?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::InvalidToken(format!("invalid jwk: {e}")))?;

        let validation = self.validation_for(Algorithm::RS256);
        decode::<Value>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    async fn get_jwk(&self, kid: &str) -> Result<Option<jsonwebtoken::jwk::Jwk>, AuthError> {
        if let Some(jwk) = self.cached_jwk(kid).await {
            return Ok(Some(jwk));
        }
        self.refresh_jwks().await?;
        Ok(self.cached_jwk(kid).await)
    }

    async fn cached_jwk(&self, kid: &str) -> Option<jsonwebtoken::jwk::Jwk> {
        let cache = self.jwks_cache.read().await;
        let set = match cache.as_ref() {
            Some(cached) if cached.fetched_at.elapsed() < JWKS_TTL => Arc::clone(&cached.set),
            _ => return None,
        };
        drop(cache);

        set.keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
            .cloned()
    }

    async fn refresh_jwks(&self) -> Result<(), AuthError> {
        let set = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::JwksRefresh(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::JwksRefresh(e.to_string()))?
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::JwksRefresh(e.to_string()))?;

        *self.jwks_cache.write().await = Some(CachedJwks {
            set: Arc::new(set),
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const AUDIENCE: &str = "https://worker.example.run.app";
    const INVOKER: &str = "tasks-invoker@proj.iam.gserviceaccount.com";
    const SECRET: &str = "test-secret";

    fn token(claims: Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(email: &str, iss: &str, aud: &str) -> Value {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        serde_json::json!({
            "email": email,
            "iss": iss,
            "aud": aud,
            "exp": exp,
        })
    }

    #[tokio::test]
    async fn invoker_token_passes() {
        let verifier = DispatchVerifier::hs256_for_tests(AUDIENCE, INVOKER, SECRET);
        let token = token(claims(INVOKER, GOOGLE_ISSUER, AUDIENCE), SECRET);
        assert!(verifier.verify_token(&token).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_email_is_rejected() {
        let verifier = DispatchVerifier::hs256_for_tests(AUDIENCE, INVOKER, SECRET);
        let token = token(claims("intruder@evil.dev", GOOGLE_ISSUER, AUDIENCE), SECRET);
        assert!(matches!(
            verifier.verify_token(&token).await,
            Err(AuthError::NotInvoker)
        ));
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let verifier = DispatchVerifier::hs256_for_tests(AUDIENCE, INVOKER, SECRET);
        let token = token(claims(INVOKER, GOOGLE_ISSUER, "https://other.app"), SECRET);
        assert!(matches!(
            verifier.verify_token(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let verifier = DispatchVerifier::hs256_for_tests(AUDIENCE, INVOKER, SECRET);
        let token = token(claims(INVOKER, GOOGLE_ISSUER, AUDIENCE), "other-secret");
        assert!(matches!(
            verifier.verify_token(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let verifier = DispatchVerifier::hs256_for_tests(AUDIENCE, INVOKER, SECRET);
        let headers = HeaderMap::new();
        assert!(matches!(
            verifier.verify_headers(&headers).await,
            Err(AuthError::MissingBearerToken)
        ));
    }
}
