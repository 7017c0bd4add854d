//! Secret resolution with an in-process cache.
//!
//! The core needs exactly one capability from the deployment's secret store:
//! `get(name) -> String`. Production reads Google Secret Manager; local
//! development reads process environment variables. Both sit behind
//! [`CachingSecretStore`], which caches resolved values for five minutes and
//! can be reset from tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Default cache lifetime for resolved secrets.
pub const DEFAULT_SECRET_TTL: Duration = Duration::from_secs(5 * 60);

/// Read access to named secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolves a secret by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret does not exist or cannot be fetched.
    async fn get(&self, name: &str) -> Result<String>;
}

/// Environment-backed secret store for local development.
///
/// Secret names are mapped to environment variables by uppercasing and
/// replacing `-` with `_` (`tasks-webhook-secret` → `TASKS_WEBHOOK_SECRET`).
#[derive(Debug, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    /// Creates a new environment-backed store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn env_name(name: &str) -> String {
        name.to_ascii_uppercase().replace('-', "_")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, name: &str) -> Result<String> {
        let var = Self::env_name(name);
        std::env::var(&var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::secret(format!("environment variable {var} is not set")))
    }
}

/// Google Secret Manager response payload.
#[derive(Debug, serde::Deserialize)]
struct AccessSecretResponse {
    payload: SecretPayload,
}

#[derive(Debug, serde::Deserialize)]
struct SecretPayload {
    data: String,
}

/// Secret Manager HTTP client.
///
/// Fetches `projects/{project}/secrets/{name}/versions/latest` using
/// application-default credentials.
pub struct GcpSecretStore {
    project_id: String,
    token_provider: Arc<dyn gcp_auth::TokenProvider>,
    client: reqwest::Client,
}

impl std::fmt::Debug for GcpSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpSecretStore")
            .field("project_id", &self.project_id)
            .field("token_provider", &"<TokenProvider>")
            .finish_non_exhaustive()
    }
}

impl GcpSecretStore {
    /// Creates a new Secret Manager client.
    ///
    /// # Errors
    ///
    /// Returns an error if GCP credentials cannot be discovered or the HTTP
    /// client cannot be constructed.
    pub async fn new(project_id: impl Into<String>) -> Result<Self> {
        let token_provider = gcp_auth::provider()
            .await
            .map_err(|e| Error::secret(format!("failed to initialize GCP auth: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::secret(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            project_id: project_id.into(),
            token_provider,
            client,
        })
    }
}

#[async_trait]
impl SecretStore for GcpSecretStore {
    async fn get(&self, name: &str) -> Result<String> {
        let scopes = &["https://www.googleapis.com/auth/cloud-platform"];
        let token = self
            .token_provider
            .token(scopes)
            .await
            .map_err(|e| Error::secret(format!("failed to get GCP access token: {e}")))?;

        let url = format!(
            "https://secretmanager.googleapis.com/v1/projects/{}/secrets/{}/versions/latest:access",
            self.project_id, name
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| Error::secret(format!("secret manager request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::secret(format!(
                "secret manager returned {status} for {name}"
            )));
        }

        let body: AccessSecretResponse = response
            .json()
            .await
            .map_err(|e| Error::secret(format!("failed to parse secret payload: {e}")))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.payload.data)
            .map_err(|e| Error::secret(format!("secret payload is not base64: {e}")))?;

        String::from_utf8(bytes)
            .map_err(|e| Error::secret(format!("secret payload is not utf-8: {e}")))
    }
}

#[derive(Debug, Clone)]
struct CachedSecret {
    value: String,
    fetched_at: Instant,
}

/// Caching wrapper around any [`SecretStore`].
///
/// Values are cached for [`DEFAULT_SECRET_TTL`] (or a custom TTL). The cache
/// is process-scoped; tests call [`CachingSecretStore::reset`] between cases.
pub struct CachingSecretStore {
    inner: Arc<dyn SecretStore>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedSecret>>,
}

impl std::fmt::Debug for CachingSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingSecretStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CachingSecretStore {
    /// Wraps a store with the default five-minute TTL.
    #[must_use]
    pub fn new(inner: Arc<dyn SecretStore>) -> Self {
        Self::with_ttl(inner, DEFAULT_SECRET_TTL)
    }

    /// Wraps a store with a custom TTL.
    #[must_use]
    pub fn with_ttl(inner: Arc<dyn SecretStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Clears all cached values.
    pub async fn reset(&self) {
        self.cache.write().await.clear();
    }
}

#[async_trait]
impl SecretStore for CachingSecretStore {
    async fn get(&self, name: &str) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(name) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        let value = self.inner.get(name).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            name.to_string(),
            CachedSecret {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(value)
    }
}
