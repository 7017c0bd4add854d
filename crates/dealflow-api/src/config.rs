//! Service configuration.
//!
//! All three services read the same environment at startup; each binary
//! uses the subset it needs. `LOCAL_DEV` flips three behaviors at once:
//! secrets come from the environment, OIDC verification on the worker is
//! bypassed, and queue jobs dispatch via direct HTTP to `WORKER_URL`.

use std::str::FromStr;

use dealflow_core::{Error, Result, TenantId};

/// Calendar used when admin requests omit one.
pub const DEFAULT_CALENDAR_ID: &str = "primary";

/// Database connection settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub name: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Maximum pool size.
    pub pool_max: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("pool_max", &self.pool_max)
            .finish()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "dealflow".to_string(),
            user: "dealflow".to_string(),
            password: String::new(),
            pool_max: 10,
        }
    }
}

/// Configuration shared by the three dealflow services.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default tenant UUID.
    pub tenant_id: TenantId,
    /// GCP project ID.
    pub project_id: Option<String>,
    /// Cloud Tasks region.
    pub region: String,
    /// Log tag for this process.
    pub service_name: String,
    /// Worker base URL (queue dispatch target).
    pub worker_url: String,
    /// Public base URL of the ingress service (webhook addresses).
    pub ingress_public_base_url: String,
    /// Service account minting OIDC tokens for queue dispatch.
    pub tasks_invoker_sa_email: Option<String>,
    /// Cloud Tasks queue name.
    pub queue_name: String,
    /// Model for research agents and memo synthesis.
    pub llm_model: String,
    /// Local development mode.
    pub local_dev: bool,
    /// HTTP listen port.
    pub http_port: u16,
    /// Database connection settings.
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant_id: TenantId::generate(),
            project_id: None,
            region: "us-central1".to_string(),
            service_name: "dealflow".to_string(),
            worker_url: "http://localhost:8082".to_string(),
            ingress_public_base_url: "http://localhost:8080".to_string(),
            tasks_invoker_sa_email: None,
            queue_name: "dealflow-jobs".to_string(),
            llm_model: "gpt-4o".to_string(),
            local_dev: false,
            http_port: 8080,
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `TENANT_ID` (default tenant UUID)
    /// - `PROJECT_ID`
    /// - `REGION`
    /// - `SERVICE_NAME`
    /// - `WORKER_URL`
    /// - `INGRESS_PUBLIC_BASE_URL`
    /// - `TASKS_INVOKER_SA_EMAIL`
    /// - `QUEUE_NAME`
    /// - `LLM_MODEL` (default "gpt-4o")
    /// - `LOCAL_DEV` (truthy enables local mode)
    /// - `HTTP_PORT`
    /// - `DATABASE_HOST` / `DATABASE_PORT` / `DATABASE_NAME` /
    ///   `DATABASE_USER` / `DATABASE_PASSWORD` / `DATABASE_POOL_MAX`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(tenant) = env_string("TENANT_ID") {
            config.tenant_id = TenantId::from_str(&tenant)?;
        }
        config.project_id = env_string("PROJECT_ID");
        if let Some(region) = env_string("REGION") {
            config.region = region;
        }
        if let Some(name) = env_string("SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(url) = env_string("WORKER_URL") {
            config.worker_url = url;
        }
        if let Some(url) = env_string("INGRESS_PUBLIC_BASE_URL") {
            config.ingress_public_base_url = url;
        }
        config.tasks_invoker_sa_email = env_string("TASKS_INVOKER_SA_EMAIL");
        if let Some(queue) = env_string("QUEUE_NAME") {
            config.queue_name = queue;
        }
        if let Some(model) = env_string("LLM_MODEL") {
            config.llm_model = model;
        }
        if let Some(local) = env_string("LOCAL_DEV") {
            config.local_dev = is_truthy(&local);
        }
        if let Some(port) = env_u16("HTTP_PORT")? {
            config.http_port = port;
        }

        if let Some(host) = env_string("DATABASE_HOST") {
            config.database.host = host;
        }
        if let Some(port) = env_u16("DATABASE_PORT")? {
            config.database.port = port;
        }
        if let Some(name) = env_string("DATABASE_NAME") {
            config.database.name = name;
        }
        if let Some(user) = env_string("DATABASE_USER") {
            config.database.user = user;
        }
        if let Some(password) = env_string("DATABASE_PASSWORD") {
            config.database.password = password;
        }
        if let Some(max) = env_u32("DATABASE_POOL_MAX")? {
            config.database.pool_max = max;
        }

        if !config.local_dev && config.tasks_invoker_sa_email.is_none() {
            return Err(Error::InvalidInput(
                "TASKS_INVOKER_SA_EMAIL is required unless LOCAL_DEV is set".to_string(),
            ));
        }

        Ok(config)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}
