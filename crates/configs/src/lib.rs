use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_internal_path")]
    pub internal_path: String,
    /// Address of the `/healthz` + `/metrics` listener; disabled when absent.
    #[serde(default)]
    pub admin_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            worker_threads: Some(4),
            base_path: default_base_path(),
            internal_path: default_internal_path(),
            admin_addr: None,
        }
    }
}

fn default_base_path() -> String { "/api".into() }
fn default_internal_path() -> String { "/internal".into() }

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 600 }
fn default_max_lifetime() -> u64 { 3600 }
fn default_acquire_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// Deployment topology: which services run in this process and where the others live.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub local: Vec<String>,
    #[serde(default)]
    pub rest: HashMap<String, RestEndpointConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RestEndpointConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub path: String,
    #[serde(default = "default_internal_path")]
    pub internal_path: String,
}

fn default_protocol() -> String { "http".into() }

impl RestEndpointConfig {
    /// `protocol://host:port` without a trailing slash.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Memory,
    Outbox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// topic (producing service name) -> consuming services
    #[serde(default)]
    pub consumers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            poll_interval_ms: default_poll_interval(),
            consumers: HashMap::new(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_poll_interval() -> u64 { 1000 }

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_base_ms: 100, backoff_max_ms: 5000 }
    }
}

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    load_from_str(&content)
}

pub fn load_from_str(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        if self.storage.backend == StorageBackend::Postgres || self.queue.backend == QueueBackend::Outbox {
            self.database.normalize_from_env();
            self.database.validate()?;
        }
        self.services.validate()?;
        self.queue.validate()?;
        Ok(())
    }
}

fn normalize_path(p: &mut String, fallback: &str) {
    let trimmed = p.trim().trim_end_matches('/');
    *p = if trimmed.is_empty() {
        fallback.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        if let Some(w) = self.worker_threads {
            if w == 0 { self.worker_threads = Some(4); }
        } else {
            self.worker_threads = Some(4);
        }
        normalize_path(&mut self.base_path, "/api");
        normalize_path(&mut self.internal_path, "/internal");
        if self.base_path == self.internal_path {
            return Err(anyhow!("server.base_path and server.internal_path must differ"));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn normalize_from_env(&mut self) {
        if self.url.trim().is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                self.url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("database.url is empty; set it in config.toml or DATABASE_URL"));
        }
        let lower = self.url.to_lowercase();
        if !(lower.starts_with("postgresql://") || lower.starts_with("postgres://")) {
            return Err(anyhow!("database.url must start with postgresql:// or postgres://"));
        }
        if self.min_connections == 0 {
            return Err(anyhow!("database.min_connections must be >= 1"));
        }
        if self.max_connections < self.min_connections {
            return Err(anyhow!("database.max_connections must be >= min_connections"));
        }
        if self.connect_timeout_secs == 0 || self.acquire_timeout_secs == 0 {
            return Err(anyhow!("database timeouts must be positive seconds"));
        }
        Ok(())
    }
}

impl ServicesConfig {
    fn validate(&mut self) -> Result<()> {
        for name in &self.local {
            if name.trim().is_empty() {
                return Err(anyhow!("services.local contains an empty name"));
            }
            if self.rest.contains_key(name) {
                return Err(anyhow!("service `{name}` is registered both local and rest"));
            }
        }
        for (name, ep) in self.rest.iter_mut() {
            if ep.protocol != "http" && ep.protocol != "https" {
                return Err(anyhow!("services.rest.{name}.protocol must be http or https"));
            }
            if ep.host.trim().is_empty() {
                return Err(anyhow!("services.rest.{name}.host is empty"));
            }
            if ep.port == 0 {
                return Err(anyhow!("services.rest.{name}.port must be within 1..=65535"));
            }
            normalize_path(&mut ep.path, "/api");
            normalize_path(&mut ep.internal_path, "/internal");
        }
        Ok(())
    }
}

impl QueueConfig {
    fn validate(&mut self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = default_poll_interval();
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("queue.retry.max_attempts must be >= 1"));
        }
        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return Err(anyhow!("queue.retry.backoff_max_ms must be >= backoff_base_ms"));
        }
        Ok(())
    }
}
