use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::retry::RetryPolicy;

/// 4 MiB, the service's streaming request ceiling.
pub const DEFAULT_MAX_STREAMING_BYTES: u64 = 4 * 1024 * 1024;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_secs(profile: &str, key: &str, default: u64) -> Duration {
    Duration::from_secs(profiled_env_u64(profile, key, default))
}

fn profiled_env_millis(profile: &str, key: &str, default: u64) -> Duration {
    Duration::from_millis(profiled_env_u64(profile, key, default))
}

fn retry_from_env(p: &str, prefix: &str, attempts: u32) -> RetryPolicy {
    RetryPolicy::new(profiled_env_u32(p, &format!("{prefix}_RETRY_ATTEMPTS"), attempts))
        .base_delay(profiled_env_millis(p, &format!("{prefix}_RETRY_BASE_MS"), 500))
        .max_delay(profiled_env_millis(p, &format!("{prefix}_RETRY_MAX_MS"), 10_000))
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub profile: String,
    pub engine: EngineConfig,
    pub resources: ResourceConfig,
    pub queued: QueuedConfig,
    pub streaming: StreamingConfig,
    pub managed: ManagedConfig,
}

impl IngestConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `KINGEST_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("KINGEST_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            engine: EngineConfig::from_env_profiled(p),
            resources: ResourceConfig::from_env_profiled(p),
            queued: QueuedConfig::from_env_profiled(p),
            streaming: StreamingConfig::from_env_profiled(p),
            managed: ManagedConfig::from_env_profiled(p),
        }
    }

    /// Defaults against a given engine endpoint, no environment lookups.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            profile: String::new(),
            engine: EngineConfig {
                ingest_endpoint: derive_ingest_endpoint(&endpoint),
                endpoint,
                request_timeout: Duration::from_secs(60),
            },
            resources: ResourceConfig::default(),
            queued: QueuedConfig::default(),
            streaming: StreamingConfig::default(),
            managed: ManagedConfig::default(),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs. Endpoints carry no secrets.
    pub fn log_summary(&self) {
        tracing::info!("Ingest config loaded (profile: {}):", self.profile_label());
        tracing::info!("  engine:     endpoint={}", self.engine.endpoint);
        tracing::info!("  ingest:     endpoint={}", self.engine.ingest_endpoint);
        tracing::info!("  resources:  ttl={:?}", self.resources.ttl);
        tracing::info!(
            "  streaming:  max_bytes={}, timeout={:?}",
            self.streaming.max_bytes,
            self.streaming.request_timeout
        );
        tracing::info!("  queued:     attempts={}", self.queued.retry.max_attempts);
        tracing::info!("  managed:    attempts={}", self.managed.retry.max_attempts);
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Query/streaming endpoint, e.g. `https://cluster.region.kusto.windows.net`.
    pub endpoint: String,
    /// Data-management endpoint serving resource discovery.
    pub ingest_endpoint: String,
    pub request_timeout: Duration,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let endpoint = profiled_env_or(p, "KINGEST_ENDPOINT", "http://localhost:8080");
        let ingest_endpoint = profiled_env_opt(p, "KINGEST_INGEST_ENDPOINT")
            .unwrap_or_else(|| derive_ingest_endpoint(&endpoint));
        Self {
            endpoint,
            ingest_endpoint,
            request_timeout: profiled_env_secs(p, "KINGEST_REQUEST_TIMEOUT_SECS", 60),
        }
    }
}

/// `https://c.r.kusto.windows.net` → `https://ingest-c.r.kusto.windows.net`.
/// Localhost, IP and already-prefixed hosts are returned unchanged.
pub fn derive_ingest_endpoint(endpoint: &str) -> String {
    let Ok(mut url) = Url::parse(endpoint) else {
        return endpoint.to_string();
    };
    let Some(host) = url.host_str().map(str::to_string) else {
        return endpoint.to_string();
    };
    let is_named = url.domain().is_some() && host.contains('.');
    if !is_named || host.starts_with("ingest-") {
        return endpoint.to_string();
    }
    if url.set_host(Some(&format!("ingest-{host}"))).is_err() {
        return endpoint.to_string();
    }
    url.as_str().trim_end_matches('/').to_string()
}

// ── Resource cache ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Upper bound on how long a discovered set is used.
    pub ttl: Duration,
    /// Minimum gap between refresh attempts while serving a stale set.
    pub failure_retry_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            failure_retry_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ResourceConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            ttl: profiled_env_secs(p, "KINGEST_RESOURCE_TTL_SECS", d.ttl.as_secs()),
            failure_retry_interval: profiled_env_secs(
                p,
                "KINGEST_RESOURCE_RETRY_SECS",
                d.failure_retry_interval.as_secs(),
            ),
            request_timeout: profiled_env_secs(
                p,
                "KINGEST_RESOURCE_TIMEOUT_SECS",
                d.request_timeout.as_secs(),
            ),
        }
    }
}

// ── Queued ingestion ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedConfig {
    pub retry: RetryPolicy,
    pub upload_timeout: Duration,
    pub enqueue_timeout: Duration,
    /// Part size for multi-part file uploads.
    pub upload_chunk_bytes: usize,
}

impl Default for QueuedConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(3),
            upload_timeout: Duration::from_secs(600),
            enqueue_timeout: Duration::from_secs(30),
            upload_chunk_bytes: 8 * 1024 * 1024,
        }
    }
}

impl QueuedConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            retry: retry_from_env(p, "KINGEST_QUEUED", d.retry.max_attempts),
            upload_timeout: profiled_env_secs(
                p,
                "KINGEST_UPLOAD_TIMEOUT_SECS",
                d.upload_timeout.as_secs(),
            ),
            enqueue_timeout: profiled_env_secs(
                p,
                "KINGEST_ENQUEUE_TIMEOUT_SECS",
                d.enqueue_timeout.as_secs(),
            ),
            upload_chunk_bytes: profiled_env_u64(
                p,
                "KINGEST_UPLOAD_CHUNK_BYTES",
                d.upload_chunk_bytes as u64,
            ) as usize,
        }
    }
}

// ── Streaming ingestion ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub max_bytes: u64,
    pub request_timeout: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_STREAMING_BYTES,
            request_timeout: Duration::from_secs(600),
        }
    }
}

impl StreamingConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_bytes: profiled_env_u64(p, "KINGEST_STREAMING_MAX_BYTES", d.max_bytes),
            request_timeout: profiled_env_secs(
                p,
                "KINGEST_STREAMING_TIMEOUT_SECS",
                d.request_timeout.as_secs(),
            ),
        }
    }
}

// ── Managed streaming ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedConfig {
    /// Streaming attempts before falling back to queued ingestion.
    pub retry: RetryPolicy,
    /// How long a table that rejected streaming is routed straight to queued.
    pub streaming_disabled_ttl: Duration,
}

impl Default for ManagedConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(3)
                .base_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(30)),
            streaming_disabled_ttl: Duration::from_secs(600),
        }
    }
}

impl ManagedConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        let retry = RetryPolicy::new(profiled_env_u32(
            p,
            "KINGEST_MANAGED_RETRY_ATTEMPTS",
            d.retry.max_attempts,
        ))
        .base_delay(profiled_env_millis(p, "KINGEST_MANAGED_RETRY_BASE_MS", 1_000))
        .max_delay(profiled_env_millis(p, "KINGEST_MANAGED_RETRY_MAX_MS", 30_000));
        Self {
            retry,
            streaming_disabled_ttl: profiled_env_secs(
                p,
                "KINGEST_STREAMING_DISABLED_TTL_SECS",
                d.streaming_disabled_ttl.as_secs(),
            ),
        }
    }
}
