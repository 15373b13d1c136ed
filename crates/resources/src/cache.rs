use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kingest_core::config::ResourceConfig;
use kingest_core::{CallContext, IngestError};

use crate::fetcher::ResourceFetcher;
use crate::model::IngestionResources;

struct RefreshFailure {
    message: String,
    transient: bool,
}

#[derive(Default)]
struct CacheState {
    current: Option<Arc<IngestionResources>>,
    expires_at: Option<Instant>,
    /// Bumped by every completed refresh, successful or not.
    generation: u64,
    last_failure: Option<RefreshFailure>,
    /// While serving a stale set, no refresh is attempted before this.
    retry_after: Option<Instant>,
}

impl CacheState {
    fn fresh(&self, now: Instant) -> Option<Arc<IngestionResources>> {
        match (&self.current, self.expires_at) {
            (Some(current), Some(expires_at)) if now < expires_at => Some(current.clone()),
            _ => None,
        }
    }

    fn stale_within_backoff(&self, now: Instant) -> Option<Arc<IngestionResources>> {
        match (&self.current, &self.last_failure, self.retry_after) {
            (Some(current), Some(_), Some(retry_after)) if now < retry_after => {
                Some(current.clone())
            }
            _ => None,
        }
    }

    /// What the most recent refresh produced, as seen by a caller that
    /// waited on it.
    fn outcome(&self) -> Result<Arc<IngestionResources>, IngestError> {
        match (&self.current, &self.last_failure) {
            (Some(current), _) => Ok(current.clone()),
            (None, Some(failure)) => Err(IngestError::ResourcesUnavailable {
                message: failure.message.clone(),
                transient: failure.transient,
            }),
            (None, None) => Err(IngestError::ResourcesUnavailable {
                message: "no resource refresh has completed".into(),
                transient: true,
            }),
        }
    }
}

/// Shared, lazily refreshed view of the ingestion resources.
///
/// Reads are a mutex-guarded `Arc` clone. When the set has expired, one
/// caller performs the refresh while the others wait on `refresh_gate` and
/// take whatever that refresh produced.
pub struct ResourceCache {
    fetcher: Arc<dyn ResourceFetcher>,
    config: ResourceConfig,
    state: Mutex<CacheState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl ResourceCache {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, config: ResourceConfig) -> Self {
        Self {
            fetcher,
            config,
            state: Mutex::new(CacheState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn get(&self, ctx: &CallContext) -> Result<Arc<IngestionResources>, IngestError> {
        ctx.check()?;

        let seen = {
            let state = self.lock();
            let now = Instant::now();
            if let Some(resources) = state.fresh(now).or_else(|| state.stale_within_backoff(now)) {
                return Ok(resources);
            }
            state.generation
        };

        let _gate = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => return Err(IngestError::Cancelled),
            gate = self.refresh_gate.lock() => gate,
        };

        {
            let state = self.lock();
            if state.generation != seen {
                debug!("Resource refresh completed while waiting");
                return state.outcome();
            }
        }

        self.refresh(ctx).await
    }

    /// Must be called with `refresh_gate` held.
    async fn refresh(&self, ctx: &CallContext) -> Result<Arc<IngestionResources>, IngestError> {
        info!("Refreshing ingestion resources");
        let fetched = ctx
            .run(self.config.request_timeout, self.fetcher.fetch())
            .await;

        let mut state = self.lock();
        match fetched {
            Ok(resources) => {
                let lifetime = self.lifetime(&resources);
                let resources = Arc::new(resources);
                state.current = Some(resources.clone());
                state.expires_at = Some(Instant::now() + lifetime);
                state.generation += 1;
                state.last_failure = None;
                state.retry_after = None;
                info!(
                    containers = resources.containers.len(),
                    queues = resources.queues.len(),
                    lifetime_secs = lifetime.as_secs(),
                    "Ingestion resources refreshed"
                );
                Ok(resources)
            }
            // The caller gave up; the refresh itself did not fail.
            Err(e) if ctx.check().is_err() => Err(e),
            Err(e) => {
                state.generation += 1;
                state.last_failure = Some(RefreshFailure {
                    message: e.to_string(),
                    transient: e.is_retryable(),
                });
                state.retry_after = Some(Instant::now() + self.config.failure_retry_interval);
                match &state.current {
                    Some(stale) => {
                        warn!(
                            error = %e,
                            retry_in_secs = self.config.failure_retry_interval.as_secs(),
                            "Resource refresh failed, serving stale resources"
                        );
                        Ok(stale.clone())
                    }
                    None => {
                        warn!(error = %e, "Resource refresh failed with nothing cached");
                        Err(e)
                    }
                }
            }
        }
    }

    /// min(ttl, time left on the earliest SAS). Already-expired SAS times
    /// are ignored.
    fn lifetime(&self, resources: &IngestionResources) -> Duration {
        let sas_left = resources
            .earliest_expiry()
            .and_then(|expiry| (expiry - Utc::now()).to_std().ok());
        match sas_left {
            Some(left) if left < self.config.ttl => left,
            _ => self.config.ttl,
        }
    }

    /// Force the next `get` to refresh.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.expires_at = None;
        state.retry_after = None;
    }

    /// True while a stale set is being served after a failed refresh.
    pub fn is_degraded(&self) -> bool {
        let state = self.lock();
        state.current.is_some() && state.last_failure.is_some()
    }
}
