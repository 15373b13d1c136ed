//! Streaming with retries, falling back to queued ingestion.
//!
//! The control flow is an explicit state machine. [`transition`] is a pure
//! function over ([`ManagedState`], [`ManagedEvent`]); the ingestor only
//! performs the I/O each state calls for and feeds the outcome back in.
//!
//! ```text
//! Streaming ──ok──────────────────────────▶ Succeeded(streaming)
//!   │  └─transient─▶ Retrying ──elapsed──▶ Streaming
//!   ├─too large / disabled / exhausted──▶ FallbackQueued ──ok──▶ Succeeded(queued)
//!   └─permanent / cancelled────────────▶ Failed ◀──err────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kingest_core::config::ManagedConfig;
use kingest_core::{
    CallContext, Disposition, IngestError, IngestionProperties, IngestionResult, IngestionSource,
    RetryPolicy, SourceMeta,
};

use crate::ingestor::Ingestor;
use crate::payload::{into_source, prepare, Payload, Prepared};
use crate::streaming::Streamer;

/// Why a source went to the queued path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Declared or observed size above the streaming ceiling.
    TooLarge,
    /// Source shape streaming cannot take (blob reference, zip archive).
    Unstreamable,
    /// The service reported streaming is off for the table or cluster.
    StreamingDisabled,
    /// Every streaming attempt failed transiently.
    RetriesExhausted,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackReason::TooLarge => "too_large",
            FallbackReason::Unstreamable => "unstreamable",
            FallbackReason::StreamingDisabled => "streaming_disabled",
            FallbackReason::RetriesExhausted => "retries_exhausted",
        })
    }
}

#[derive(Debug)]
pub enum ManagedState {
    /// About to make streaming attempt `attempt` (1-based).
    Streaming { attempt: u32 },
    /// Attempt `attempt` failed transiently; wait `delay` before the next.
    Retrying {
        attempt: u32,
        delay: Duration,
        last: IngestError,
    },
    /// Handing the source to the queued path after `attempts` streaming
    /// attempts.
    FallbackQueued {
        attempts: u32,
        reason: FallbackReason,
    },
    Succeeded { result: IngestionResult },
    Failed { error: IngestError },
}

#[derive(Debug)]
pub enum ManagedEvent {
    StreamOk(IngestionResult),
    StreamErr(IngestError),
    BackoffElapsed,
    QueuedOk(IngestionResult),
    QueuedErr(IngestError),
    /// The caller's token fired or its deadline passed.
    Cancelled(IngestError),
}

impl ManagedState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ManagedState::Succeeded { .. } | ManagedState::Failed { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            ManagedState::Streaming { .. } => "streaming",
            ManagedState::Retrying { .. } => "retrying",
            ManagedState::FallbackQueued { .. } => "fallback_queued",
            ManagedState::Succeeded { .. } => "succeeded",
            ManagedState::Failed { .. } => "failed",
        }
    }

    /// The caller's outcome once terminal; the state itself otherwise.
    pub fn finish(self) -> Result<Result<IngestionResult, IngestError>, ManagedState> {
        match self {
            ManagedState::Succeeded { result } => Ok(Ok(result)),
            ManagedState::Failed { error } => Ok(Err(error)),
            running => Err(running),
        }
    }
}

fn fallback_reason(error: &IngestError) -> FallbackReason {
    if error.is_streaming_disabled() {
        FallbackReason::StreamingDisabled
    } else if matches!(
        error,
        IngestError::SizeExceeded { .. } | IngestError::Service { status: 413, .. }
    ) {
        FallbackReason::TooLarge
    } else {
        FallbackReason::Unstreamable
    }
}

/// Next state for `event` observed in `state`. Terminal states absorb every
/// event; events that do not apply to a state leave it unchanged.
pub fn transition(state: ManagedState, event: ManagedEvent, policy: &RetryPolicy) -> ManagedState {
    use ManagedEvent as E;
    use ManagedState as S;

    match (state, event) {
        (terminal, _) if terminal.is_terminal() => terminal,
        (_, E::Cancelled(error)) => S::Failed { error },

        (S::Streaming { attempt }, E::StreamOk(mut result)) => {
            result.streaming_attempts = attempt;
            S::Succeeded { result }
        }
        (S::Streaming { attempt }, E::StreamErr(error)) => match error.disposition() {
            Disposition::Fallback => S::FallbackQueued {
                attempts: attempt,
                reason: fallback_reason(&error),
            },
            Disposition::Retry if attempt < policy.max_attempts => S::Retrying {
                attempt,
                delay: policy.backoff_delay(attempt),
                last: error,
            },
            Disposition::Retry => S::FallbackQueued {
                attempts: attempt,
                reason: FallbackReason::RetriesExhausted,
            },
            Disposition::Fail => S::Failed { error },
        },
        (S::Retrying { attempt, .. }, E::BackoffElapsed) => S::Streaming {
            attempt: attempt + 1,
        },
        (S::FallbackQueued { attempts, .. }, E::QueuedOk(mut result)) => {
            result.streaming_attempts = attempts;
            S::Succeeded { result }
        }
        (S::FallbackQueued { .. }, E::QueuedErr(error)) => S::Failed { error },

        (state, event) => {
            debug!(state = state.name(), ?event, "Event does not apply, ignoring");
            state
        }
    }
}

fn skip_streaming(reason: FallbackReason) -> ManagedState {
    ManagedState::FallbackQueued {
        attempts: 0,
        reason,
    }
}

/// Streams when it can, queues when it must.
pub struct ManagedStreamingIngestor<S, Q> {
    streamer: Arc<S>,
    queued: Arc<Q>,
    config: ManagedConfig,
    /// (database, table) -> streaming skipped until this instant.
    streaming_disabled: Mutex<HashMap<(String, String), Instant>>,
}

impl<S: Streamer, Q: Ingestor> ManagedStreamingIngestor<S, Q> {
    pub fn new(streamer: Arc<S>, queued: Arc<Q>, config: ManagedConfig) -> Self {
        Self {
            streamer,
            queued,
            config,
            streaming_disabled: Mutex::new(HashMap::new()),
        }
    }

    fn target(props: &IngestionProperties) -> (String, String) {
        (props.database.clone(), props.table.clone())
    }

    fn is_streaming_disabled(&self, props: &IngestionProperties) -> bool {
        let mut disabled = self
            .streaming_disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = Self::target(props);
        match disabled.get(&key) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                disabled.remove(&key);
                false
            }
            None => false,
        }
    }

    fn mark_streaming_disabled(&self, props: &IngestionProperties) {
        let until = Instant::now() + self.config.streaming_disabled_ttl;
        self.streaming_disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::target(props), until);
        warn!(
            database = %props.database,
            table = %props.table,
            ttl_secs = self.config.streaming_disabled_ttl.as_secs(),
            "Streaming disabled for table, routing to queued ingestion"
        );
    }

    async fn stream_attempt(
        &self,
        payload: &Payload,
        meta: SourceMeta,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> ManagedEvent {
        if let Err(e) = ctx.check() {
            return ManagedEvent::Cancelled(e);
        }
        match self.streamer.stream_payload(payload, props, ctx).await {
            Ok(()) => ManagedEvent::StreamOk(IngestionResult::streamed(meta.id, props, 0)),
            Err(e) if ctx.check().is_err() => ManagedEvent::Cancelled(e),
            Err(e) => ManagedEvent::StreamErr(e),
        }
    }

    /// Drive the streaming states until the machine leaves them.
    async fn stream_with_retries(
        &self,
        payload: &Payload,
        meta: SourceMeta,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> ManagedState {
        let policy = &self.config.retry;
        let mut state = ManagedState::Streaming { attempt: 1 };
        loop {
            let event = match &state {
                ManagedState::Streaming { attempt } => {
                    debug!(source_id = %meta.id, attempt, "Streaming attempt");
                    self.stream_attempt(payload, meta, props, ctx).await
                }
                ManagedState::Retrying {
                    attempt,
                    delay,
                    last,
                } => {
                    warn!(
                        source_id = %meta.id,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %last,
                        "Streaming attempt failed, backing off"
                    );
                    match ctx.sleep(*delay).await {
                        Ok(()) => ManagedEvent::BackoffElapsed,
                        Err(e) => ManagedEvent::Cancelled(e),
                    }
                }
                _ => return state,
            };
            state = transition(state, event, policy);
        }
    }
}

#[async_trait]
impl<S: Streamer, Q: Ingestor> Ingestor for ManagedStreamingIngestor<S, Q> {
    async fn ingest(
        &self,
        source: IngestionSource,
        props: &IngestionProperties,
        ctx: &CallContext,
    ) -> Result<IngestionResult, IngestError> {
        props.validate()?;
        ctx.check()?;

        let policy = &self.config.retry;
        let (meta, kind) = source.into_parts();

        let (mut state, fallback) = if self.is_streaming_disabled(props) {
            let source = IngestionSource::from_parts(meta, kind);
            (skip_streaming(FallbackReason::StreamingDisabled), source)
        } else {
            let limit = self.streamer.max_payload_bytes();
            let prepared = ctx
                .run(self.streamer.read_timeout(), prepare(meta, kind, limit))
                .await?;
            match prepared {
                Prepared::Buffered { payload, origin } => {
                    let state = self.stream_with_retries(&payload, meta, props, ctx).await;
                    (state, into_source(meta, payload, origin))
                }
                Prepared::TooLarge(source) => (skip_streaming(FallbackReason::TooLarge), source),
                Prepared::Unstreamable(source) => {
                    (skip_streaming(FallbackReason::Unstreamable), source)
                }
            }
        };

        if let ManagedState::FallbackQueued { attempts, reason } = state {
            if reason == FallbackReason::StreamingDisabled && attempts > 0 {
                self.mark_streaming_disabled(props);
            }
            info!(
                source_id = %meta.id,
                reason = %reason,
                streaming_attempts = attempts,
                "Falling back to queued ingestion"
            );
            let event = match self.queued.ingest(fallback, props, ctx).await {
                Ok(result) => ManagedEvent::QueuedOk(result),
                Err(e) => ManagedEvent::QueuedErr(e),
            };
            state = transition(state, event, policy);
        }

        match state.finish() {
            Ok(outcome) => {
                if let Ok(result) = &outcome {
                    debug!(
                        source_id = %result.source_id,
                        strategy = %result.strategy,
                        attempts = result.streaming_attempts,
                        "Managed ingestion finished"
                    );
                }
                outcome
            }
            Err(stuck) => Err(IngestError::Unsupported {
                strategy: "managed",
                reason: format!("ingestion stopped in state {}", stuck.name()),
            }),
        }
    }
}
