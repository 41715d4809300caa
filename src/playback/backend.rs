//! Audio backends and the process-wide link to the configured one.
//!
//! The link follows `Disconnected -> Connecting -> {Connected | Failed}`.
//! Only [BackendLink::connect_with_retry] changes the status to anything but
//! `Disconnected`.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::instrument;

use crate::error::{BackendError, SessionError};
use crate::lib;

/// Where the audio of a [Track] can be streamed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocator {
    /// A direct media url, streamed as is.
    Direct(String),
    /// A web page that still needs extraction before streaming.
    Page(String),
}

impl StreamLocator {
    pub fn url(&self) -> &str {
        match self {
            Self::Direct(url) | Self::Page(url) => url,
        }
    }
}

/// A resolved, playable piece of audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub locator: StreamLocator,
    pub duration: Option<Duration>,
}

impl Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.duration {
            Some(dur) => write!(f, "{} {}", self.title, lib::format_duration(&dur)),
            None => write!(f, "{}", self.title),
        }
    }
}

/// Something that turns a query into a [Track].
#[async_trait]
pub trait AudioBackend: Send + Sync + Debug {
    /// Check that the backend is reachable.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Look `query` up as given. `Ok(None)` means the backend found nothing.
    async fn lookup(&self, query: &str) -> Result<Option<Track>, BackendError>;

    /// Rewrite `query` into an explicit search request.
    fn search_directive(&self, query: &str) -> String {
        format!("ytsearch:{query}")
    }
}

/// Status of the link to the audio backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// How many times to try reaching the backend and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A single attempt, used when a command finds the link down.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3))
    }
}

/// How long a single probe or lookup may take before the backend counts as unreachable.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Shared handle to the configured [AudioBackend] and its status.
pub struct BackendLink {
    backend: Option<Arc<dyn AudioBackend>>,
    status: watch::Sender<NodeStatus>,
    /// Held while probing so connects never overlap.
    connecting: Mutex<()>,
    /// Upper bound for every backend call.
    call_timeout: Duration,
}

impl BackendLink {
    /// `None` means no backend is configured, every use fails with
    /// [SessionError::BackendUnavailable].
    pub fn new(backend: Option<Arc<dyn AudioBackend>>) -> Self {
        let (status, _) = watch::channel(NodeStatus::Disconnected);
        Self {
            backend,
            status,
            connecting: Mutex::new(()),
            call_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    /// Probe the backend until it answers, up to `policy` attempts.
    #[instrument(skip(self))]
    pub async fn connect_with_retry(&self, policy: RetryPolicy) -> Result<(), SessionError> {
        let Some(backend) = &self.backend else {
            self.status.send_replace(NodeStatus::Failed);
            tracing::error!("No audio backend configured, playback is disabled.");
            return Err(unavailable("no backend configured"));
        };

        let _guard = self.connecting.lock().await;
        if self.status() == NodeStatus::Connected {
            return Ok(());
        }
        self.status.send_replace(NodeStatus::Connecting);

        let max = policy.max_attempts;
        for attempt in 1..=max {
            match bounded(self.call_timeout, backend.probe()).await {
                Ok(()) => {
                    self.status.send_replace(NodeStatus::Connected);
                    tracing::info!("Connected to audio backend on attempt {attempt}/{max}.");
                    return Ok(());
                }
                Err(e) => tracing::warn!("Audio backend attempt {attempt}/{max} failed: {e}"),
            }
            if attempt < max {
                tokio::time::sleep(policy.delay).await;
            }
        }

        self.status.send_replace(NodeStatus::Failed);
        tracing::error!("Audio backend unreachable after {max} attempts.");
        Err(unavailable(format!("unreachable after {max} attempts")))
    }

    /// The backend, if the link is up. A link that is down gets one more probe.
    pub async fn ensure_ready(&self) -> Result<Arc<dyn AudioBackend>, SessionError> {
        match self.status() {
            NodeStatus::Connected => {}
            NodeStatus::Connecting => return Err(unavailable("still connecting")),
            NodeStatus::Disconnected | NodeStatus::Failed => {
                self.connect_with_retry(RetryPolicy::once()).await?
            }
        }
        self.backend
            .clone()
            .ok_or_else(|| unavailable("no backend configured"))
    }

    /// Look `query` up on `backend`, giving up once the call timeout passes.
    pub async fn lookup(
        &self,
        backend: &dyn AudioBackend,
        query: &str,
    ) -> Result<Option<Track>, BackendError> {
        bounded(self.call_timeout, backend.lookup(query)).await
    }

    /// Forget a connection that stopped answering so the next use re-probes.
    pub fn mark_lost(&self) {
        let was_connected = self.status.send_if_modified(|status| {
            let connected = *status == NodeStatus::Connected;
            if connected {
                *status = NodeStatus::Disconnected;
            }
            connected
        });
        if was_connected {
            tracing::warn!("Lost the audio backend, will reconnect on next use.");
        }
    }
}

impl Debug for BackendLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendLink")
            .field("backend", &self.backend)
            .field("status", &self.status())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// Run a backend call, failing with [BackendError::TimedOut] after `limit`.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| BackendError::TimedOut { after: limit })?
}

fn unavailable(reason: impl Into<String>) -> SessionError {
    SessionError::BackendUnavailable {
        reason: reason.into(),
    }
}
