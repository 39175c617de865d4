//! Provider session holder and the retry-once recovery around `load_track`.
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::api::{LoadedTrack, Provider};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Reinitializing,
}

/// Process-wide session for one provider.
///
/// Readers clone the current `Arc`; rebuilds are serialized by `rebuild`
/// and skipped when another caller already replaced the failed generation.
pub struct SessionCell<S> {
    current: RwLock<Option<Arc<S>>>,
    generation: AtomicU64,
    rebuilding: AtomicBool,
    rebuild: Mutex<()>,
}

impl<S> Default for SessionCell<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionCell<S> {
    /// An empty cell; the first `get_or_init` builds generation 1.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            rebuilding: AtomicBool::new(false),
            rebuild: Mutex::new(()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        if self.rebuilding.load(Ordering::Acquire) {
            SessionState::Reinitializing
        } else {
            SessionState::Ready
        }
    }

    /// Return the live session, building one if none exists yet.
    pub async fn get_or_init<F, Fut>(&self, build: F) -> Result<(Arc<S>, u64)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        {
            let g = self.current.read().await;
            if let Some(s) = g.as_ref() {
                return Ok((s.clone(), self.generation()));
            }
        }
        self.refresh(0, build).await
    }

    /// Replace the session if it is still at `observed`; otherwise return
    /// whatever a concurrent caller already installed.
    pub async fn refresh<F, Fut>(&self, observed: u64, build: F) -> Result<(Arc<S>, u64)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let _guard = self.rebuild.lock().await;
        let gen = self.generation();
        if gen != observed {
            if let Some(s) = self.current.read().await.as_ref() {
                return Ok((s.clone(), gen));
            }
        }

        self.rebuilding.store(true, Ordering::Release);
        let flag = RebuildingFlag(&self.rebuilding);
        let built = build().await;
        drop(flag);

        let session = Arc::new(built?);
        let mut g = self.current.write().await;
        *g = Some(session.clone());
        let gen = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Ok((session, gen))
    }
}

/// Clears the `rebuilding` flag when the rebuild ends, including when the
/// rebuilding future is dropped part way.
struct RebuildingFlag<'a>(&'a AtomicBool);

impl Drop for RebuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// `load_track` with one session rebuild and retry on `SessionFailure`.
/// A second session failure is reported as `UpstreamFailure`.
pub async fn load_with_recovery(provider: &dyn Provider, id: &str) -> Result<LoadedTrack> {
    let (reason, observed) = match first_attempt(provider, id).await {
        Ok(track) => return Ok(track),
        Err((GatewayError::SessionFailure(reason), observed)) => (reason, observed),
        Err((other, _)) => return Err(other),
    };
    warn!(
        "{} session failure loading {}: {}; reinitializing",
        provider.name(),
        id,
        reason
    );
    provider
        .reinitialize(observed)
        .await
        .map_err(|e| GatewayError::UpstreamFailure(format!("session rebuild failed: {}", e)))?;
    info!("{} session reinitialized, retrying {}", provider.name(), id);
    provider.load_track(id).await.map_err(|e| match e {
        GatewayError::SessionFailure(reason) => GatewayError::UpstreamFailure(reason),
        other => other,
    })
}

/// Load once, reporting on failure the session generation the load ran against.
async fn first_attempt(
    provider: &dyn Provider,
    id: &str,
) -> std::result::Result<LoadedTrack, (GatewayError, u64)> {
    let generation = match provider.prepare_session().await {
        Ok(g) => g,
        // No usable session was ever installed at this generation.
        Err(e) => return Err((e, provider.session_generation())),
    };
    provider.load_track(id).await.map_err(|e| (e, generation))
}
