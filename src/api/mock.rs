use super::{LoadedTrack, Provider, RawHit};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// A simple in-memory provider used in tests.
/// It serves fixed hits and fixed audio bytes, and can be told to fail
/// searches or to report a number of session failures before loading.
pub struct MockProvider {
    name: String,
    stream_path: &'static str,
    search_path: &'static str,
    hits: Vec<RawHit>,
    audio: Vec<u8>,
    duration_secs: u64,
    bitrate_kbps: u32,
    fail_search: bool,
    session_failures: AtomicU32,
    generation: AtomicU64,
    reinit_count: AtomicU32,
    search_limits: Mutex<Vec<u32>>,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stream_path: "/stream/mock",
            search_path: "/search/mock",
            hits: Vec::new(),
            audio: Vec::new(),
            duration_secs: 1,
            bitrate_kbps: 8,
            fail_search: false,
            session_failures: AtomicU32::new(0),
            generation: AtomicU64::new(1),
            reinit_count: AtomicU32::new(0),
            search_limits: Mutex::new(Vec::new()),
        }
    }

    pub fn with_paths(mut self, stream_path: &'static str, search_path: &'static str) -> Self {
        self.stream_path = stream_path;
        self.search_path = search_path;
        self
    }

    pub fn with_hits(mut self, hits: Vec<RawHit>) -> Self {
        self.hits = hits;
        self
    }

    pub fn with_audio(mut self, audio: Vec<u8>, duration_secs: u64, bitrate_kbps: u32) -> Self {
        self.audio = audio;
        self.duration_secs = duration_secs;
        self.bitrate_kbps = bitrate_kbps;
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    /// Make the next `n` loads fail with `SessionFailure`.
    pub fn with_session_failures(self, n: u32) -> Self {
        self.session_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Limits passed to `search`, in call order.
    pub fn search_limits(&self) -> Vec<u32> {
        self.search_limits.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reinit_count(&self) -> u32 {
        self.reinit_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn stream_path(&self) -> &'static str {
        self.stream_path
    }
    fn search_path(&self) -> &'static str {
        self.search_path
    }
    fn parse_id(&self, input: &str) -> Option<String> {
        crate::ident::YOUTUBE_VIDEO_ID.parse(input)
    }
    fn id_pattern(&self) -> &'static str {
        crate::ident::YOUTUBE_VIDEO_ID.as_str()
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<RawHit>> {
        info!("MockProvider {}: search {} (limit {})", self.name, query, limit);
        if let Ok(mut g) = self.search_limits.lock() {
            g.push(limit);
        }
        if self.fail_search {
            return Err(GatewayError::UpstreamFailure(format!("{} search unavailable", self.name)));
        }
        Ok(self.hits.iter().take(limit as usize).cloned().collect())
    }

    async fn load_track(&self, id: &str) -> Result<LoadedTrack> {
        info!("MockProvider {}: load {}", self.name, id);
        let pending = self.session_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.session_failures.store(pending - 1, Ordering::SeqCst);
            return Err(GatewayError::SessionFailure(format!("{} session expired", self.name)));
        }
        if id.starts_with("missing") {
            return Err(GatewayError::NotFound(id.to_string()));
        }
        Ok(LoadedTrack {
            audio: Box::pin(std::io::Cursor::new(self.audio.clone())),
            title: format!("{} track {}", self.name, id),
            duration_secs: self.duration_secs,
            bitrate_kbps: self.bitrate_kbps,
            input_format: "ogg".to_string(),
        })
    }

    fn session_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn reinitialize(&self, observed_generation: u64) -> Result<()> {
        let _ = self.generation.compare_exchange(
            observed_generation,
            observed_generation + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.reinit_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
