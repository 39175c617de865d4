pub mod mock;
pub mod spotify;
pub mod youtube;

use std::fmt;
use std::pin::Pin;

use tokio::io::AsyncRead;

use crate::error::Result;

/// Raw encoded audio as delivered by a provider, before transcoding.
pub type RawAudio = Pin<Box<dyn AsyncRead + Send>>;

/// A search hit before normalization into a `SearchResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHit {
    pub id: String,
    pub title: String,
}

/// A resolved track: the upstream byte stream plus what is needed to size it.
pub struct LoadedTrack {
    pub audio: RawAudio,
    pub title: String,
    pub duration_secs: u64,
    /// Native bitrate of the upstream encoding, reused as the target bitrate.
    pub bitrate_kbps: u32,
    /// Container name understood by the transcoder (`ogg`, `webm`, ...).
    pub input_format: String,
}

impl fmt::Debug for LoadedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedTrack")
            .field("title", &self.title)
            .field("duration_secs", &self.duration_secs)
            .field("bitrate_kbps", &self.bitrate_kbps)
            .field("input_format", &self.input_format)
            .finish_non_exhaustive()
    }
}

/// Provider trait: the capability set the gateway needs from an upstream catalog.
/// Implementations: spotify::SpotifyProvider, youtube::YouTubeProvider, mock::MockProvider.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Display name, also used as `SearchResult.source`.
    fn name(&self) -> &str;

    /// Route serving this provider's streams.
    fn stream_path(&self) -> &'static str;

    /// Route searching only this provider.
    fn search_path(&self) -> &'static str;

    /// Query parameter carrying the identifier on `stream_path`.
    fn id_param(&self) -> &'static str {
        "trackId"
    }

    /// Extract this provider's canonical id from free-form input.
    fn parse_id(&self, input: &str) -> Option<String>;

    /// Pattern text reported when `parse_id` fails.
    fn id_pattern(&self) -> &'static str;

    /// Search the upstream catalog, at most `limit` hits in upstream order.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<RawHit>>;

    /// Resolve `id` to a raw audio stream. Fails with `NotFound` for a
    /// well-formed but unknown id and `SessionFailure` for a bad session.
    async fn load_track(&self, id: &str) -> Result<LoadedTrack>;

    /// Generation of the session currently in use; bumped by each rebuild.
    fn session_generation(&self) -> u64;

    /// Make sure a usable session is installed (building or refreshing it
    /// if needed) and return its generation. `load_track` right after this
    /// runs against that generation.
    async fn prepare_session(&self) -> Result<u64> {
        Ok(self.session_generation())
    }

    /// Rebuild the session unless it already moved past `observed_generation`.
    async fn reinitialize(&self, observed_generation: u64) -> Result<()>;
}
