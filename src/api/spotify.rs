use super::{LoadedTrack, Provider, RawHit};
use crate::config::SpotifyConfig;
use crate::error::{GatewayError, Result};
use crate::ident::SPOTIFY_TRACK_ID;
use crate::recovery::SessionCell;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use futures::TryStreamExt;
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::StreamReader;

/// Preferred audio quality; maps onto the native Ogg Vorbis bitrate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Normal,
    High,
    #[default]
    VeryHigh,
}

impl AudioQuality {
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            AudioQuality::Normal => 96,
            AudioQuality::High => 160,
            AudioQuality::VeryHigh => 320,
        }
    }

    fn as_param(self) -> &'static str {
        match self {
            AudioQuality::Normal => "normal",
            AudioQuality::High => "high",
            AudioQuality::VeryHigh => "very_high",
        }
    }
}

/// An authenticated Spotify session: client-credentials bearer plus the
/// HTTP client it was issued on.
#[derive(Debug)]
pub struct SpotifySession {
    client: Client,
    access_token: String,
    expires_at: i64, // epoch seconds
}

impl SpotifySession {
    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn near_expiry(&self) -> bool {
        Utc::now().timestamp() + 30 >= self.expires_at
    }
}

/// Spotify provider: Web API for search and metadata, the playable-content
/// service for raw Ogg Vorbis audio.
pub struct SpotifyProvider {
    cfg: SpotifyConfig,
    session: SessionCell<SpotifySession>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Deserialize)]
struct ApiTrack {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    duration_ms: u64,
}

impl ApiTrack {
    fn display_title(&self) -> String {
        let artists = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} - {}", artists, self.name)
    }
}

impl SpotifyProvider {
    pub const STREAM_PATH: &'static str = "/stream/spotify";
    pub const SEARCH_PATH: &'static str = "/search/spotify";

    pub fn new(cfg: SpotifyConfig) -> Self {
        Self {
            cfg,
            session: SessionCell::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.cfg.client_id.is_empty() && !self.cfg.client_secret.is_empty()
    }

    /// Exchange client credentials for a fresh session.
    async fn build_session(&self) -> Result<SpotifySession> {
        let client = Client::new();
        let auth_header = format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.cfg.client_id, self.cfg.client_secret))
        );
        let url = format!("{}/api/token", self.cfg.auth_base);
        let resp = client
            .post(&url)
            .header(AUTHORIZATION, auth_header)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| GatewayError::SessionFailure(format!("token request: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::SessionFailure(format!(
                "Failed to obtain token: {} - {}",
                status, body
            )));
        }
        let tr: TokenResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::SessionFailure(format!("parse token json: {}", e)))?;
        info!("Spotify session established");
        Ok(SpotifySession {
            client,
            access_token: tr.access_token,
            expires_at: Utc::now().timestamp() + tr.expires_in,
        })
    }

    /// Current session, refreshed first if the token is about to expire.
    async fn session(&self) -> Result<(Arc<SpotifySession>, u64)> {
        let (s, gen) = self.session.get_or_init(|| self.build_session()).await?;
        if s.near_expiry() {
            debug!("Spotify token is near expiry, refreshing");
            return self.session.refresh(gen, || self.build_session()).await;
        }
        Ok((s, gen))
    }

    async fn search_once(&self, session: &SpotifySession, query: &str, limit: u32) -> Result<reqwest::Response> {
        let mut url = format!(
            "{}/search?q={}&type=track&limit={}",
            self.cfg.api_base,
            urlencoding::encode(query),
            limit
        );
        if let Some(market) = &self.cfg.market {
            url.push_str(&format!("&market={}", urlencoding::encode(market)));
        }
        Ok(session
            .client
            .get(&url)
            .header(AUTHORIZATION, session.bearer())
            .header(ACCEPT, "application/json")
            .send()
            .await?)
    }

    async fn fetch_track(&self, session: &SpotifySession, id: &str) -> Result<ApiTrack> {
        let url = format!("{}/tracks/{}", self.cfg.api_base, id);
        let resp = session
            .client
            .get(&url)
            .header(AUTHORIZATION, session.bearer())
            .send()
            .await
            .map_err(|e| GatewayError::SessionFailure(format!("track metadata: {}", e)))?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::UNAUTHORIZED => Err(GatewayError::SessionFailure(
                "track metadata rejected bearer".into(),
            )),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Err(GatewayError::NotFound(id.to_string())),
            s => Err(GatewayError::UpstreamFailure(format!("track metadata failed: {}", s))),
        }
    }

    async fn open_audio(&self, session: &SpotifySession, id: &str) -> Result<reqwest::Response> {
        let url = format!(
            "{}/audio/{}?quality={}",
            self.cfg.content_base,
            id,
            self.cfg.quality.as_param()
        );
        let resp = session
            .client
            .get(&url)
            .header(AUTHORIZATION, session.bearer())
            .send()
            .await
            .map_err(|e| GatewayError::SessionFailure(format!("content feeder: {}", e)))?;
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::SessionFailure(
                format!("content feeder rejected session: {}", resp.status()),
            )),
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound(id.to_string())),
            s => Err(GatewayError::UpstreamFailure(format!("content feeder failed: {}", s))),
        }
    }
}

#[async_trait]
impl Provider for SpotifyProvider {
    fn name(&self) -> &str {
        "Spotify"
    }
    fn stream_path(&self) -> &'static str {
        Self::STREAM_PATH
    }
    fn search_path(&self) -> &'static str {
        Self::SEARCH_PATH
    }
    fn parse_id(&self, input: &str) -> Option<String> {
        SPOTIFY_TRACK_ID.parse(input)
    }
    fn id_pattern(&self) -> &'static str {
        SPOTIFY_TRACK_ID.as_str()
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<RawHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // Web API caps a page at 50 items.
        let limit = limit.min(50);
        let (session, gen) = self.session().await?;
        let mut resp = self.search_once(&session, query, limit).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("Got 401 from Spotify search; refreshing session");
            let (session2, _) = self.session.refresh(gen, || self.build_session()).await?;
            resp = self.search_once(&session2, query, limit).await?;
        }
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamFailure(format!(
                "spotify search failed: {} => {}",
                status, txt
            )));
        }
        let j: serde_json::Value = resp.json().await?;
        let mut hits = Vec::new();
        if let Some(items) = j["tracks"]["items"].as_array() {
            for item in items {
                let track: ApiTrack = match serde_json::from_value(item.clone()) {
                    Ok(t) => t,
                    Err(e) => {
                        debug!("skipping malformed spotify item: {}", e);
                        continue;
                    }
                };
                let raw_id = track.id.clone().unwrap_or_else(|| track.uri.clone());
                if let Some(id) = SPOTIFY_TRACK_ID.parse(&raw_id) {
                    hits.push(RawHit {
                        id,
                        title: track.display_title(),
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn load_track(&self, id: &str) -> Result<LoadedTrack> {
        let (session, _) = self.session().await?;
        let track = self.fetch_track(&session, id).await?;
        let resp = self.open_audio(&session, id).await?;
        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        debug!("Spotify track {} loaded ({} ms)", id, track.duration_ms);
        Ok(LoadedTrack {
            audio: Box::pin(StreamReader::new(stream)),
            title: track.display_title(),
            duration_secs: track.duration_ms / 1000,
            bitrate_kbps: self.cfg.quality.bitrate_kbps(),
            input_format: "ogg".to_string(),
        })
    }

    fn session_generation(&self) -> u64 {
        self.session.generation()
    }

    async fn prepare_session(&self) -> Result<u64> {
        self.session().await.map(|(_, gen)| gen)
    }

    async fn reinitialize(&self, observed_generation: u64) -> Result<()> {
        self.session
            .refresh(observed_generation, || self.build_session())
            .await
            .map(|_| ())
    }
}
