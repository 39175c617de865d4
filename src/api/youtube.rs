use super::{LoadedTrack, Provider, RawHit};
use crate::config::YouTubeConfig;
use crate::error::{GatewayError, Result};
use crate::ident::YOUTUBE_VIDEO_ID;
use crate::recovery::SessionCell;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

/// Per-process YouTube session: the HTTP client used for the Data API and
/// for media downloads. Rebuilt after media URLs start getting rejected.
pub struct YouTubeSession {
    client: Client,
}

/// YouTube provider: Data API v3 for search, yt-dlp for stream resolution.
pub struct YouTubeProvider {
    cfg: YouTubeConfig,
    session: SessionCell<YouTubeSession>,
}

/// The subset of `yt-dlp --dump-single-json` output used here.
#[derive(Debug, Deserialize)]
struct ResolvedMedia {
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    abr: Option<f64>,
    url: String,
    #[serde(default)]
    ext: Option<String>,
}

impl ResolvedMedia {
    /// Container name for the transcoder's `-f`.
    fn input_format(&self) -> String {
        match self.ext.as_deref() {
            Some("m4a") | Some("mp4") => "mp4".to_string(),
            Some(other) => other.to_string(),
            None => "webm".to_string(),
        }
    }
}

impl YouTubeProvider {
    pub const STREAM_PATH: &'static str = "/stream/youtube";
    pub const SEARCH_PATH: &'static str = "/search/youtube";

    pub fn new(cfg: YouTubeConfig) -> Self {
        Self {
            cfg,
            session: SessionCell::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.cfg.api_key.is_empty()
    }

    async fn build_session(&self) -> Result<YouTubeSession> {
        let client = Client::builder()
            .build()
            .map_err(|e| GatewayError::SessionFailure(format!("http client: {}", e)))?;
        info!("YouTube session established");
        Ok(YouTubeSession { client })
    }

    async fn session(&self) -> Result<Arc<YouTubeSession>> {
        let (s, _) = self.session.get_or_init(|| self.build_session()).await?;
        Ok(s)
    }

    /// Run yt-dlp to resolve a video id into a direct media URL plus metadata.
    async fn resolve(&self, id: &str) -> Result<ResolvedMedia> {
        let watch_url = format!("https://www.youtube.com/watch?v={}", id);
        let output = Command::new(&self.cfg.ytdlp_path)
            .args(["--no-playlist", "--no-warnings", "--dump-single-json", "-f"])
            .arg(&self.cfg.format)
            .arg(&watch_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GatewayError::UpstreamFailure(format!("failed to run {}: {}", self.cfg.ytdlp_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_ytdlp_error(id, &stderr));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| GatewayError::UpstreamFailure(format!("parse yt-dlp json: {}", e)))
    }
}

/// Map yt-dlp's stderr onto the error taxonomy.
fn classify_ytdlp_error(id: &str, stderr: &str) -> GatewayError {
    let lower = stderr.to_lowercase();
    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("not available")
        || lower.contains("does not exist")
    {
        GatewayError::NotFound(id.to_string())
    } else if lower.contains("sign in") || lower.contains("403") || lower.contains("cookies") {
        GatewayError::SessionFailure(stderr.trim().to_string())
    } else {
        GatewayError::UpstreamFailure(format!("yt-dlp failed: {}", stderr.trim()))
    }
}

#[async_trait]
impl Provider for YouTubeProvider {
    fn name(&self) -> &str {
        "YouTube"
    }
    fn stream_path(&self) -> &'static str {
        Self::STREAM_PATH
    }
    fn search_path(&self) -> &'static str {
        Self::SEARCH_PATH
    }
    fn id_param(&self) -> &'static str {
        "videoId"
    }
    fn parse_id(&self, input: &str) -> Option<String> {
        YOUTUBE_VIDEO_ID.parse(input)
    }
    fn id_pattern(&self) -> &'static str {
        YOUTUBE_VIDEO_ID.as_str()
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<RawHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let session = self.session().await?;
        let url = format!(
            "{}/search?part=snippet&type=video&videoCategoryId={}&maxResults={}&q={}&key={}",
            self.cfg.api_base,
            urlencoding::encode(&self.cfg.category_id),
            limit.min(50),
            urlencoding::encode(query),
            urlencoding::encode(&self.cfg.api_key)
        );
        let resp = session.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamFailure(format!(
                "youtube search failed: {} => {}",
                status, txt
            )));
        }
        let j: serde_json::Value = resp.json().await?;
        let mut hits = Vec::new();
        if let Some(items) = j["items"].as_array() {
            for it in items {
                let id = it["id"]["videoId"].as_str();
                let title = it["snippet"]["title"].as_str();
                if let (Some(id), Some(title)) = (id, title) {
                    hits.push(RawHit {
                        id: id.to_string(),
                        title: title.to_string(),
                    });
                }
            }
        }
        Ok(hits.into_iter().take(limit as usize).collect())
    }

    async fn load_track(&self, id: &str) -> Result<LoadedTrack> {
        let media = self.resolve(id).await?;
        let session = self.session().await?;
        let resp = session
            .client
            .get(&media.url)
            .send()
            .await
            .map_err(|e| GatewayError::SessionFailure(format!("media request: {}", e)))?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(GatewayError::SessionFailure(format!(
                    "media url rejected: {}",
                    resp.status()
                )))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(GatewayError::NotFound(id.to_string())),
            s => return Err(GatewayError::UpstreamFailure(format!("media request failed: {}", s))),
        }

        let duration_secs = media.duration.unwrap_or(0.0).max(0.0) as u64;
        // abr is reported with decimals; the estimate only needs whole kbps.
        let bitrate_kbps = media.abr.unwrap_or(128.0).round().max(1.0) as u32;
        let input_format = media.input_format();
        debug!(
            "YouTube video {} resolved: {}s @ {}kbps ({})",
            id, duration_secs, bitrate_kbps, input_format
        );
        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(LoadedTrack {
            audio: Box::pin(StreamReader::new(stream)),
            title: media.title,
            duration_secs,
            bitrate_kbps,
            input_format,
        })
    }

    fn session_generation(&self) -> u64 {
        self.session.generation()
    }

    async fn prepare_session(&self) -> Result<u64> {
        let (_, gen) = self.session.get_or_init(|| self.build_session()).await?;
        Ok(gen)
    }

    async fn reinitialize(&self, observed_generation: u64) -> Result<()> {
        self.session
            .refresh(observed_generation, || self.build_session())
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ytdlp_errors_are_classified() {
        assert!(matches!(
            classify_ytdlp_error("x", "ERROR: [youtube] x: Video unavailable"),
            GatewayError::NotFound(_)
        ));
        assert!(matches!(
            classify_ytdlp_error("x", "ERROR: Sign in to confirm you're not a bot"),
            GatewayError::SessionFailure(_)
        ));
        assert!(matches!(
            classify_ytdlp_error("x", "ERROR: something else"),
            GatewayError::UpstreamFailure(_)
        ));
    }

    #[test]
    fn m4a_maps_to_mp4_demuxer() {
        let m = ResolvedMedia {
            title: String::new(),
            duration: None,
            abr: None,
            url: String::new(),
            ext: Some("m4a".into()),
        };
        assert_eq!(m.input_format(), "mp4");
    }
}
