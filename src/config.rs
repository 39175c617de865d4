use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::spotify::AudioQuality;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_public_scheme")]
    pub public_scheme: String,
    /// Overrides the request `Host` when building playback URLs.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_search_limit")]
    pub default_search_limit: u32,
}

/// HTTP basic auth credentials every request except `/version` must carry.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscoderConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Argument template; `{input_format}`, `{bitrate}` and `{output_format}` are substituted.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_size_offset")]
    pub size_offset: u64,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_exit_grace")]
    pub exit_grace_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_spotify_auth_base")]
    pub auth_base: String,
    #[serde(default = "default_spotify_api_base")]
    pub api_base: String,
    /// Playable-content service that serves decrypted Ogg Vorbis for a track id.
    #[serde(default = "default_spotify_content_base")]
    pub content_base: String,
    #[serde(default)]
    pub quality: AudioQuality,
    #[serde(default)]
    pub market: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct YouTubeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_youtube_api_base")]
    pub api_base: String,
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    #[serde(default = "default_category_id")]
    pub category_id: String,
    #[serde(default = "default_ytdlp_format")]
    pub format: String,
}

fn default_log_dir() -> PathBuf { "/var/log/music-stream-gateway".into() }
fn default_bind() -> String { "0.0.0.0:8000".into() }
fn default_public_scheme() -> String { "https".into() }
fn default_search_limit() -> u32 { 20 }
fn default_program() -> String { "ffmpeg".into() }
fn default_output_format() -> String { "mp3".into() }
fn default_chunk_size() -> usize { 128 * 1024 }
fn default_size_offset() -> u64 { crate::util::SIZE_OFFSET }
fn default_startup_timeout() -> u64 { 30 }
fn default_exit_grace() -> u64 { 2000 }
fn default_spotify_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_spotify_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_spotify_content_base() -> String { "http://127.0.0.1:24879".into() }
fn default_youtube_api_base() -> String { "https://www.googleapis.com/youtube/v3".into() }
fn default_ytdlp_path() -> String { "yt-dlp".into() }
fn default_category_id() -> String { "10".into() }
fn default_ytdlp_format() -> String { "bestaudio[ext=webm]/bestaudio".into() }

fn default_args() -> Vec<String> {
    vec![
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "{input_format}",
        "-i",
        "pipe:0",
        "-vn",
        "-b:a",
        "{bitrate}k",
        "-f",
        "{output_format}",
        "pipe:1",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_scheme: default_public_scheme(),
            public_url: None,
            default_search_limit: default_search_limit(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            output_format: default_output_format(),
            chunk_size: default_chunk_size(),
            size_offset: default_size_offset(),
            startup_timeout_secs: default_startup_timeout(),
            exit_grace_ms: default_exit_grace(),
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_base: default_spotify_auth_base(),
            api_base: default_spotify_api_base(),
            content_base: default_spotify_content_base(),
            quality: AudioQuality::default(),
            market: None,
        }
    }
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_youtube_api_base(),
            ytdlp_path: default_ytdlp_path(),
            category_id: default_category_id(),
            format: default_ytdlp_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: None,
            transcoder: TranscoderConfig::default(),
            spotify: SpotifyConfig::default(),
            youtube: YouTubeConfig::default(),
            log_dir: default_log_dir(),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Load from `path` when given, otherwise defaults; secrets from the
    /// environment win over the file.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Override secrets from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = v;
        }
        if let Some(v) = non_empty("SPOTIFY_CLIENT_SECRET") {
            self.spotify.client_secret = v;
        }
        if let Some(v) = non_empty("YOUTUBE_API_KEY") {
            self.youtube.api_key = v;
        }
        match (non_empty("GATEWAY_USERNAME"), non_empty("GATEWAY_PASSWORD")) {
            (Some(username), Some(password)) => {
                self.auth = Some(AuthConfig { username, password });
            }
            (Some(username), None) => match self.auth.as_mut() {
                Some(a) => a.username = username,
                None => tracing::warn!("GATEWAY_USERNAME set without GATEWAY_PASSWORD or an [auth] section; ignored"),
            },
            (None, Some(password)) => match self.auth.as_mut() {
                Some(a) => a.password = password,
                None => tracing::warn!("GATEWAY_PASSWORD set without GATEWAY_USERNAME or an [auth] section; ignored"),
            },
            (None, None) => {}
        }
    }
}
