//! Extract canonical track identifiers from free-form input (bare ids, URIs, share links).
use once_cell::sync::Lazy;
use regex::Regex;

/// A fixed-shape identifier pattern for one provider.
pub struct TrackIdPattern {
    source: &'static str,
    regex: Lazy<Regex>,
}

impl TrackIdPattern {
    /// The pattern text, used in error messages.
    pub fn as_str(&self) -> &'static str {
        self.source
    }

    /// Return the first substring of `input` shaped like an identifier.
    /// Only the shape is checked; unknown ids fail later, at load time.
    pub fn parse(&self, input: &str) -> Option<String> {
        self.regex.find(input).map(|m| m.as_str().to_string())
    }
}

/// 22-character base62 Spotify track id.
pub static SPOTIFY_TRACK_ID: TrackIdPattern = TrackIdPattern {
    source: r"([a-zA-Z0-9]{22})",
    regex: Lazy::new(|| Regex::new(r"([a-zA-Z0-9]{22})").expect("valid spotify id regex")),
};

/// 11-character YouTube video id.
pub static YOUTUBE_VIDEO_ID: TrackIdPattern = TrackIdPattern {
    source: r"([a-zA-Z0-9_-]{11})",
    regex: Lazy::new(|| Regex::new(r"([a-zA-Z0-9_-]{11})").expect("valid youtube id regex")),
};
