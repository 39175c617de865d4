use serde::{Deserialize, Serialize};

/// One normalized search hit. `url` points back at this gateway's stream
/// endpoint for the hit, never at the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    #[serde(rename = "url")]
    pub playback_url: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
}

impl Version {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
