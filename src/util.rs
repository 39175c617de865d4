use url::Url;

/// Container/frame overhead added to every size estimate.
pub const SIZE_OFFSET: u64 = 20_000;

/// Predict the transcoded byte count: kbps * 125 is bytes per second.
///
/// The result is advertised as `Content-Length` before anything is
/// transcoded, so the stream is padded or truncated to match it.
pub fn estimate_size(duration_secs: u64, bitrate_kbps: u32, offset: u64) -> u64 {
    duration_secs * u64::from(bitrate_kbps) * 125 + offset
}

/// Build a playback URL on this gateway: `<base><path>?<k>=<v>...`.
pub fn construct_url(base: &str, path: &str, params: &[(&str, &str)]) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    url.set_path(path);
    url.set_query(None);
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }
    Some(url.to_string())
}

/// Base URL (`scheme://host`) for playback links.
pub fn base_url(public_url: Option<&str>, scheme: &str, host: Option<&str>) -> String {
    match public_url {
        Some(u) => u.trim_end_matches('/').to_string(),
        None => format!("{}://{}", scheme, host.unwrap_or("localhost")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_url_with_query() {
        let u = construct_url("https://music.example.org", "/stream/spotify", &[("trackId", "abc")]);
        assert_eq!(u.as_deref(), Some("https://music.example.org/stream/spotify?trackId=abc"));
    }

    #[test]
    fn base_url_prefers_public_url() {
        assert_eq!(base_url(Some("http://gw:9000/"), "https", Some("other")), "http://gw:9000");
        assert_eq!(base_url(None, "https", Some("host:8000")), "https://host:8000");
    }
}
