// Axum HTTP surface: federated search, per-provider search and transcoded streams.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{MatchedPath, Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::spotify::SpotifyProvider;
use crate::api::youtube::YouTubeProvider;
use crate::api::{LoadedTrack, Provider};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::federator::{normalize, Federator};
use crate::models::Version;
use crate::range::{apply_range_headers, resolve_range, RangeOutcome, RangedBody};
use crate::recovery::load_with_recovery;
use crate::transcode::Transcoder;
use crate::util::{base_url, estimate_size};

static AUDIO_DURATION: HeaderName = HeaderName::from_static("audio-duration");

pub struct AppState {
    pub config: Config,
    pub federator: Federator,
    pub transcoder: Transcoder,
}

impl AppState {
    pub fn new(config: Config, providers: Vec<Arc<dyn Provider>>) -> Self {
        let transcoder = Transcoder::new(config.transcoder.clone());
        Self {
            config,
            federator: Federator::new(providers),
            transcoder,
        }
    }

    /// Register every provider that has credentials configured.
    pub fn from_config(config: Config) -> Self {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        let spotify = SpotifyProvider::new(config.spotify.clone());
        if spotify.is_authenticated() {
            providers.push(Arc::new(spotify));
        } else {
            warn!("Spotify credentials missing; Spotify provider disabled");
        }

        let youtube = YouTubeProvider::new(config.youtube.clone());
        if youtube.is_authenticated() {
            providers.push(Arc::new(youtube));
        } else {
            warn!("YouTube API key missing; YouTube provider disabled");
        }

        Self::new(config, providers)
    }
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let mut protected = Router::new().route("/search", get(search_all));
    for p in state.federator.providers() {
        protected = protected
            .route(p.search_path(), get(search_one))
            .route(p.stream_path(), get(stream_get).head(stream_head));
    }
    let protected = protected.route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/version", get(version))
        .merge(protected)
        .with_state(state)
}

/// Bind `server.bind` and serve until ctrl-c. Refuses to start without
/// credentials.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    if config.auth.is_none() {
        anyhow::bail!(
            "no credentials configured: set [auth] username/password or both GATEWAY_USERNAME and GATEWAY_PASSWORD"
        );
    }
    let bind = config.server.bind.clone();
    let state = Arc::new(AppState::from_config(config));
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

/// HTTP basic auth. Without configured credentials every request is rejected.
async fn require_auth(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    if let Some(expected) = state.config.auth.as_ref() {
        if let Some((user, pass)) = basic_credentials(req.headers()) {
            if user == expected.username && pass == expected.password {
                return next.run(req).await;
            }
        }
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"Authentication Required\"")],
        "Unauthorized Access",
    )
        .into_response()
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

async fn version() -> Json<Version> {
    Json(Version::current())
}

/// Base for playback URLs: configured public URL or the request's host.
fn request_base(config: &Config, headers: &HeaderMap) -> String {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    base_url(
        config.server.public_url.as_deref(),
        &config.server.public_scheme,
        host,
    )
}

fn search_params(
    params: &HashMap<String, String>,
    default_limit: u32,
) -> std::result::Result<(String, u32), Response> {
    let query = match params.get("q").filter(|q| !q.is_empty()) {
        Some(q) => q.clone(),
        None => return Err(GatewayError::MissingParam("q".into()).into_response()),
    };
    let limit = match params.get("limit") {
        None => default_limit,
        Some(raw) => match raw.parse::<u32>() {
            Ok(l) => l,
            Err(_) => {
                return Err((StatusCode::BAD_REQUEST, "Invalid 'limit' query param").into_response())
            }
        },
    };
    Ok((query, limit))
}

/// GET /search: every provider, limit split evenly.
async fn search_all(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (query, limit) = match search_params(&params, state.config.server.default_search_limit) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let base = request_base(&state.config, &headers);
    let results = state.federator.search(&query, limit, &base).await;
    Json(results).into_response()
}

/// GET /search/{provider}: one provider with the full limit. Errors are surfaced.
async fn search_one(
    State(state): State<SharedState>,
    matched: MatchedPath,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(provider) = state.federator.by_path(matched.as_str()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let (query, limit) = match search_params(&params, state.config.server.default_search_limit) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let base = request_base(&state.config, &headers);
    match provider.search(&query, limit).await {
        Ok(hits) => Json(normalize(provider.as_ref(), hits, &base)).into_response(),
        Err(e) => {
            warn!("{} search failed: {}", provider.name(), e);
            e.into_response()
        }
    }
}

/// A loaded track with its declared size and the non-range response headers.
struct PreparedStream {
    track: LoadedTrack,
    id: String,
    source: String,
    declared: u64,
    headers: HeaderMap,
}

async fn prepare_stream(
    state: &AppState,
    path: &str,
    params: &HashMap<String, String>,
) -> Result<PreparedStream> {
    let provider = state
        .federator
        .by_path(path)
        .ok_or_else(|| GatewayError::NotFound(path.to_string()))?;
    let raw = params
        .get(provider.id_param())
        .or_else(|| params.get("trackId"))
        .ok_or_else(|| GatewayError::MissingParam(provider.id_param().to_string()))?;
    let id = provider
        .parse_id(raw)
        .ok_or_else(|| GatewayError::InvalidIdentifier {
            param: provider.id_param().to_string(),
            pattern: provider.id_pattern().to_string(),
        })?;

    let track = load_with_recovery(provider.as_ref(), &id).await?;
    let declared = estimate_size(
        track.duration_secs,
        track.bitrate_kbps,
        state.transcoder.size_offset(),
    );

    let download = params.get("download").map(|v| is_truthy(v)).unwrap_or(false);
    let format = state.transcoder.output_format();
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(format)));
    headers.insert(AUDIO_DURATION.clone(), HeaderValue::from(track.duration_secs));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&track.title, format, download),
    );

    Ok(PreparedStream {
        track,
        id,
        source: provider.name().to_string(),
        declared,
        headers,
    })
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

fn range_not_satisfiable(declared: u64) -> Response {
    let mut resp = GatewayError::RangeUnsatisfiable { size: declared }.into_response();
    if let Ok(v) = HeaderValue::from_str(&format!("bytes */{}", declared)) {
        resp.headers_mut().insert(header::CONTENT_RANGE, v);
    }
    resp
}

/// GET stream: transcode and serve (a slice of) the declared-size body.
async fn stream_get(
    State(state): State<SharedState>,
    matched: MatchedPath,
    Query(params): Query<HashMap<String, String>>,
    req_headers: HeaderMap,
) -> Response {
    let label = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let prepared = match prepare_stream(&state, matched.as_str(), &params).await {
        Ok(p) => p,
        Err(e) => {
            warn!("[{}] stream request rejected: {}", label, e);
            return e.into_response();
        }
    };
    let PreparedStream {
        track,
        id,
        source,
        declared,
        mut headers,
    } = prepared;

    let outcome = resolve_range(range_header(&req_headers), declared);
    if outcome == RangeOutcome::Unsatisfiable {
        return range_not_satisfiable(declared);
    }
    let (status, range) = apply_range_headers(outcome, declared, &mut headers);
    info!(
        "[{}] streaming {} {} ({}s @ {}kbps) declared={} range={:?}",
        label, source, id, track.duration_secs, track.bitrate_kbps, declared, range
    );

    let Some(range) = range else {
        return (status, headers).into_response();
    };
    let LoadedTrack {
        audio,
        bitrate_kbps,
        input_format,
        ..
    } = track;
    let stream = match state
        .transcoder
        .start(audio, &input_format, bitrate_kbps, declared, &label)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            error!("[{}] transcoder start failed: {}", label, e);
            return e.into_response();
        }
    };
    let body = Body::from_stream(RangedBody::new(stream, range));
    (status, headers, body).into_response()
}

/// HEAD stream: same headers as GET, no transcoder spawned.
async fn stream_head(
    State(state): State<SharedState>,
    matched: MatchedPath,
    Query(params): Query<HashMap<String, String>>,
    req_headers: HeaderMap,
) -> Response {
    let prepared = match prepare_stream(&state, matched.as_str(), &params).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let declared = prepared.declared;
    let mut headers = prepared.headers;
    let outcome = resolve_range(range_header(&req_headers), declared);
    if outcome == RangeOutcome::Unsatisfiable {
        return range_not_satisfiable(declared);
    }
    let (status, _) = apply_range_headers(outcome, declared, &mut headers);
    (status, headers).into_response()
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn content_type_for(format: &str) -> &'static str {
    match format {
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "aac" | "adts" => "audio/aac",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// `inline|attachment; filename="<title>.<ext>"` plus an RFC 5987 UTF-8 form.
fn content_disposition(title: &str, ext: &str, download: bool) -> HeaderValue {
    let kind = if download { "attachment" } else { "inline" };
    let ascii: String = title
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    let value = format!(
        "{}; filename=\"{}.{}\"; filename*=UTF-8''{}.{}",
        kind,
        ascii,
        ext,
        urlencoding::encode(title),
        ext
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("inline"))
}
