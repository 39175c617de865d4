use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors surfaced by providers, the transcoder and the request pipeline.
///
/// Anything raised before response headers are committed is mapped to a
/// status code via [`GatewayError::status`]. Failures after that point never
/// reach the client as an error; the transcode bridge pads instead.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Missing '{0}' query param")]
    MissingParam(String),

    #[error("Invalid {param} param, expected {pattern}")]
    InvalidIdentifier { param: String, pattern: String },

    #[error("track {0} not found")]
    NotFound(String),

    /// The provider session is invalid or expired. Retried once by
    /// session recovery before it becomes `UpstreamFailure`.
    #[error("session failure: {0}")]
    SessionFailure(String),

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("range not satisfiable for {size} bytes")]
    RangeUnsatisfiable { size: u64 },

    #[error("transcoder failed: {0}")]
    Transcode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingParam(_)
            | GatewayError::InvalidIdentifier { .. }
            | GatewayError::NotFound(_)
            | GatewayError::SessionFailure(_)
            | GatewayError::UpstreamFailure(_) => StatusCode::BAD_REQUEST,
            GatewayError::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            GatewayError::Transcode(_) | GatewayError::Http(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Plain-text error body with the mapped status.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_upstream_errors_are_bad_request() {
        assert_eq!(GatewayError::NotFound("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::UpstreamFailure("expired".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::RangeUnsatisfiable { size: 10 }.status(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(GatewayError::Transcode("boom".into()).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn invalid_identifier_message_names_param_and_pattern() {
        let e = GatewayError::InvalidIdentifier {
            param: "trackId".into(),
            pattern: "([a-zA-Z0-9]{22})".into(),
        };
        assert_eq!(e.to_string(), "Invalid trackId param, expected ([a-zA-Z0-9]{22})");
    }
}
