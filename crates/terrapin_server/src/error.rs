use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use terrapin_cache::CacheError;

/// Errors surfaced on the HTTP path. Cache-worker errors never appear here;
/// they stick to their entry and are collected by `wait_for_ready`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no configured source handles this provider")]
    NoSource,

    #[error("not found")]
    NotFound,

    #[error("this source does not serve archives directly")]
    NotImplemented,

    #[error("failed to reach upstream")]
    Upstream(#[source] reqwest_middleware::Error),

    #[error("upstream answered HTTP {0}")]
    UpstreamStatus(reqwest::StatusCode),

    #[error("upstream sent a malformed document: {0}")]
    Protocol(String),

    #[error("invalid upstream URL: {0}")]
    Url(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::NoSource | ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ServerError::Upstream(source) => {
                if is_unreachable(source) {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            ServerError::UpstreamStatus(_) | ServerError::Protocol(_) | ServerError::Url(_) => {
                StatusCode::BAD_GATEWAY
            }
            ServerError::Config(_) | ServerError::Cache(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        status.into_response()
    }
}

/// Whether the upstream could not be reached at all (as opposed to having
/// answered badly).
pub(crate) fn is_unreachable(error: &reqwest_middleware::Error) -> bool {
    match error {
        reqwest_middleware::Error::Reqwest(err) => err.is_connect() || err.is_timeout(),
        reqwest_middleware::Error::Middleware(_) => false,
    }
}
