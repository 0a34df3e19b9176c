//! The HTTP surface: routing, authentication and the endpoint handlers that
//! glue the Registry Protocol to the source handlers and the cache engine.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, RawQuery, Request, State},
    http::{header, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use terrapin_cache::ProviderCache;
use terrapin_registry::{Platform, Provider, ProviderAddress, ServiceDiscovery};
use tokio_util::io::ReaderStream;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use url::Url;

use crate::{
    error::ServerError,
    handlers::{RequestContext, SourceHandler},
    proxy::ReverseProxy,
};

/// Shared state of every request handler.
#[derive(Clone)]
pub struct ServerState {
    pub(crate) token: String,
    pub(crate) cache: ProviderCache,
    pub(crate) handlers: Arc<Vec<Box<dyn SourceHandler>>>,
    pub(crate) proxy: ReverseProxy,
    pub(crate) download_scheme: String,
}

impl ServerState {
    fn handler_for(&self, provider: &Provider) -> Result<&dyn SourceHandler, ServerError> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle(provider))
            .map(Box::as_ref)
            .ok_or(ServerError::NoSource)
    }
}

/// Builds the full router.
pub fn router(state: ServerState) -> Router {
    let provider_routes = Router::new()
        .route(
            "/{correlation_id}/{registry}/{namespace}/{name}/versions",
            get(get_versions),
        )
        .route(
            "/{correlation_id}/{registry}/{namespace}/{name}/{version}/download/{os}/{arch}",
            get(get_platform),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ));

    Router::new()
        .route("/.well-known/terraform.json", get(well_known))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .nest("/v1/providers", provider_routes)
        .route(
            "/downloads/provider/{remote_host}/{*remote_path}",
            get(download_provider),
        )
        .layer(middleware::map_request(normalize_empty_correlation))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Service discovery: the engine learns where the provider service lives.
async fn well_known() -> Json<ServiceDiscovery> {
    Json(ServiceDiscovery {
        providers_v1: Some("/v1/providers".to_owned()),
        modules_v1: None,
    })
}

/// Bearer-token authentication for the provider endpoints. Discovery and
/// downloads stay open: the engine fetches those without credentials.
async fn require_bearer_token(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.token);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(request).await
}

/// The engine spells "no correlation ID" as an empty path segment
/// (`/v1/providers//…`), which the route matcher cannot express. Collapse it
/// to the sentinel segment `-` before routing.
async fn normalize_empty_correlation(mut request: Request) -> Request {
    const PREFIX: &str = "/v1/providers//";
    let uri = request.uri();
    let Some(path_and_query) = uri.path_and_query() else {
        return request;
    };
    if let Some(rest) = path_and_query.path().strip_prefix(PREFIX) {
        let rewritten = match path_and_query.query() {
            Some(query) => format!("/v1/providers/-/{rest}?{query}"),
            None => format!("/v1/providers/-/{rest}"),
        };
        let mut parts = uri.clone().into_parts();
        if let Ok(rewritten) = rewritten.parse() {
            parts.path_and_query = Some(rewritten);
            if let Ok(uri) = Uri::from_parts(parts) {
                *request.uri_mut() = uri;
            }
        }
    }
    request
}

fn correlation(raw: &str) -> Option<&str> {
    match raw {
        "" | "-" => None,
        id => Some(id),
    }
}

fn request_context(headers: &axum::http::HeaderMap) -> RequestContext {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http")
        .to_owned();
    let authority = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
        .to_owned();
    RequestContext { scheme, authority }
}

async fn get_versions(
    State(state): State<ServerState>,
    Path((_correlation_id, registry, namespace, name)): Path<(String, String, String, String)>,
) -> Result<Response, ServerError> {
    let provider = Provider::new(
        ProviderAddress::new(registry, namespace, name),
        "",
        Platform::new("", ""),
    );
    state.handler_for(&provider)?.get_versions(&provider).await
}

#[allow(clippy::type_complexity)]
async fn get_platform(
    State(state): State<ServerState>,
    Path((correlation_id, registry, namespace, name, version, os, arch)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    headers: axum::http::HeaderMap,
) -> Result<Response, ServerError> {
    let provider = Provider::new(
        ProviderAddress::new(registry, namespace, name),
        version,
        Platform::new(os, arch),
    );
    let ctx = request_context(&headers);
    state
        .handler_for(&provider)?
        .get_platform(&ctx, &provider, correlation(&correlation_id))
        .await
}

/// Serves a cached archive from disk, or forwards the request to the remote
/// host it was addressed to.
async fn download_provider(
    State(state): State<ServerState>,
    Path((remote_host, remote_path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ServerError> {
    let mut path_and_query = remote_path;
    if let Some(query) = query {
        path_and_query = format!("{path_and_query}?{query}");
    }

    // A cache worker may already have fetched this archive.
    for scheme in ["https", "http"] {
        let candidate = format!("{scheme}://{remote_host}/{path_and_query}");
        if let Some(entry) = state.cache.entry_by_download_url(&candidate).await {
            if tokio::fs::metadata(&entry.archive_path).await.is_ok() {
                tracing::debug!(url = candidate, "serving archive from cache");
                return serve_archive(&entry.archive_path).await;
            }
        }
    }

    // Otherwise let a source proxy the bytes; mirrors answer 501 and are
    // skipped.
    for handler in state.handlers.iter() {
        match handler.download(&remote_host, &path_and_query).await {
            Err(ServerError::NotImplemented) => continue,
            other => return other,
        }
    }

    let target = Url::parse(&format!(
        "{}://{remote_host}/{path_and_query}",
        state.download_scheme
    ))
    .map_err(|err| ServerError::Url(err.to_string()))?;
    state.proxy.forward(target).await
}

async fn serve_archive(path: &std::path::Path) -> Result<Response, ServerError> {
    let file = tokio::fs::File::open(path).await?;
    let stream = ReaderStream::new(file);
    Ok((
        [(header::CONTENT_TYPE, "application/zip")],
        Body::from_stream(stream),
    )
        .into_response())
}
