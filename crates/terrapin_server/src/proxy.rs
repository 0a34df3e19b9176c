//! A thin reverse proxy on top of the outbound client.
//!
//! Two modes: streaming pass-through (archives, version listings) and
//! fetch-mutate-respond for JSON metadata documents. Incoming
//! `Accept-Encoding` headers are deliberately not forwarded — the outbound
//! client negotiates gzip itself and hands us decompressed bodies, which is
//! what allows the JSON mutation path to exist at all. Host-scoped bearer
//! credentials are attached by the client's middleware.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::error::ServerError;

#[derive(Clone)]
pub struct ReverseProxy {
    client: ClientWithMiddleware,
}

impl ReverseProxy {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self { client }
    }

    /// Forwards `target` and streams the upstream response back unchanged
    /// (status, content type and body).
    pub async fn forward(&self, target: Url) -> Result<Response, ServerError> {
        let upstream = self
            .client
            .get(target)
            .send()
            .await
            .map_err(ServerError::Upstream)?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = Response::builder().status(status);
        if let Some(content_type) = upstream.headers().get(header::CONTENT_TYPE) {
            response = response.header(header::CONTENT_TYPE, content_type);
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|err| ServerError::Protocol(err.to_string()))
    }

    /// Fetches `target`, which must answer a JSON object with status 200,
    /// applies `mutate` and responds with the mutated document.
    pub async fn forward_json(
        &self,
        target: Url,
        mutate: impl FnOnce(&mut serde_json::Map<String, serde_json::Value>),
    ) -> Result<Response, ServerError> {
        let mut document = self.fetch_json(target).await?;
        mutate(&mut document);
        Ok(Json(serde_json::Value::Object(document)).into_response())
    }

    /// Fetches `target` as a JSON object. Non-2xx upstream answers are
    /// protocol errors, not pass-through responses.
    pub async fn fetch_json(
        &self,
        target: Url,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ServerError> {
        let upstream = self
            .client
            .get(target)
            .send()
            .await
            .map_err(ServerError::Upstream)?;
        if !upstream.status().is_success() {
            return Err(ServerError::UpstreamStatus(upstream.status()));
        }
        match upstream
            .json::<serde_json::Value>()
            .await
            .map_err(|err| ServerError::Protocol(err.to_string()))?
        {
            serde_json::Value::Object(document) => Ok(document),
            other => Err(ServerError::Protocol(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{future::IntoFuture, net::SocketAddr};

    use axum::{http::StatusCode, routing::get, Json, Router};
    use terrapin_networking::CredentialStore;
    use url::Url;

    use super::ReverseProxy;
    use crate::error::ServerError;

    async fn spawn_upstream() -> SocketAddr {
        let router = Router::new()
            .route(
                "/doc.json",
                get(|| async { Json(serde_json::json!({"download_url": "relative.zip"})) }),
            )
            .route("/blob", get(|| async { "raw bytes" }))
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "gone") }),
            );
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router).into_future());
        addr
    }

    fn proxy() -> ReverseProxy {
        ReverseProxy::new(terrapin_networking::default_client(
            CredentialStore::default(),
        ))
    }

    #[tokio::test]
    async fn streams_bodies_and_statuses_through() {
        let addr = spawn_upstream().await;
        let response = proxy()
            .forward(Url::parse(&format!("http://{addr}/missing")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mutates_json_documents() {
        let addr = spawn_upstream().await;
        let response = proxy()
            .forward_json(
                Url::parse(&format!("http://{addr}/doc.json")).unwrap(),
                |document| {
                    document.insert(
                        "download_url".to_owned(),
                        serde_json::Value::String("rewritten".to_owned()),
                    );
                },
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["download_url"], "rewritten");
    }

    #[tokio::test]
    async fn upstream_connect_failures_map_to_service_unavailable() {
        let response = proxy()
            .forward(Url::parse("http://127.0.0.1:9/blob").unwrap())
            .await;
        let Err(error @ ServerError::Upstream(_)) = response else {
            panic!("expected an upstream error");
        };
        use axum::response::IntoResponse;
        assert_eq!(
            error.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
