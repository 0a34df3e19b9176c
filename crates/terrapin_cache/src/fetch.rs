//! Downloads with bounded, fixed-delay retries.
//!
//! `reqwest`'s gzip support advertises `Accept-Encoding: gzip` on every
//! request and decompresses response bodies before they reach us, which the
//! remote registries require.

use std::{
    path::Path,
    time::{Duration, SystemTime},
};

use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use terrapin_networking::retry_policies::{RetryDecision, RetryPolicy};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::CacheError;

/// Fetches `url` into memory. Used for checksum and signature documents.
pub(crate) async fn fetch_bytes(
    client: &ClientWithMiddleware,
    url: &str,
    retry_policy: &(impl RetryPolicy + Send + Sync),
) -> Result<Vec<u8>, CacheError> {
    with_retries(url, retry_policy, || async {
        let response = send(client, url).await?;
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|source| CacheError::Fetch {
                url: url.to_owned(),
                source: source.into(),
            })
    })
    .await
}

/// Streams `url` to `destination`, truncating any previous attempt.
pub(crate) async fn download_archive(
    client: &ClientWithMiddleware,
    url: &str,
    destination: &Path,
    retry_policy: &(impl RetryPolicy + Send + Sync),
) -> Result<(), CacheError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CacheError::CreateDir {
                path: parent.to_owned(),
                source,
            })?;
    }

    with_retries(url, retry_policy, || async {
        let response = send(client, url).await?;
        let write_err = |source| CacheError::WriteArchive {
            path: destination.to_owned(),
            source,
        };
        let mut file = tokio::fs::File::create(destination).await.map_err(write_err)?;
        let mut reader = StreamReader::new(
            response.bytes_stream().map_err(std::io::Error::other),
        );
        tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        Ok(())
    })
    .await
}

async fn send(
    client: &ClientWithMiddleware,
    url: &str,
) -> Result<reqwest::Response, CacheError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| CacheError::Fetch {
            url: url.to_owned(),
            source,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(CacheError::FetchStatus {
            url: url.to_owned(),
            status,
        });
    }
    Ok(response)
}

async fn with_retries<T, F, Fut>(
    url: &str,
    retry_policy: &(impl RetryPolicy + Send + Sync),
    attempt: F,
) -> Result<T, CacheError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, CacheError>>,
{
    let request_start = SystemTime::now();
    let mut attempts_made = 0;
    loop {
        attempts_made += 1;
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_transient(&err) {
            return Err(err);
        }
        let execute_after = match retry_policy.should_retry(request_start, attempts_made) {
            RetryDecision::Retry { execute_after } => execute_after,
            RetryDecision::DoNotRetry => return Err(err),
        };
        let delay = execute_after
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        // Presigned download URLs can carry tokens in their query string.
        let display_url = url::Url::parse(url)
            .map(|parsed| terrapin_networking::redaction::redact_url(&parsed).to_string())
            .unwrap_or_else(|_| url.to_owned());
        tracing::warn!(
            url = display_url,
            attempt = attempts_made,
            error = %err,
            "fetch failed, retrying in {delay:?}"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Whether another attempt could plausibly succeed: connection-level
/// failures, timeouts and upstream 5xx/429/408 responses.
fn is_transient(error: &CacheError) -> bool {
    match error {
        CacheError::Fetch {
            source: reqwest_middleware::Error::Reqwest(err),
            ..
        } => err.is_timeout() || err.is_connect(),
        CacheError::FetchStatus { status, .. } => {
            status.is_server_error()
                || *status == StatusCode::TOO_MANY_REQUESTS
                || *status == StatusCode::REQUEST_TIMEOUT
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::IntoFuture,
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use assert_matches::assert_matches;
    use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
    use terrapin_networking::{retry_policies::FixedInterval, CredentialStore};

    use super::{download_archive, fetch_bytes};
    use crate::CacheError;

    #[derive(Clone)]
    struct Flaky {
        hits: Arc<AtomicUsize>,
        fail_first: usize,
    }

    async fn flaky_payload(State(state): State<Flaky>) -> impl IntoResponse {
        let hit = state.hits.fetch_add(1, Ordering::SeqCst);
        if hit < state.fail_first {
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        } else {
            (StatusCode::OK, b"payload".to_vec())
        }
    }

    async fn spawn_upstream(fail_first: usize) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/payload", get(flaky_payload))
            .with_state(Flaky {
                hits: hits.clone(),
                fail_first,
            });
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router).into_future());
        (addr, hits)
    }

    fn client() -> reqwest_middleware::ClientWithMiddleware {
        terrapin_networking::default_client(CredentialStore::default())
    }

    #[tokio::test]
    async fn retries_transient_upstream_errors() {
        let (addr, hits) = spawn_upstream(2).await;
        let policy = FixedInterval::new(Duration::from_millis(1), 5);
        let bytes = fetch_bytes(&client(), &format!("http://{addr}/payload"), &policy)
            .await
            .unwrap();
        assert_eq!(bytes, b"payload");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_bound() {
        let (addr, hits) = spawn_upstream(usize::MAX).await;
        let policy = FixedInterval::new(Duration::from_millis(1), 3);
        let result = fetch_bytes(&client(), &format!("http://{addr}/payload"), &policy).await;
        assert_matches!(result, Err(CacheError::FetchStatus { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_documents_are_not_retried() {
        let (addr, hits) = spawn_upstream(0).await;
        let policy = FixedInterval::new(Duration::from_millis(1), 5);
        let result = fetch_bytes(&client(), &format!("http://{addr}/nope"), &policy).await;
        assert_matches!(
            result,
            Err(CacheError::FetchStatus {
                status: StatusCode::NOT_FOUND,
                ..
            })
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn downloads_to_the_destination_path() {
        let (addr, _) = spawn_upstream(0).await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("providers/archive.zip");
        let policy = FixedInterval::new(Duration::from_millis(1), 1);
        download_archive(
            &client(),
            &format!("http://{addr}/payload"),
            &destination,
            &policy,
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(destination).unwrap(), b"payload");
    }
}
