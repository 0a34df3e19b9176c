//! End-to-end tests: a real bound server in front of a mock registry.

use std::{
    future::IntoFuture,
    io::Write,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use sha2::Sha256;
use terrapin_cache::ProviderCache;
use terrapin_networking::CredentialStore;
use terrapin_registry::{
    PlatformEntry, ProviderPackage, ServiceDiscovery, VersionEntry, VersionList,
};
use terrapin_server::{Server, ServerConfig, SourceConfig};
use terrapin_verify::compute_bytes_digest;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "test-token";
const BINARY_NAME: &str = "terraform-provider-aws_v5.36.0_x5";
const ARCHIVE_NAME: &str = "terraform-provider-aws_5.36.0_darwin_arm64.zip";

fn provider_zip() -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut cursor);
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
    writer.start_file(BINARY_NAME, options).unwrap();
    writer.write_all(b"provider binary").unwrap();
    writer.finish().unwrap();
    cursor.into_inner()
}

#[derive(Clone)]
struct MockRegistry {
    archive: bytes::Bytes,
    sums: String,
    package: Arc<std::sync::Mutex<Option<ProviderPackage>>>,
    archive_hits: Arc<AtomicUsize>,
}

async fn mock_well_known() -> Json<ServiceDiscovery> {
    Json(ServiceDiscovery {
        providers_v1: Some("/v1/providers".to_owned()),
        modules_v1: Some("/v1/modules".to_owned()),
    })
}

async fn mock_versions() -> Json<VersionList> {
    Json(VersionList {
        versions: vec![VersionEntry {
            version: "5.36.0".to_owned(),
            protocols: vec!["5.0".to_owned()],
            platforms: vec![PlatformEntry {
                os: "darwin".to_owned(),
                arch: "arm64".to_owned(),
            }],
        }],
    })
}

async fn mock_platform(State(state): State<MockRegistry>) -> Json<ProviderPackage> {
    Json(state.package.lock().unwrap().clone().expect("package set"))
}

async fn mock_archive(State(state): State<MockRegistry>) -> impl IntoResponse {
    state.archive_hits.fetch_add(1, Ordering::SeqCst);
    state.archive.clone()
}

async fn mock_sums(State(state): State<MockRegistry>) -> String {
    state.sums.clone()
}

/// Starts the mock registry and returns its address plus shared state.
async fn spawn_registry() -> (SocketAddr, MockRegistry) {
    let archive = provider_zip();
    let shasum = format!("{:x}", compute_bytes_digest::<Sha256>(&archive));
    let state = MockRegistry {
        archive: archive.into(),
        sums: format!("{shasum}  {ARCHIVE_NAME}\n"),
        package: Arc::new(std::sync::Mutex::new(None)),
        archive_hits: Arc::new(AtomicUsize::new(0)),
    };

    let router = Router::new()
        .route("/.well-known/terraform.json", get(mock_well_known))
        .route("/v1/providers/hashi/aws/versions", get(mock_versions))
        .route(
            "/v1/providers/hashi/aws/5.36.0/download/darwin/arm64",
            get(mock_platform),
        )
        .route("/archive.zip", get(mock_archive))
        .route("/sums", get(mock_sums))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, router).into_future());

    let shasum_for_package = shasum.clone();
    *state.package.lock().unwrap() = Some(ProviderPackage {
        protocols: vec!["5.0".to_owned()],
        os: "darwin".to_owned(),
        arch: "arm64".to_owned(),
        filename: ARCHIVE_NAME.to_owned(),
        download_url: format!("http://{addr}/archive.zip"),
        shasums_url: format!("http://{addr}/sums"),
        shasums_signature_url: String::new(),
        shasum: shasum_for_package,
        ..ProviderPackage::default()
    });
    (addr, state)
}

struct TestServer {
    addr: SocketAddr,
    cache: ProviderCache,
    cancel: CancellationToken,
    _dirs: Vec<tempfile::TempDir>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn spawn_server(sources: Option<Vec<SourceConfig>>) -> TestServer {
    let cache_dir = tempfile::tempdir().unwrap();
    let archive_dir = tempfile::tempdir().unwrap();

    let mut config = ServerConfig::new(
        "127.0.0.1:0".parse().unwrap(),
        TOKEN,
        cache_dir.path(),
        archive_dir.path(),
    );
    config.registry_scheme = "http".to_owned();
    if let Some(sources) = sources {
        config.sources = sources;
    }

    let server = Server::with_credentials(config, CredentialStore::default()).unwrap();
    let cache = server.cache().clone();

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = server.serve_on(listener, serve_cancel).await;
    });

    TestServer {
        addr,
        cache,
        cancel,
        _dirs: vec![cache_dir, archive_dir],
    }
}

fn authorized(client: &reqwest::Client, url: &str) -> reqwest::RequestBuilder {
    client.get(url).bearer_auth(TOKEN)
}

#[tokio::test]
async fn discovery_is_served_unauthenticated() {
    let server = spawn_server(None).await;
    let body: serde_json::Value = reqwest::get(server.url("/.well-known/terraform.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!({"providers.v1": "/v1/providers"}));
}

#[tokio::test]
async fn provider_endpoints_require_the_token() {
    let (registry, _) = spawn_registry().await;
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();
    let url = server.url(&format!("/v1/providers/cache/{registry}/hashi/aws/versions"));

    let unauthorized = client.get(&url).send().await.unwrap();
    assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong = client.get(&url).bearer_auth("nope").send().await.unwrap();
    assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

    let authorized = authorized(&client, &url).send().await.unwrap();
    assert_eq!(authorized.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn versions_are_proxied_from_the_registry() {
    let (registry, _) = spawn_registry().await;
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();

    let body = authorized(
        &client,
        &server.url(&format!("/v1/providers/cache/{registry}/hashi/aws/versions")),
    )
    .send()
    .await
    .unwrap()
    .text()
    .await
    .unwrap();
    assert!(
        body.contains(r#""version":"5.36.0","protocols":["5.0"]"#),
        "unexpected body: {body}"
    );
}

#[tokio::test]
async fn passthrough_rewrites_download_urls() {
    let (registry, _) = spawn_registry().await;
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();

    let response = authorized(
        &client,
        &server.url(&format!(
            "/v1/providers//{registry}/hashi/aws/5.36.0/download/darwin/arm64"
        )),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body["download_url"],
        format!(
            "http://{}/downloads/provider/{registry}/archive.zip",
            server.addr
        )
    );
    assert_eq!(
        body["shasums_url"],
        format!("http://{}/downloads/provider/{registry}/sums", server.addr)
    );
}

#[tokio::test]
async fn correlated_requests_lock_and_cache() {
    let (registry, mock) = spawn_registry().await;
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();
    let url = server.url(&format!(
        "/v1/providers/cache/{registry}/hashi/aws/5.36.0/download/darwin/arm64"
    ));

    let response = authorized(&client, &url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::LOCKED);
    assert!(response.bytes().await.unwrap().is_empty());

    let ready = server.cache.wait_for_ready("cache").await.unwrap();
    assert_eq!(ready.len(), 1);
    let binary = ready[0].package_dir.join(BINARY_NAME);
    assert_eq!(std::fs::read(&binary).unwrap(), b"provider binary");
    assert_eq!(mock.archive_hits.load(Ordering::SeqCst), 1);

    // A second request attaches to the existing entry, no refetch.
    let again = authorized(&client, &url).send().await.unwrap();
    assert_eq!(again.status(), reqwest::StatusCode::LOCKED);
    server.cache.wait_for_ready("cache").await.unwrap();
    assert_eq!(mock.archive_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_archives_are_served_from_disk() {
    let (registry, mock) = spawn_registry().await;
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();

    authorized(
        &client,
        &server.url(&format!(
            "/v1/providers/cache/{registry}/hashi/aws/5.36.0/download/darwin/arm64"
        )),
    )
    .send()
    .await
    .unwrap();
    server.cache.wait_for_ready("cache").await.unwrap();
    let fetches_so_far = mock.archive_hits.load(Ordering::SeqCst);

    let response = client
        .get(server.url(&format!("/downloads/provider/{registry}/archive.zip")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.bytes().await.unwrap();
    assert_eq!(body, mock.archive);
    assert_eq!(mock.archive_hits.load(Ordering::SeqCst), fetches_so_far);
}

#[tokio::test]
async fn filesystem_mirror_serves_and_stages() {
    let mirror = tempfile::tempdir().unwrap();
    let provider_dir = mirror.path().join("registry.example/hashi/null");
    std::fs::create_dir_all(&provider_dir).unwrap();
    std::fs::write(
        provider_dir.join("index.json"),
        r#"{"versions": {"5.36.0": {}}}"#,
    )
    .unwrap();
    std::fs::write(
        provider_dir.join("5.36.0.json"),
        r#"{"archives": {"darwin_arm64": {"url": "registry.example/hashi/null/archive.zip"}}}"#,
    )
    .unwrap();
    std::fs::write(provider_dir.join("archive.zip"), provider_zip()).unwrap();

    let server = spawn_server(Some(vec![SourceConfig::FilesystemMirror {
        root: mirror.path().to_owned(),
        matches: terrapin_registry::RouteMatches::any(),
    }]))
    .await;
    let client = reqwest::Client::new();

    // Synthesized version listing from index.json.
    let body = authorized(
        &client,
        &server.url("/v1/providers/cache/registry.example/hashi/null/versions"),
    )
    .send()
    .await
    .unwrap()
    .text()
    .await
    .unwrap();
    assert!(body.contains(r#""version":"5.36.0""#), "body: {body}");
    assert!(body.contains(r#""os":"solaris""#), "body: {body}");

    // Platform metadata cannot be synthesized without a correlation ID.
    let passthrough = authorized(
        &client,
        &server.url("/v1/providers//registry.example/hashi/null/5.36.0/download/darwin/arm64"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(passthrough.status(), reqwest::StatusCode::NOT_FOUND);

    // With one, the archive is staged straight from the mirror directory.
    let locked = authorized(
        &client,
        &server
            .url("/v1/providers/mirror/registry.example/hashi/null/5.36.0/download/darwin/arm64"),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(locked.status(), reqwest::StatusCode::LOCKED);

    let ready = server.cache.wait_for_ready("mirror").await.unwrap();
    assert_eq!(ready.len(), 1);
    assert!(!ready[0].archive_cached());
    assert!(ready[0].package_dir.join(BINARY_NAME).exists());
}

#[tokio::test]
async fn unknown_providers_have_no_source() {
    let (registry, _) = spawn_registry().await;
    let server = spawn_server(Some(vec![SourceConfig::Direct {
        matches: terrapin_registry::RouteMatches::new(
            vec!["hashi/*".parse().unwrap()],
            vec![],
        ),
    }]))
    .await;
    let client = reqwest::Client::new();

    let excluded = authorized(
        &client,
        &server.url(&format!("/v1/providers/cache/{registry}/community/thing/versions")),
    )
    .send()
    .await
    .unwrap();
    assert_eq!(excluded.status(), reqwest::StatusCode::NOT_FOUND);
}
