//! Networking support for terrapin: the host-scoped credential store fed by
//! `TF_TOKEN_*` environment variables, a `reqwest` middleware that attaches
//! bearer tokens to outbound requests, and the retry policies used by the
//! cache engine.

pub mod authentication_middleware;
pub mod credentials;
pub mod redaction;
pub mod retry_policies;

pub use authentication_middleware::AuthenticationMiddleware;
pub use credentials::CredentialStore;

/// Constructs the outbound HTTP client every terrapin component shares:
/// gzip-capable transport with host-scoped bearer credentials attached by
/// [`AuthenticationMiddleware`].
pub fn default_client(
    credentials: CredentialStore,
) -> reqwest_middleware::ClientWithMiddleware {
    let client = reqwest::Client::builder()
        .user_agent(concat!("terrapin/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("the static client configuration is valid");
    reqwest_middleware::ClientBuilder::new(client)
        .with(AuthenticationMiddleware::new(credentials))
        .build()
}
