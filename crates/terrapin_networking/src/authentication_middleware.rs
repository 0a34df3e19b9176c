//! `reqwest` middleware that authenticates outbound requests with tokens
//! from the [`CredentialStore`].

use http::Extensions;
use reqwest::{header::AUTHORIZATION, Request, Response};
use reqwest_middleware::{Middleware, Next};

use crate::CredentialStore;

/// Attaches `Authorization: Bearer <token>` to requests whose target host
/// carries a credential. Requests that already carry an `Authorization`
/// header pass through untouched.
#[derive(Clone)]
pub struct AuthenticationMiddleware {
    credentials: CredentialStore,
}

impl AuthenticationMiddleware {
    pub fn new(credentials: CredentialStore) -> Self {
        Self { credentials }
    }
}

#[async_trait::async_trait]
impl Middleware for AuthenticationMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if req.headers().get(AUTHORIZATION).is_some() {
            return next.run(req, extensions).await;
        }

        let token = req
            .url()
            .host_str()
            .and_then(|host| self.credentials.token_for(host));
        if let Some(token) = token {
            let bearer = format!("Bearer {token}");
            let mut header_value = reqwest::header::HeaderValue::from_str(&bearer)
                .map_err(reqwest_middleware::Error::middleware)?;
            header_value.set_sensitive(true);
            req.headers_mut().insert(AUTHORIZATION, header_value);
        }

        next.run(req, extensions).await
    }
}
