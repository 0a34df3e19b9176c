//! Bearer credentials collected from the environment.
//!
//! The engine convention is one variable per registry host:
//! `TF_TOKEN_<hostname>` where `.` is written `_` and `-` is written `__`.
//! `TF_TOKEN_registry_example_com` therefore holds the token for
//! `registry.example.com`.

use std::{collections::HashMap, sync::Arc};

const TOKEN_PREFIX: &str = "TF_TOKEN_";

/// An immutable map from registry host to bearer token. Cheap to clone; the
/// server builds one at startup and hands it to every outbound client.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    tokens: Arc<HashMap<String, String>>,
}

impl CredentialStore {
    /// Collects every `TF_TOKEN_<hostname>` variable from the process
    /// environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds a store from explicit `(host, token)` pairs.
    pub fn from_tokens(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: Arc::new(pairs.into_iter().collect()),
        }
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let tokens = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let encoded = key.strip_prefix(TOKEN_PREFIX)?;
                if encoded.is_empty() || value.is_empty() {
                    return None;
                }
                Some((decode_hostname(encoded), value))
            })
            .collect();
        Self {
            tokens: Arc::new(tokens),
        }
    }

    /// The bearer token configured for `host`, if any.
    pub fn token_for(&self, host: &str) -> Option<&str> {
        self.tokens.get(&host.to_ascii_lowercase()).map(String::as_str)
    }

    /// The hosts that carry credentials, in no particular order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Decodes the hostname spelling used in environment variable names: `__`
/// stands for `-` and a single `_` stands for `.`.
fn decode_hostname(encoded: &str) -> String {
    let mut host = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if chars.peek() == Some(&'_') {
                chars.next();
                host.push('-');
            } else {
                host.push('.');
            }
        } else {
            host.push(c.to_ascii_lowercase());
        }
    }
    host
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{decode_hostname, CredentialStore};

    #[rstest]
    #[case("registry_example_com", "registry.example.com")]
    #[case("my__host_example_com", "my-host.example.com")]
    #[case("localhost", "localhost")]
    #[case("APP_EXAMPLE_IO", "app.example.io")]
    fn hostname_decoding(#[case] encoded: &str, #[case] host: &str) {
        assert_eq!(decode_hostname(encoded), host);
    }

    #[test]
    fn collects_only_token_variables() {
        let store = CredentialStore::from_vars([
            ("TF_TOKEN_registry_example".to_owned(), "s3cret".to_owned()),
            ("TF_LOG".to_owned(), "debug".to_owned()),
            ("PATH".to_owned(), "/usr/bin".to_owned()),
        ]);
        assert_eq!(store.token_for("registry.example"), Some("s3cret"));
        assert_eq!(store.token_for("registry.other"), None);
    }

    #[test]
    fn empty_values_are_skipped() {
        let store = CredentialStore::from_vars([(
            "TF_TOKEN_registry_example".to_owned(),
            String::new(),
        )]);
        assert!(store.is_empty());
    }

    #[test]
    fn reads_the_process_environment() {
        temp_env::with_var("TF_TOKEN_unit_test_example", Some("abc"), || {
            let store = CredentialStore::from_env();
            assert_eq!(store.token_for("unit.test.example"), Some("abc"));
        });
    }
}
