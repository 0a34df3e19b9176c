//! The platform metadata document returned by a registry for one
//! `(provider, version, platform)`.

use serde::{Deserialize, Serialize};

/// The response of the Registry Protocol download endpoint. The URL fields
/// may be relative to the endpoint that served the document; callers resolve
/// them before use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPackage {
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub shasums_url: String,
    #[serde(default)]
    pub shasums_signature_url: String,
    /// Hex-encoded SHA-256 of the archive named by `filename`.
    #[serde(default)]
    pub shasum: String,
    #[serde(default)]
    pub signing_keys: SigningKeys,
}

impl ProviderPackage {
    /// The extension of the remote archive, taken from `filename`; providers
    /// ship as zip archives so this is almost always `zip`.
    pub fn archive_extension(&self) -> &str {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("zip")
    }
}

/// The keys a registry publishes for verifying release signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeys {
    #[serde(default)]
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

/// One OpenPGP public key, optionally carrying a trust signature issued by
/// the registry operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgPublicKey {
    #[serde(default)]
    pub key_id: String,
    #[serde(default)]
    pub ascii_armor: String,
    #[serde(default)]
    pub trust_signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}
