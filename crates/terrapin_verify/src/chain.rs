//! The package authentication chain.
//!
//! Checks run left to right: the archive's checksum line must be present in
//! the sums document and match the registry's expectation, the archive bytes
//! on disk must hash to that checksum, and finally the sums document's
//! detached signature is verified when the registry published signing keys.
//! Any failing check is fatal for the cache entry.

use std::path::Path;

use sha2::Sha256;
use terrapin_registry::ProviderPackage;
use thiserror::Error;

use crate::{
    compute_file_digest, package_dir_hash,
    signature::{verify_detached, SignatureError, SignedBy, TrustRoots},
    sums::{SumsDocument, SumsParseError},
    DirHashError,
};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Sums(#[from] SumsParseError),

    #[error("the checksum document has no entry for '{0}'")]
    ChecksumMissing(String),

    #[error(
        "the registry expects SHA-256 {expected} for '{filename}' but the checksum document records {actual}"
    )]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("the downloaded archive hashes to zh:{actual}, expected zh:{expected}")]
    ArchiveChecksumMismatch { expected: String, actual: String },

    #[error("failed to read the downloaded archive")]
    ReadArchive(#[from] std::io::Error),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    DirHash(#[from] DirHashError),
}

/// The strongest statement the chain could make about a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Checksums match but nobody signed the release.
    VerifiedChecksum,
    /// Signed by a key the registry published, vouched for by nobody.
    Community,
    /// Signed by a key the partner trust root vouches for.
    Partner,
    /// Signed by an official trust root.
    Official,
}

impl From<SignedBy> for Verification {
    fn from(signed_by: SignedBy) -> Self {
        match signed_by {
            SignedBy::Official => Verification::Official,
            SignedBy::Partner => Verification::Partner,
            SignedBy::Community => Verification::Community,
        }
    }
}

/// Runs the authentication chain for downloaded provider archives.
#[derive(Default)]
pub struct PackageAuthenticator {
    trust_roots: TrustRoots,
}

impl PackageAuthenticator {
    pub fn new(trust_roots: TrustRoots) -> Self {
        Self { trust_roots }
    }

    /// Authenticates `archive_path` against the registry metadata and the
    /// sums document fetched from `package.shasums_url`.
    pub fn authenticate(
        &self,
        package: &ProviderPackage,
        archive_path: &Path,
        sums_document: &[u8],
        sums_signature: Option<&[u8]>,
    ) -> Result<Verification, VerifyError> {
        let expected = package.shasum.to_ascii_lowercase();
        let sums = SumsDocument::parse(&String::from_utf8_lossy(sums_document))?;

        // 1. The sums document must agree with the registry about this
        //    archive.
        let entry = sums
            .entry_for(&package.filename)
            .ok_or_else(|| VerifyError::ChecksumMissing(package.filename.clone()))?;
        if entry.sha256_hex != expected {
            return Err(VerifyError::ChecksumMismatch {
                filename: package.filename.clone(),
                expected,
                actual: entry.sha256_hex.clone(),
            });
        }

        // 2. The bytes on disk must hash to the expected checksum.
        let actual = format!("{:x}", compute_file_digest::<Sha256>(archive_path)?);
        if actual != expected {
            return Err(VerifyError::ArchiveChecksumMismatch {
                expected,
                actual,
            });
        }

        // 3. Signature over the sums document, when the registry signs.
        let keys = &package.signing_keys.gpg_public_keys;
        match (keys.is_empty(), sums_signature) {
            (false, Some(signature)) => {
                let signed_by =
                    verify_detached(sums_document, signature, keys, &self.trust_roots)?;
                Ok(Verification::from(signed_by))
            }
            _ => {
                tracing::warn!(
                    filename = %package.filename,
                    "the registry published no signature for this release; skipping signature verification"
                );
                Ok(Verification::VerifiedChecksum)
            }
        }
    }
}

/// The hashes a lock-file update may record for a completed package: the
/// `h1:` hash of the unpacked directory plus every `zh:` checksum of the
/// sums document, sorted.
pub fn acceptable_hashes(
    package_dir: &Path,
    sums_document: Option<&[u8]>,
) -> Result<Vec<String>, VerifyError> {
    let mut hashes = vec![package_dir_hash(package_dir)?];
    if let Some(document) = sums_document {
        let sums = SumsDocument::parse(&String::from_utf8_lossy(document))?;
        hashes.extend(sums.zh_hashes());
    }
    hashes.sort();
    hashes.dedup();
    Ok(hashes)
}
