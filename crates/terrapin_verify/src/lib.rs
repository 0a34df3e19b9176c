//! Integrity verification of provider packages: SHA-256 checksums against
//! the registry's sums document, the `h1:` hash of the unpacked package
//! directory, and OpenPGP verification of the sums document's detached
//! signature.

mod chain;
mod digest;
mod dirhash;
mod signature;
mod sums;

pub use chain::{acceptable_hashes, PackageAuthenticator, Verification, VerifyError};
pub use digest::{compute_bytes_digest, compute_file_digest, parse_digest_from_hex, Sha256Hash};
pub use dirhash::{package_dir_hash, DirHashError};
pub use signature::{SignatureError, SignedBy, TrustRoots};
pub use sums::{SumsDocument, SumsEntry, SumsParseError};
