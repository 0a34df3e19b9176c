//! Thin wrappers around the `RustCrypto` hashing traits. Everything in this
//! repository hashes with SHA-256; the helpers stay generic over [`Digest`]
//! so tests can exercise them with other algorithms if ever needed.

use std::{fs::File, io::Write, path::Path};

use digest::{Digest, Output};
use sha2::Sha256;

/// A type alias for the output of a SHA-256 hash.
pub type Sha256Hash = Output<Sha256>;

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hash hex string to a digest. Returns `None` when the string is
/// not valid hex of exactly the digest length.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}
