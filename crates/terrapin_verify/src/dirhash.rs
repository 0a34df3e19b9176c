//! The canonical `h1:` hash of an unpacked provider package directory.
//!
//! The scheme hashes every regular file with SHA-256, renders one line
//! `"<hex>  <relative/slash/path>\n"` per file, sorts the lines by path and
//! hashes the concatenation with SHA-256 again. The result is spelled
//! `h1:<standard-base64>`. Lock files record this hash so the engine can
//! trust an unpacked directory without re-downloading the archive.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::compute_file_digest;

#[derive(Debug, Error)]
pub enum DirHashError {
    #[error("failed to walk package directory")]
    Walk(#[from] walkdir::Error),

    #[error("failed to hash '{0}'")]
    HashFile(String, #[source] std::io::Error),

    #[error("package directory contains a path that is not valid unicode: '{0}'")]
    NonUnicodePath(String),
}

/// Computes the `h1:` hash of the directory at `dir`.
///
/// The directory itself may be a symlink (a package adopted from the user
/// plug-in cache); the hash covers the link target's contents.
pub fn package_dir_hash(dir: &Path) -> Result<String, DirHashError> {
    let mut entries = Vec::new();
    // `follow_links` matters: a package adopted from the user plug-in cache
    // is a symlink at the top, and its files may be links too.
    for entry in walkdir::WalkDir::new(dir).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .expect("walkdir yields paths under its root");
        let rel = rel
            .to_str()
            .ok_or_else(|| DirHashError::NonUnicodePath(rel.to_string_lossy().into_owned()))?
            .replace('\\', "/");
        let digest = compute_file_digest::<Sha256>(entry.path())
            .map_err(|e| DirHashError::HashFile(rel.clone(), e))?;
        entries.push((rel, digest));
    }

    // One line per file, ordered by path.
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    let mut outer = Sha256::new();
    for (rel, digest) in entries {
        outer.update(format!("{digest:x}  {rel}\n"));
    }

    Ok(format!("h1:{}", BASE64_STANDARD.encode(outer.finalize())))
}
