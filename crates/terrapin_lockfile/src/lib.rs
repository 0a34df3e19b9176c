//! Reader and writer for the engine's dependency lock document
//! (`.terraform.lock.hcl`).
//!
//! The document pins every provider of a working directory to a version and
//! a set of trusted hashes. The cache server merges freshly computed hashes
//! into it so the engine accepts cached packages as authentic. Emission is
//! fully deterministic: providers sorted by address, hashes sorted within
//! each block, one hash per line — merging the same content twice yields the
//! same bytes.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// The file name of the lock document inside a working directory.
pub const LOCK_FILE_NAME: &str = ".terraform.lock.hcl";

const HEADER: &str = "# This file is maintained automatically by \"terraform init\".\n\
                      # Manual edits may be lost in future updates.\n";

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("failed to parse the lock document")]
    Parse(#[from] hcl::Error),

    #[error("provider block '{0}' is malformed: {1}")]
    MalformedBlock(String, String),

    #[error("failed to read '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One `provider` block of the lock document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLock {
    /// The source address label, `<registry>/<namespace>/<name>`.
    pub address: String,
    pub version: String,
    /// Version constraints as recorded in the document; empty when absent.
    pub constraints: String,
    /// Sorted, de-duplicated hash strings (`h1:…` and `zh:…`).
    pub hashes: Vec<String>,
}

impl ProviderLock {
    pub fn new(
        address: impl Into<String>,
        version: impl Into<String>,
        hashes: impl IntoIterator<Item = String>,
    ) -> Self {
        let version = version.into();
        let mut lock = Self {
            address: address.into(),
            constraints: version.clone(),
            version,
            hashes: hashes.into_iter().collect(),
        };
        lock.normalize();
        lock
    }

    fn normalize(&mut self) {
        self.hashes.sort();
        self.hashes.dedup();
    }
}

/// A parsed lock document: provider blocks keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockDocument {
    providers: BTreeMap<String, ProviderLock>,
}

impl LockDocument {
    /// Parses a lock document. Blocks other than `provider` are dropped with
    /// a warning; the engine never writes any.
    pub fn parse(text: &str) -> Result<Self, LockfileError> {
        let body = hcl::parse(text)?;
        let mut providers = BTreeMap::new();
        for block in body.blocks() {
            if block.identifier() != "provider" {
                tracing::warn!(
                    block = block.identifier(),
                    "dropping unexpected block from lock document"
                );
                continue;
            }
            let address = block
                .labels()
                .first()
                .map(|label| label.as_str().to_owned())
                .ok_or_else(|| {
                    LockfileError::MalformedBlock(
                        "provider".to_owned(),
                        "missing the source address label".to_owned(),
                    )
                })?;

            let mut lock = ProviderLock {
                address: address.clone(),
                version: String::new(),
                constraints: String::new(),
                hashes: Vec::new(),
            };
            for attribute in block.body().attributes() {
                match (attribute.key(), attribute.expr()) {
                    ("version", hcl::Expression::String(version)) => {
                        lock.version = version.clone();
                    }
                    ("constraints", hcl::Expression::String(constraints)) => {
                        lock.constraints = constraints.clone();
                    }
                    ("hashes", hcl::Expression::Array(elements)) => {
                        for element in elements {
                            match element {
                                hcl::Expression::String(hash) => lock.hashes.push(hash.clone()),
                                other => {
                                    return Err(LockfileError::MalformedBlock(
                                        address.clone(),
                                        format!("hashes contains a non-string element: {other:?}"),
                                    ))
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            lock.normalize();
            providers.insert(address, lock);
        }
        Ok(Self { providers })
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderLock> {
        self.providers.values()
    }

    pub fn get(&self, address: &str) -> Option<&ProviderLock> {
        self.providers.get(address)
    }

    /// Merges `updates` into the document.
    ///
    /// Each update overwrites the block's version and constraints. When the
    /// recorded version equals the update's version the hash sets are
    /// union-merged, otherwise the old hashes no longer describe the pinned
    /// release and are replaced. Update order does not affect the result.
    pub fn merge(&mut self, updates: impl IntoIterator<Item = ProviderLock>) {
        let mut updates = updates.into_iter().collect::<Vec<_>>();
        updates.sort_by(|a, b| a.address.cmp(&b.address));
        for mut update in updates {
            update.normalize();
            match self.providers.remove(&update.address) {
                Some(existing) if existing.version == update.version => {
                    let mut merged = update;
                    merged.hashes.extend(existing.hashes);
                    merged.normalize();
                    self.providers.insert(merged.address.clone(), merged);
                }
                _ => {
                    self.providers.insert(update.address.clone(), update);
                }
            }
        }
    }

    /// Renders the document. The output is canonical: running the emitter on
    /// its own output reproduces it byte for byte.
    pub fn to_document_string(&self) -> String {
        let mut out = String::from(HEADER);
        for lock in self.providers.values() {
            out.push('\n');
            writeln!(out, "provider \"{}\" {{", lock.address).expect("writing to a string");
            if lock.constraints.is_empty() {
                writeln!(out, "  version = \"{}\"", lock.version).expect("writing to a string");
            } else {
                writeln!(out, "  version     = \"{}\"", lock.version)
                    .expect("writing to a string");
                writeln!(out, "  constraints = \"{}\"", lock.constraints)
                    .expect("writing to a string");
            }
            out.push_str("  hashes = [\n");
            for hash in &lock.hashes {
                writeln!(out, "    \"{hash}\",").expect("writing to a string");
            }
            out.push_str("  ]\n}\n");
        }
        out
    }
}

/// Merges `updates` into the lock document of `work_dir`, creating it when
/// absent. The file is replaced atomically with mode `0644`.
pub fn update_lock_file(
    work_dir: &Path,
    updates: impl IntoIterator<Item = ProviderLock>,
) -> Result<PathBuf, LockfileError> {
    let path = work_dir.join(LOCK_FILE_NAME);
    let mut document = match fs_err::read_to_string(&path) {
        Ok(text) => LockDocument::parse(&text)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => LockDocument::default(),
        Err(source) => {
            return Err(LockfileError::Read {
                path,
                source,
            })
        }
    };
    document.merge(updates);

    let write_err = |source| LockfileError::Write {
        path: path.clone(),
        source,
    };
    let temp = tempfile::NamedTempFile::new_in(work_dir).map_err(write_err)?;
    fs_err::write(temp.path(), document.to_document_string()).map_err(write_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs_err::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(write_err)?;
    }
    temp.persist(&path)
        .map_err(|err| write_err(err.error))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::{update_lock_file, LockDocument, ProviderLock, LOCK_FILE_NAME};

    fn aws_update() -> ProviderLock {
        ProviderLock::new(
            "registry.example/hashi/aws",
            "5.37.0",
            [
                "zh:2913af44f9b584f756e5548d5ddc5a251c6d68a7fcd7c41d1418a800f94ca113".to_owned(),
                "h1:Fp0RrNe+w167AQkVUWC1WRAsyjhhHN7aHWUky7VkKW8=".to_owned(),
            ],
        )
    }

    fn null_update() -> ProviderLock {
        ProviderLock::new(
            "registry.example/hashi/null",
            "3.101.0",
            ["zh:6c772e55ad57e0ed50d5b3660213ed4e1b0d1434a805a0d0fccbe2ad04a71f26".to_owned()],
        )
    }

    #[test]
    fn emits_a_canonical_document() {
        let mut document = LockDocument::default();
        document.merge([aws_update(), null_update()]);
        insta::assert_snapshot!(document.to_document_string(), @r###"
        # This file is maintained automatically by "terraform init".
        # Manual edits may be lost in future updates.

        provider "registry.example/hashi/aws" {
          version     = "5.37.0"
          constraints = "5.37.0"
          hashes = [
            "h1:Fp0RrNe+w167AQkVUWC1WRAsyjhhHN7aHWUky7VkKW8=",
            "zh:2913af44f9b584f756e5548d5ddc5a251c6d68a7fcd7c41d1418a800f94ca113",
          ]
        }

        provider "registry.example/hashi/null" {
          version     = "3.101.0"
          constraints = "3.101.0"
          hashes = [
            "zh:6c772e55ad57e0ed50d5b3660213ed4e1b0d1434a805a0d0fccbe2ad04a71f26",
          ]
        }
        "###);
    }

    #[test]
    fn writing_is_idempotent() {
        let mut document = LockDocument::default();
        document.merge([aws_update(), null_update()]);
        let first = document.to_document_string();

        let mut reparsed = LockDocument::parse(&first).unwrap();
        reparsed.merge([aws_update(), null_update()]);
        assert_eq!(reparsed.to_document_string(), first);
    }

    #[test]
    fn update_order_does_not_matter() {
        let mut forward = LockDocument::default();
        forward.merge([aws_update(), null_update()]);
        let mut backward = LockDocument::default();
        backward.merge([null_update(), aws_update()]);
        assert_eq!(
            forward.to_document_string(),
            backward.to_document_string()
        );
    }

    #[test]
    fn same_version_merge_preserves_existing_hashes() {
        let existing = "\
provider \"registry.example/hashi/aws\" {
  version     = \"5.37.0\"
  constraints = \"5.37.0\"
  hashes = [
    \"zh:000000af9b584f756e5548d5ddc5a251c6d68a7fcd7c41d1418a800f94ca113\",
  ]
}
";
        let mut document = LockDocument::parse(existing).unwrap();
        document.merge([aws_update()]);
        let lock = document.get("registry.example/hashi/aws").unwrap();
        assert_eq!(lock.hashes.len(), 3);
        assert!(lock
            .hashes
            .contains(&"zh:000000af9b584f756e5548d5ddc5a251c6d68a7fcd7c41d1418a800f94ca113".to_owned()));
        assert!(lock.hashes[0].starts_with("h1:"));

        let mut sorted = lock.hashes.clone();
        sorted.sort();
        assert_eq!(lock.hashes, sorted);
    }

    #[test]
    fn version_change_replaces_hashes() {
        let mut document = LockDocument::default();
        document.merge([ProviderLock::new(
            "registry.example/hashi/aws",
            "5.36.0",
            ["zh:1111111111111111111111111111111111111111111111111111111111111111".to_owned()],
        )]);
        document.merge([aws_update()]);
        let lock = document.get("registry.example/hashi/aws").unwrap();
        assert_eq!(lock.version, "5.37.0");
        assert!(!lock
            .hashes
            .contains(&"zh:1111111111111111111111111111111111111111111111111111111111111111".to_owned()));
    }

    #[test]
    fn parses_foreign_formatting() {
        let foreign = "\
provider \"registry.example/hashi/aws\" {
    version = \"5.37.0\"
    hashes  = [ \"zh:2913af44f9b584f756e5548d5ddc5a251c6d68a7fcd7c41d1418a800f94ca113\" ]
}
";
        let document = LockDocument::parse(foreign).unwrap();
        let lock = document.get("registry.example/hashi/aws").unwrap();
        assert_eq!(lock.version, "5.37.0");
        assert_eq!(lock.constraints, "");
        assert_eq!(lock.hashes.len(), 1);
    }

    #[test]
    fn untouched_providers_survive_an_update() {
        let dir = tempfile::tempdir().unwrap();
        update_lock_file(dir.path(), [null_update()]).unwrap();
        update_lock_file(dir.path(), [aws_update()]).unwrap();

        let text = std::fs::read_to_string(dir.path().join(LOCK_FILE_NAME)).unwrap();
        let document = LockDocument::parse(&text).unwrap();
        assert!(document.get("registry.example/hashi/null").is_some());
        assert!(document.get("registry.example/hashi/aws").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn lock_file_mode_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = update_lock_file(dir.path(), [null_update()]).unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
