//! The `SHA256SUMS` document published next to provider release archives.
//!
//! One line per artifact: the hex SHA-256, whitespace, the file name. The
//! format matches what `sha256sum` emits, including the optional `*` binary
//! marker in front of the name.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SumsParseError {
    #[error("line {0} of the checksum document is malformed: '{1}'")]
    MalformedLine(usize, String),

    #[error("line {0} of the checksum document carries an invalid SHA-256 '{1}'")]
    InvalidDigest(usize, String),
}

/// One parsed checksum line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumsEntry {
    pub sha256_hex: String,
    pub filename: String,
}

/// A parsed `SHA256SUMS` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SumsDocument {
    entries: Vec<SumsEntry>,
}

impl SumsDocument {
    /// Parses the document. Blank lines are tolerated; every other line must
    /// be `<hex>  <filename>`.
    pub fn parse(text: &str) -> Result<Self, SumsParseError> {
        let mut entries = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (digest, name) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| SumsParseError::MalformedLine(index + 1, line.to_owned()))?;
            let name = name.trim_start().trim_start_matches('*');
            if name.is_empty() {
                return Err(SumsParseError::MalformedLine(index + 1, line.to_owned()));
            }
            if digest.len() != 64 || hex::decode(digest).is_err() {
                return Err(SumsParseError::InvalidDigest(index + 1, digest.to_owned()));
            }
            entries.push(SumsEntry {
                sha256_hex: digest.to_ascii_lowercase(),
                filename: name.to_owned(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SumsEntry] {
        &self.entries
    }

    /// The entry whose file name equals `filename`, if any.
    pub fn entry_for(&self, filename: &str) -> Option<&SumsEntry> {
        self.entries.iter().find(|entry| entry.filename == filename)
    }

    /// Every checksum of the document as a `zh:` hash, sorted.
    pub fn zh_hashes(&self) -> Vec<String> {
        let mut hashes = self
            .entries
            .iter()
            .map(|entry| format!("zh:{}", entry.sha256_hex))
            .collect::<Vec<_>>();
        hashes.sort();
        hashes.dedup();
        hashes
    }
}
