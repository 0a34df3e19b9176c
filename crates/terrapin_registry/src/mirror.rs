//! The simplified metadata documents of the provider mirror protocol.
//!
//! A mirror stores one `index.json` per provider listing the mirrored
//! versions, and one `<version>.json` per version mapping `<os>_<arch>` keys
//! to archive locations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `index.json`: the set of mirrored versions. The values carry no data in
/// the current protocol; they are kept opaque so future additions parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorIndex {
    #[serde(default)]
    pub versions: BTreeMap<String, serde_json::Value>,
}

/// `<version>.json`: archives per platform for a single version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorVersion {
    #[serde(default)]
    pub archives: BTreeMap<String, MirrorArchive>,
}

/// Where a mirrored archive can be found. The URL may be absolute, or
/// relative to the mirror root (filesystem mirrors) or the mirror base URL
/// (network mirrors).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorArchive {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::{MirrorIndex, MirrorVersion};

    #[test]
    fn parses_index_document() {
        let index: MirrorIndex =
            serde_json::from_str(r#"{"versions": {"5.36.0": {}, "5.37.0": {}}}"#).unwrap();
        assert_eq!(
            index.versions.keys().collect::<Vec<_>>(),
            ["5.36.0", "5.37.0"]
        );
    }

    #[test]
    fn parses_version_document() {
        let version: MirrorVersion = serde_json::from_str(
            r#"{"archives": {"linux_amd64": {"url": "terraform-provider-aws_5.36.0_linux_amd64.zip", "hashes": ["h1:abc"]}}}"#,
        )
        .unwrap();
        let archive = version.archives.get("linux_amd64").unwrap();
        assert_eq!(archive.url, "terraform-provider-aws_5.36.0_linux_amd64.zip");
        assert_eq!(archive.hashes, ["h1:abc"]);
    }
}
