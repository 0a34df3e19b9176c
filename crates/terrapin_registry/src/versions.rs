//! The version listing document of the Registry Protocol.

use serde::{Deserialize, Serialize};

use crate::Platform;

/// `GET …/versions` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionList {
    pub versions: Vec<VersionEntry>,
}

/// One available version together with the protocol versions it speaks and
/// the platforms it was built for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<PlatformEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformEntry {
    pub os: String,
    pub arch: String,
}

impl From<Platform> for PlatformEntry {
    fn from(platform: Platform) -> Self {
        Self {
            os: platform.os,
            arch: platform.arch,
        }
    }
}
