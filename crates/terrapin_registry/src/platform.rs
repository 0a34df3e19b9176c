//! Operating-system / architecture pairs as the engine spells them.

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed platform matrix used when a mirror only records versions and the
/// version listing has to be synthesized. These are the targets the engine
/// publishes official builds for.
pub const PLATFORM_MATRIX: &[(&str, &str)] = &[
    ("solaris", "amd64"),
    ("openbsd", "386"),
    ("openbsd", "arm"),
    ("openbsd", "amd64"),
    ("freebsd", "386"),
    ("freebsd", "arm"),
    ("freebsd", "amd64"),
    ("linux", "386"),
    ("linux", "arm"),
    ("linux", "arm64"),
    ("linux", "amd64"),
    ("darwin", "amd64"),
    ("darwin", "arm64"),
    ("windows", "386"),
    ("windows", "amd64"),
];

/// A target platform for a provider build.
///
/// Rendered as `<os>_<arch>`, the spelling used both in cache directory names
/// and in mirror `archives` keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// All platforms of the fixed matrix.
    pub fn matrix() -> impl Iterator<Item = Platform> {
        PLATFORM_MATRIX
            .iter()
            .map(|(os, arch)| Platform::new(*os, *arch))
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// An error that can occur when parsing a [`Platform`] from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid platform, expected '<os>_<arch>'")]
pub struct PlatformParseError(String);

impl FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('_') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => {
                Ok(Platform::new(os, arch))
            }
            _ => Err(PlatformParseError(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Platform {
    type Error = PlatformParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::{Platform, PLATFORM_MATRIX};

    #[rstest]
    #[case("darwin_arm64", "darwin", "arm64")]
    #[case("linux_386", "linux", "386")]
    #[case("windows_amd64", "windows", "amd64")]
    fn parse_roundtrip(#[case] input: &str, #[case] os: &str, #[case] arch: &str) {
        let platform = Platform::from_str(input).unwrap();
        assert_eq!(platform, Platform::new(os, arch));
        assert_eq!(platform.to_string(), input);
    }

    #[rstest]
    #[case("")]
    #[case("linux")]
    #[case("_amd64")]
    #[case("linux_")]
    fn parse_rejects_malformed(#[case] input: &str) {
        assert!(Platform::from_str(input).is_err());
    }

    #[test]
    fn matrix_is_complete() {
        assert_eq!(PLATFORM_MATRIX.len(), 15);
        assert_eq!(Platform::matrix().count(), PLATFORM_MATRIX.len());
    }
}
