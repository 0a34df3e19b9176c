//! Types shared by every terrapin crate: provider identity, platform
//! descriptions, address patterns and the JSON documents of the Provider
//! Registry Protocol and the provider mirror protocol.

mod discovery;
mod mirror;
mod package;
mod pattern;
mod platform;
mod provider;
mod versions;

pub use discovery::ServiceDiscovery;
pub use mirror::{MirrorArchive, MirrorIndex, MirrorVersion};
pub use package::{GpgPublicKey, ProviderPackage, SigningKeys};
pub use pattern::{PatternParseError, ProviderPattern, RouteMatches};
pub use platform::{Platform, PlatformParseError, PLATFORM_MATRIX};
pub use provider::{Provider, ProviderAddress};
pub use versions::{PlatformEntry, VersionEntry, VersionList};
