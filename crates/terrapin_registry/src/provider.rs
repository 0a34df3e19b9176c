//! Provider identity.

use std::{
    fmt,
    fmt::{Display, Formatter},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::Platform;

/// The source address of a provider: which registry it lives on and under
/// which namespace and name it is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderAddress {
    /// Hostname of the registry, e.g. `registry.terraform.io`.
    pub registry: String,
    /// The organization that publishes the provider.
    pub namespace: String,
    /// The provider name, e.g. `aws`.
    pub name: String,
}

impl ProviderAddress {
    pub fn new(
        registry: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for ProviderAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.registry, self.namespace, self.name)
    }
}

/// One concrete provider build: an address pinned to a version and a target
/// platform. This is the identity the cache is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provider {
    pub address: ProviderAddress,
    pub version: String,
    pub platform: Platform,
}

impl Provider {
    pub fn new(address: ProviderAddress, version: impl Into<String>, platform: Platform) -> Self {
        Self {
            address,
            version: version.into(),
            platform,
        }
    }

    /// The directory of this build relative to a cache root:
    /// `<registry>/<namespace>/<name>/<version>/<os>_<arch>`.
    pub fn package_rel_path(&self) -> PathBuf {
        PathBuf::from(&self.address.registry)
            .join(&self.address.namespace)
            .join(&self.address.name)
            .join(&self.version)
            .join(self.platform.to_string())
    }

    /// The stem used for scratch files belonging to this build:
    /// `<registry>-<namespace>-<name>-<version>-<os>_<arch>`.
    pub fn archive_stem(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.address.registry,
            self.address.namespace,
            self.address.name,
            self.version,
            self.platform
        )
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} ({})",
            self.address, self.version, self.platform
        )
    }
}
