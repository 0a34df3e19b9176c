//! The `/.well-known/terraform.json` service discovery document.

use serde::{Deserialize, Serialize};

/// The services a registry host advertises. Only the provider and module
/// services are relevant to the cache server; unknown services are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDiscovery {
    #[serde(rename = "providers.v1", skip_serializing_if = "Option::is_none")]
    pub providers_v1: Option<String>,
    #[serde(rename = "modules.v1", skip_serializing_if = "Option::is_none")]
    pub modules_v1: Option<String>,
}

impl ServiceDiscovery {
    /// The endpoints assumed for hosts that cannot be reached or do not serve
    /// a discovery document.
    pub fn default_endpoints() -> Self {
        Self {
            providers_v1: Some("/v1/providers".to_owned()),
            modules_v1: Some("/v1/modules".to_owned()),
        }
    }
}
