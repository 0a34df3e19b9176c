//! Provider address patterns and include/exclude routing.

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Provider;

/// A pattern over provider identities. Every field is optional; an unset (or
/// empty) field matches anything. A pattern matches a provider when every set
/// field equals the corresponding provider field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderPattern {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
}

fn field_matches(pattern: &Option<String>, value: &str) -> bool {
    match pattern.as_deref() {
        None | Some("") => true,
        Some(expected) => expected == value,
    }
}

impl ProviderPattern {
    /// A pattern that matches every provider.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, provider: &Provider) -> bool {
        field_matches(&self.registry, &provider.address.registry)
            && field_matches(&self.namespace, &provider.address.namespace)
            && field_matches(&self.name, &provider.address.name)
            && field_matches(&self.version, &provider.version)
            && field_matches(&self.os, &provider.platform.os)
            && field_matches(&self.arch, &provider.platform.arch)
    }
}

/// An error that can occur when parsing a [`ProviderPattern`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid provider pattern, expected up to '<registry>/<namespace>/<name>'")]
pub struct PatternParseError(String);

fn segment(s: &str) -> Option<String> {
    match s {
        "" | "*" => None,
        other => Some(other.to_owned()),
    }
}

impl FromStr for ProviderPattern {
    type Err = PatternParseError;

    /// Parses the source-address form used in engine configuration files:
    /// `name`, `namespace/name` or `registry/namespace/name`, where any
    /// segment may be `*`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s.split('/').collect::<Vec<_>>();
        let mut pattern = ProviderPattern::default();
        match segments.as_slice() {
            [name] => pattern.name = segment(name),
            [namespace, name] => {
                pattern.namespace = segment(namespace);
                pattern.name = segment(name);
            }
            [registry, namespace, name] => {
                pattern.registry = segment(registry);
                pattern.namespace = segment(namespace);
                pattern.name = segment(name);
            }
            _ => return Err(PatternParseError(s.to_owned())),
        }
        Ok(pattern)
    }
}

impl TryFrom<String> for ProviderPattern {
    type Error = PatternParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for ProviderPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let part = |field: &Option<String>| match field.as_deref() {
            None | Some("") => "*".to_owned(),
            Some(value) => value.to_owned(),
        };
        write!(
            f,
            "{}/{}/{}",
            part(&self.registry),
            part(&self.namespace),
            part(&self.name)
        )
    }
}

impl From<ProviderPattern> for String {
    fn from(pattern: ProviderPattern) -> Self {
        pattern.to_string()
    }
}

/// The include/exclude sets that decide whether a source handles a provider.
///
/// Excludes always win; with no includes everything not excluded matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatches {
    #[serde(default)]
    pub includes: Vec<ProviderPattern>,
    #[serde(default)]
    pub excludes: Vec<ProviderPattern>,
}

impl RouteMatches {
    pub fn new(includes: Vec<ProviderPattern>, excludes: Vec<ProviderPattern>) -> Self {
        Self { includes, excludes }
    }

    /// Matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn can_handle(&self, provider: &Provider) -> bool {
        if self.excludes.iter().any(|p| p.matches(provider)) {
            return false;
        }
        if self.includes.is_empty() {
            return true;
        }
        self.includes.iter().any(|p| p.matches(provider))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::{ProviderPattern, RouteMatches};
    use crate::{Platform, Provider, ProviderAddress};

    fn provider(registry: &str, namespace: &str, name: &str) -> Provider {
        Provider::new(
            ProviderAddress::new(registry, namespace, name),
            "1.0.0",
            Platform::new("linux", "amd64"),
        )
    }

    #[rstest]
    #[case("aws", "registry.example/hashi/aws", true)]
    #[case("aws", "registry.example/hashi/gcp", false)]
    #[case("hashi/*", "registry.example/hashi/gcp", true)]
    #[case("hashi/*", "registry.example/other/gcp", false)]
    #[case("registry.example/*/aws", "registry.example/hashi/aws", true)]
    #[case("other.example/*/aws", "registry.example/hashi/aws", false)]
    #[case("*/*/*", "registry.example/hashi/aws", true)]
    fn pattern_matching(#[case] pattern: &str, #[case] addr: &str, #[case] matches: bool) {
        let pattern = ProviderPattern::from_str(pattern).unwrap();
        let mut parts = addr.splitn(3, '/');
        let provider = provider(
            parts.next().unwrap(),
            parts.next().unwrap(),
            parts.next().unwrap(),
        );
        assert_eq!(pattern.matches(&provider), matches);
    }

    #[test]
    fn empty_fields_are_wildcards() {
        let pattern = ProviderPattern {
            registry: Some(String::new()),
            name: Some("aws".to_owned()),
            ..ProviderPattern::default()
        };
        assert!(pattern.matches(&provider("anywhere.example", "hashi", "aws")));
    }

    #[test]
    fn empty_route_matches_everything() {
        let routes = RouteMatches::any();
        assert!(routes.can_handle(&provider("registry.example", "hashi", "aws")));
    }

    #[test]
    fn excludes_win_over_includes() {
        let pattern = ProviderPattern::from_str("hashi/aws").unwrap();
        let routes = RouteMatches::new(vec![pattern.clone()], vec![pattern]);
        assert!(!routes.can_handle(&provider("registry.example", "hashi", "aws")));
    }

    #[test]
    fn includes_narrow_the_route() {
        let routes = RouteMatches::new(
            vec![ProviderPattern::from_str("hashi/*").unwrap()],
            vec![],
        );
        assert!(routes.can_handle(&provider("registry.example", "hashi", "aws")));
        assert!(!routes.can_handle(&provider("registry.example", "community", "aws")));
    }

    #[test]
    fn display_roundtrip() {
        let pattern = ProviderPattern::from_str("registry.example/hashi/*").unwrap();
        assert_eq!(pattern.to_string(), "registry.example/hashi/*");
    }
}
