// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Version gated behavior for known clients.
//!
//! Some clients were released before a feature changed shape on the wire. A [`CompatRule`] names
//! such a client, the first version that understands the current behavior, and the feature
//! involved. Clients older than the minimum version get the legacy behavior of that feature.

use crate::node::LocationReporting;
use semver::Version;
use serde::Deserialize;
use std::{collections::BTreeSet, fmt};
use testfx_metadata::protocol::PeerInfo;
use tracing::debug;

/// A feature whose wire behavior depends on the client version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientFeature {
    /// How declaration locations are reported. Legacy clients get `location.line` instead of a
    /// line range, and no type or method.
    LocationReporting,
}

impl ClientFeature {
    /// Returns the string representations of all features.
    pub fn variants() -> &'static [&'static str] {
        &["location-reporting"]
    }
}

impl fmt::Display for ClientFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocationReporting => f.write_str("location-reporting"),
        }
    }
}

/// Clients named `client` older than `min_version` get the legacy behavior of `feature`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompatRule {
    /// The client name, compared case-insensitively.
    pub client: String,
    /// The first version of the client with the current behavior.
    pub min_version: Version,
    /// The feature involved.
    pub feature: ClientFeature,
}

/// The features for which a connected client gets legacy behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientCompatibility {
    legacy: BTreeSet<ClientFeature>,
}

impl ClientCompatibility {
    /// Evaluates `rules` against the client that sent `initialize`.
    ///
    /// A version that can't be parsed is treated as current: only known old clients are
    /// downgraded.
    pub fn evaluate(rules: &[CompatRule], client: &PeerInfo) -> Self {
        let version = parse_lenient(&client.version);
        let legacy: BTreeSet<_> = rules
            .iter()
            .filter(|rule| rule.client.eq_ignore_ascii_case(&client.name))
            .filter(|rule| version.as_ref().is_some_and(|v| *v < rule.min_version))
            .map(|rule| rule.feature)
            .collect();

        if !legacy.is_empty() {
            debug!(
                client = %client.name,
                version = %client.version,
                ?legacy,
                "client gets legacy behavior",
            );
        }
        Self { legacy }
    }

    /// Returns true if the client gets the legacy behavior of `feature`.
    pub fn is_legacy(&self, feature: ClientFeature) -> bool {
        self.legacy.contains(&feature)
    }

    /// How locations are reported to this client.
    pub fn location_reporting(&self) -> LocationReporting {
        if self.is_legacy(ClientFeature::LocationReporting) {
            LocationReporting::Legacy
        } else {
            LocationReporting::Modern
        }
    }
}

/// Parses versions like `1.2.3`, `v1.2.3`, `1.2` and `1`.
fn parse_lenient(version: &str) -> Option<Version> {
    let version = version.trim();
    let version = version.strip_prefix(['v', 'V']).unwrap_or(version);
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    // Pad missing components, keeping any pre-release or build suffix.
    let split = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(split);
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn rules() -> Vec<CompatRule> {
        vec![CompatRule {
            client: "test-anywhere".to_owned(),
            min_version: Version::new(1, 0, 0),
            feature: ClientFeature::LocationReporting,
        }]
    }

    #[test_case("test-anywhere", "0.9.1", true; "old client")]
    #[test_case("Test-Anywhere", "0.9", true; "case insensitive and padded")]
    #[test_case("test-anywhere", "v0.1.0", true; "v prefix")]
    #[test_case("test-anywhere", "1.0.0-beta.1", true; "pre-release is older")]
    #[test_case("test-anywhere", "1.0.0", false; "minimum version")]
    #[test_case("test-anywhere", "2", false; "newer")]
    #[test_case("test-anywhere", "nightly", false; "unparseable")]
    #[test_case("other-client", "0.1.0", false; "unknown client")]
    fn location_reporting(name: &str, version: &str, legacy: bool) {
        let compat = ClientCompatibility::evaluate(
            &rules(),
            &PeerInfo {
                name: name.to_owned(),
                version: version.to_owned(),
            },
        );
        assert_eq!(compat.is_legacy(ClientFeature::LocationReporting), legacy);
        let expected = if legacy {
            LocationReporting::Legacy
        } else {
            LocationReporting::Modern
        };
        assert_eq!(compat.location_reporting(), expected);
    }

    #[test]
    fn every_variant_deserializes() {
        for variant in ClientFeature::variants() {
            let feature: ClientFeature =
                serde_json::from_value(serde_json::Value::String((*variant).to_owned())).unwrap();
            assert_eq!(feature.to_string(), *variant);
        }
    }
}
