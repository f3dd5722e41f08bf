//! NPM-style package listing documents.

use crate::version_set::VersionSet;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Per-package document as served by NPM-protocol registries: a versions
/// map plus dist-tags. The CI backend synthesizes the same shape from
/// `qas.json`.
///
/// Invariant: every dist-tag value is a key of `versions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageListing {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, PackageRelease>,
    #[serde(rename = "dist-tags", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// One release record inside a listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageRelease {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Dist>,
    #[serde(rename = "fhirVersion", default, skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlisted: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PackageRelease {
    pub fn is_unlisted(&self) -> bool {
        self.unlisted
            .as_deref()
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn tarball(&self) -> Option<&str> {
        self.dist.as_ref().and_then(|d| d.tarball.as_deref())
    }
}

impl PackageListing {
    /// All version keys as a `VersionSet`, preserving the listed/unlisted
    /// partition.
    pub fn version_set(&self) -> VersionSet {
        VersionSet::new(
            self.versions
                .iter()
                .map(|(version, release)| (version.as_str(), release.is_unlisted())),
        )
    }

    /// Resolve a range or dist-tag to a concrete version string.
    ///
    /// A range that names a dist-tag short-circuits to the tagged version;
    /// everything else goes through semver range resolution.
    pub fn resolve(&self, range: &str, stable: bool) -> Option<String> {
        if let Some(tagged) = self.dist_tags.get(range) {
            return Some(tagged.clone());
        }
        self.version_set()
            .resolve(range, stable)
            .map(|v| self.canonical_key(&v))
    }

    pub fn release(&self, version: &str) -> Option<&PackageRelease> {
        self.versions.get(version)
    }

    // Resolution works on parsed versions; map the winner back onto the
    // exact key the listing spells it with.
    fn canonical_key(&self, version: &Version) -> String {
        let rendered = version.to_string();
        if self.versions.contains_key(&rendered) {
            return rendered;
        }
        self.versions
            .keys()
            .find(|k| Version::parse(k).map(|v| &v == version).unwrap_or(false))
            .cloned()
            .unwrap_or(rendered)
    }
}
