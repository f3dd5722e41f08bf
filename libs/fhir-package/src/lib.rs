//! Data model for the FHIR NPM package specification.
//!
//! Provides serde-friendly representations of `package.json` manifests,
//! package references and dependency requirements, plus extraction of the
//! manifest out of a `.tgz` archive without unpacking the whole package.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use tar::Archive;
use thiserror::Error;

pub type PackageName = String;
pub type Version = String;
pub type VersionReference = String;
pub type Url = String;

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),
    #[error("Missing file: {0}")]
    MissingFile(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type PackageResult<T> = Result<T, PackageError>;

/// Identity of a concrete package artifact: optional scope, name, and a
/// version which is either a concrete semver string or a tag such as
/// `current` or `current$branch`.
///
/// Name comparisons are case-insensitive throughout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub name: PackageName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl PackageReference {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            scope: None,
            name: name.into(),
            version: Some(version.into()),
        }
    }

    pub fn scoped(
        scope: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            scope: Some(scope.into()),
            name: name.into(),
            version: Some(version.into()),
        }
    }

    /// Stable identity for logging and closure keys: `name@version`, with
    /// the scope prefixed when present.
    pub fn moniker(&self) -> String {
        let version = self.version.as_deref().unwrap_or("(unversioned)");
        match &self.scope {
            Some(scope) => format!("@{}/{}@{}", scope, self.name, version),
            None => format!("{}@{}", self.name, version),
        }
    }

    pub fn same_name(&self, other: &PackageReference) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.moniker())
    }
}

/// A requirement: package name plus a version range expression.
///
/// An empty range or the literal `latest` means the latest stable release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    pub name: PackageName,
    #[serde(default)]
    pub range: VersionReference,
}

impl PackageDependency {
    pub fn new(name: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: range.into(),
        }
    }

    pub fn wants_latest(&self) -> bool {
        self.range.is_empty() || self.range == "latest"
    }
}

impl fmt::Display for PackageDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.range.is_empty() {
            write!(f, "{}@latest", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.range)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
}

/// FHIR NPM package manifest (`package/package.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: PackageName,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fhir_versions: Vec<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<PackageName, VersionReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            canonical: None,
            url: None,
            title: None,
            description: String::new(),
            fhir_versions: Vec::new(),
            dependencies: BTreeMap::new(),
            author: None,
            maintainers: Vec::new(),
            package_type: None,
            license: None,
            extra: Map::new(),
        }
    }

    /// Declared dependencies as requirements, in name order.
    pub fn dependencies(&self) -> Vec<PackageDependency> {
        self.dependencies
            .iter()
            .map(|(name, range)| PackageDependency::new(name.clone(), range.clone()))
            .collect()
    }

    /// The reference this manifest describes.
    pub fn package_reference(&self) -> PackageReference {
        PackageReference::new(self.name.clone(), self.version.clone())
    }

    pub fn add_dependency(&mut self, name: impl Into<String>, range: impl Into<String>) {
        self.dependencies.insert(name.into(), range.into());
    }

    /// Check required fields.
    pub fn validate(&self) -> PackageResult<()> {
        if self.name.is_empty() {
            return Err(PackageError::ValidationError(
                "Package name required".into(),
            ));
        }
        if self.version.is_empty() {
            return Err(PackageError::ValidationError(
                "Package version required".into(),
            ));
        }
        Ok(())
    }
}

const MANIFEST_PATH: &str = "package/package.json";

/// Read the manifest out of a gzipped package tarball without unpacking
/// the rest of the archive.
pub fn manifest_from_tar_gz<R: Read>(reader: R) -> PackageResult<PackageManifest> {
    let decoder = GzDecoder::new(reader);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        if path == MANIFEST_PATH {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return parse_json(&contents);
        }
    }

    Err(PackageError::MissingFile(MANIFEST_PATH.to_string()))
}

pub fn manifest_from_tar_gz_bytes(bytes: &[u8]) -> PackageResult<PackageManifest> {
    manifest_from_tar_gz(std::io::Cursor::new(bytes))
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> PackageResult<T> {
    let cleaned = clean_bytes(bytes)?;
    Ok(serde_json::from_str(&cleaned)?)
}

// Tolerates the UTF-8 BOM and stray control characters some publishing
// pipelines leave in package.json.
fn clean_bytes(bytes: &[u8]) -> PackageResult<String> {
    let bytes = if bytes.len() >= 3 && &bytes[..3] == b"\xEF\xBB\xBF" {
        &bytes[3..]
    } else {
        bytes
    };

    let content = String::from_utf8(bytes.to_vec())
        .map_err(|e| PackageError::InvalidStructure(format!("Invalid UTF-8: {}", e)))?;

    Ok(content
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\x7F'))
        .collect::<String>()
        .trim()
        .to_string())
}
