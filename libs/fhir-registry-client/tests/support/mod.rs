//! Test doubles: an in-memory registry and cache, plus manifest builders.

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use siderite_package::{manifest_from_tar_gz_bytes, PackageManifest, PackageReference};
use siderite_registry_client::{
    Dist, Error, PackageCache, PackageListing, PackageRelease, PackageServer, Result, CI_SCOPE,
};
use std::collections::HashMap;
use std::sync::Mutex;

pub fn manifest(name: &str, version: &str, deps: &[(&str, &str)]) -> PackageManifest {
    let mut manifest = PackageManifest::new(name, version);
    for (dep, range) in deps {
        manifest.add_dependency(*dep, *range);
    }
    manifest
}

/// A `.tgz` holding just the manifest, enough for install and recursion.
pub fn tarball(manifest: &PackageManifest) -> Vec<u8> {
    let bytes = serde_json::to_vec(manifest).expect("manifest serializes");
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "package/package.json", bytes.as_slice())
        .expect("tar entry");
    builder
        .into_inner()
        .expect("tar finishes")
        .finish()
        .expect("gzip finishes")
}

/// Registry double serving manifests straight from memory.
pub struct InMemoryRegistry {
    name: String,
    packages: HashMap<String, Vec<PackageManifest>>,
}

impl InMemoryRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            packages: HashMap::new(),
        }
    }

    pub fn with_package(mut self, manifest: PackageManifest) -> Self {
        self.packages
            .entry(manifest.name.to_ascii_lowercase())
            .or_default()
            .push(manifest);
        self
    }
}

#[async_trait]
impl PackageServer for InMemoryRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, reference: &PackageReference) -> bool {
        reference.scope.as_deref() != Some(CI_SCOPE)
    }

    async fn download_listing(&self, package: &str) -> Result<Option<PackageListing>> {
        let Some(manifests) = self.packages.get(&package.to_ascii_lowercase()) else {
            return Ok(None);
        };

        let mut listing = PackageListing {
            name: package.to_string(),
            ..Default::default()
        };
        for manifest in manifests {
            listing.versions.insert(
                manifest.version.clone(),
                PackageRelease {
                    name: Some(manifest.name.clone()),
                    version: manifest.version.clone(),
                    dist: Some(Dist::default()),
                    ..Default::default()
                },
            );
        }
        Ok(Some(listing))
    }

    async fn get_package(&self, reference: &PackageReference) -> Result<Vec<u8>> {
        let manifests = self
            .packages
            .get(&reference.name.to_ascii_lowercase())
            .ok_or_else(|| Error::PackageNotFound(reference.moniker()))?;
        let manifest = manifests
            .iter()
            .find(|m| Some(m.version.as_str()) == reference.version.as_deref())
            .ok_or_else(|| Error::PackageNotFound(reference.moniker()))?;
        Ok(tarball(manifest))
    }
}

/// Registry double whose every request fails at the transport level.
pub struct UnreachableRegistry {
    name: String,
}

impl UnreachableRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    fn unreachable(&self) -> Error {
        Error::UnexpectedStatus {
            server: self.name.clone(),
            status: 503,
            url: format!("{}/unreachable", self.name),
        }
    }
}

#[async_trait]
impl PackageServer for UnreachableRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, reference: &PackageReference) -> bool {
        reference.scope.as_deref() != Some(CI_SCOPE)
    }

    async fn download_listing(&self, _package: &str) -> Result<Option<PackageListing>> {
        Err(self.unreachable())
    }

    async fn get_package(&self, _reference: &PackageReference) -> Result<Vec<u8>> {
        Err(self.unreachable())
    }
}

/// Cache double keyed by lowercased moniker.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, PackageManifest>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(reference: &PackageReference) -> String {
        reference.moniker().to_ascii_lowercase()
    }

    /// Install without going through tarball bytes.
    pub fn preinstall(&self, manifest: PackageManifest) {
        let key = Self::key(&manifest.package_reference());
        self.entries.lock().unwrap().insert(key, manifest);
    }

    pub fn installed_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl PackageCache for MemoryCache {
    async fn is_installed(&self, reference: &PackageReference) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .contains_key(&Self::key(reference)))
    }

    async fn install(&self, reference: &PackageReference, bytes: &[u8]) -> Result<()> {
        let manifest = manifest_from_tar_gz_bytes(bytes)?;
        self.entries
            .lock()
            .unwrap()
            .insert(Self::key(reference), manifest);
        Ok(())
    }

    async fn read_manifest(
        &self,
        reference: &PackageReference,
    ) -> Result<Option<PackageManifest>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&Self::key(reference))
            .cloned())
    }

    async fn installed_versions(&self, name: &str) -> Result<Vec<PackageReference>> {
        Ok(self
            .installed_references()
            .await?
            .into_iter()
            .filter(|r| r.name.eq_ignore_ascii_case(name))
            .collect())
    }

    async fn installed_references(&self) -> Result<Vec<PackageReference>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .map(|m| m.package_reference())
            .collect())
    }
}
