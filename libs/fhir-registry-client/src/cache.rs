//! Local package cache: the last-resort resolver and install target.

use crate::error::Result;
use async_trait::async_trait;
use siderite_package::{manifest_from_tar_gz_bytes, PackageManifest, PackageReference};
use std::path::{Path, PathBuf};

/// Store of installed packages, keyed by (name, version).
///
/// `install` is atomic from the caller's perspective: either the package
/// becomes fully installed or the cache is unchanged.
#[async_trait]
pub trait PackageCache: Send + Sync {
    async fn is_installed(&self, reference: &PackageReference) -> Result<bool>;

    /// Extract the tarball and record the reference.
    async fn install(&self, reference: &PackageReference, bytes: &[u8]) -> Result<()>;

    /// Manifest of an installed package; `None` when not installed.
    async fn read_manifest(&self, reference: &PackageReference)
        -> Result<Option<PackageManifest>>;

    /// Installed references for a package name, used as the resolver's
    /// fallback source.
    async fn installed_versions(&self, name: &str) -> Result<Vec<PackageReference>>;

    /// Every installed reference.
    async fn installed_references(&self) -> Result<Vec<PackageReference>>;
}

/// Filesystem cache: one `{name}#{version}` directory per installed
/// package holding the original tarball and the materialized manifest.
pub struct FileSystemCache {
    root: PathBuf,
}

impl FileSystemCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, reference: &PackageReference) -> Option<PathBuf> {
        let version = reference.version.as_deref()?;
        Some(self.root.join(format!("{}#{}", reference.name, version)))
    }

    fn manifest_path(dir: &Path) -> PathBuf {
        dir.join("package").join("package.json")
    }

    fn reference_from_dir_name(dir_name: &str) -> Option<PackageReference> {
        let (name, version) = dir_name.split_once('#')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(PackageReference::new(name, version))
    }
}

#[async_trait]
impl PackageCache for FileSystemCache {
    async fn is_installed(&self, reference: &PackageReference) -> Result<bool> {
        match self.package_dir(reference) {
            Some(dir) => Ok(tokio::fs::try_exists(Self::manifest_path(&dir)).await?),
            None => Ok(false),
        }
    }

    async fn install(&self, reference: &PackageReference, bytes: &[u8]) -> Result<()> {
        let Some(dir) = self.package_dir(reference) else {
            return Ok(());
        };
        if tokio::fs::try_exists(Self::manifest_path(&dir)).await? {
            return Ok(());
        }

        let manifest = manifest_from_tar_gz_bytes(bytes)?;

        // Stage next to the final location, publish with a single rename.
        let staging = self.root.join(format!(
            ".staging-{}-{}",
            std::process::id(),
            dir.file_name().and_then(|n| n.to_str()).unwrap_or("pkg")
        ));
        let _ = tokio::fs::remove_dir_all(&staging).await;
        tokio::fs::create_dir_all(staging.join("package")).await?;
        tokio::fs::write(staging.join("package.tgz"), bytes).await?;
        tokio::fs::write(
            Self::manifest_path(&staging),
            serde_json::to_vec_pretty(&manifest)?,
        )
        .await?;

        match tokio::fs::rename(&staging, &dir).await {
            Ok(()) => {
                tracing::info!(package = %reference, "installed into cache");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                // A concurrent install of the same reference won the race.
                if tokio::fs::try_exists(Self::manifest_path(&dir)).await? {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn read_manifest(
        &self,
        reference: &PackageReference,
    ) -> Result<Option<PackageManifest>> {
        let Some(dir) = self.package_dir(reference) else {
            return Ok(None);
        };
        let path = Self::manifest_path(&dir);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
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
        let mut references = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(references),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if dir_name.starts_with('.') {
                continue;
            }
            if let Some(reference) = Self::reference_from_dir_name(&dir_name) {
                references.push(reference);
            }
        }
        Ok(references)
    }
}
