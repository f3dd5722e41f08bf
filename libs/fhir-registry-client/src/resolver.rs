//! Requirement resolution against the server chain with cache fallback.

use crate::cache::PackageCache;
use crate::error::Result;
use crate::server::PackageServer;
use crate::version_set::VersionSet;
use semver::Version;
use siderite_package::{PackageDependency, PackageReference};
use std::sync::Arc;

/// Resolves requirements by consulting servers in priority order, falling
/// back to locally installed versions when no server can answer.
pub struct Resolver {
    servers: Vec<Arc<dyn PackageServer>>,
    cache: Arc<dyn PackageCache>,
}

impl Resolver {
    pub fn new(servers: Vec<Arc<dyn PackageServer>>, cache: Arc<dyn PackageCache>) -> Self {
        Self { servers, cache }
    }

    /// Resolve a requirement to a concrete reference. The first server
    /// that finds a satisfying version wins; transport failures from
    /// non-final servers fall through to the next source.
    pub async fn resolve(&self, dependency: &PackageDependency) -> Result<Option<PackageReference>> {
        let last = self.servers.len().saturating_sub(1);
        for (idx, server) in self.servers.iter().enumerate() {
            match server.resolve(dependency).await {
                Ok(Some(reference)) => {
                    tracing::debug!(%dependency, resolved = %reference, server = server.name(), "resolved");
                    return Ok(Some(reference));
                }
                Ok(None) => continue,
                Err(e) if e.is_transport() && idx != last => {
                    tracing::warn!(
                        server = server.name(),
                        error = %e,
                        "server cannot answer, falling through"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        self.resolve_from_cache(dependency).await
    }

    /// Across-servers latest: the numerically greatest version any server
    /// offers, ties broken by server order.
    pub async fn resolve_latest(&self, name: &str) -> Result<Option<PackageReference>> {
        let dependency = PackageDependency::new(name, "");
        let mut best: Option<(Version, PackageReference)> = None;

        for server in &self.servers {
            let found = match server.resolve(&dependency).await {
                Ok(found) => found,
                Err(e) if e.is_transport() => {
                    tracing::warn!(server = server.name(), error = %e, "skipping server");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(reference) = found else { continue };
            let Some(version) = reference.version.as_deref().and_then(|v| Version::parse(v).ok())
            else {
                continue;
            };
            let improves = best
                .as_ref()
                .map(|(current, _)| version > *current)
                .unwrap_or(true);
            if improves {
                best = Some((version, reference));
            }
        }

        Ok(best.map(|(_, reference)| reference))
    }

    async fn resolve_from_cache(
        &self,
        dependency: &PackageDependency,
    ) -> Result<Option<PackageReference>> {
        let installed = self.cache.installed_versions(&dependency.name).await?;
        if installed.is_empty() {
            return Ok(None);
        }

        let set = VersionSet::from_versions(installed.iter().filter_map(|r| r.version.as_deref()));
        let resolved = if dependency.wants_latest() {
            set.latest_preferring_stable().cloned()
        } else {
            set.resolve(&dependency.range, false)
        };
        let Some(resolved) = resolved else {
            return Ok(None);
        };

        // Hand back the installed reference spelled exactly as the cache
        // records it.
        Ok(installed.into_iter().find(|r| {
            r.version
                .as_deref()
                .and_then(|v| Version::parse(v).ok())
                .map(|v| v == resolved)
                .unwrap_or(false)
        }))
    }
}
