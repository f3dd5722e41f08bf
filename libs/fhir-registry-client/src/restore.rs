//! Transitive restoration of a dependency closure.

use crate::cache::PackageCache;
use crate::closure::PackageClosure;
use crate::error::{Error, Result};
use crate::resolver::Resolver;
use crate::server::PackageServer;
use futures::future::BoxFuture;
use futures::FutureExt;
use siderite_package::{PackageManifest, PackageReference};
use std::sync::Arc;

/// Callback fired once per fresh install, after the cache write and
/// before recursion into the installed manifest.
pub type OnInstalled = Arc<dyn Fn(PackageReference) -> BoxFuture<'static, ()> + Send + Sync>;

/// Walks a manifest's dependency graph depth-first, resolving each
/// requirement, installing what is missing, and accumulating the result
/// into a [`PackageClosure`].
///
/// The walk is guarded by the closure's idempotency: a name already
/// accepted at an equal-or-higher version is not walked again, which
/// breaks dependency cycles. Cancellation is by dropping the returned
/// future; a partially built closure is simply discarded.
pub struct Restorer {
    servers: Vec<Arc<dyn PackageServer>>,
    resolver: Resolver,
    cache: Arc<dyn PackageCache>,
    on_installed: Option<OnInstalled>,
}

impl Restorer {
    pub fn new(servers: Vec<Arc<dyn PackageServer>>, cache: Arc<dyn PackageCache>) -> Self {
        let resolver = Resolver::new(servers.clone(), cache.clone());
        Self {
            servers,
            resolver,
            cache,
            on_installed: None,
        }
    }

    pub fn with_on_installed(mut self, callback: OnInstalled) -> Self {
        self.on_installed = Some(callback);
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Restore the full transitive closure of a root manifest.
    pub async fn restore(&self, manifest: &PackageManifest) -> Result<PackageClosure> {
        tracing::info!(package = %manifest.package_reference(), "restoring dependency closure");
        let mut closure = PackageClosure::new();
        self.restore_manifest(&mut closure, manifest).await?;
        tracing::info!(
            resolved = closure.len(),
            missing = closure.missing().len(),
            "restore finished"
        );
        Ok(closure)
    }

    fn restore_manifest<'a>(
        &'a self,
        closure: &'a mut PackageClosure,
        manifest: &'a PackageManifest,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            for dependency in manifest.dependencies() {
                match self.resolver.resolve(&dependency).await? {
                    Some(reference) => {
                        if closure.add(reference.clone()) {
                            if let Some(installed) = self.ensure_installed(&reference).await? {
                                self.restore_manifest(closure, &installed).await?;
                            }
                        }
                    }
                    None => {
                        let installed =
                            self.cache.installed_versions(&dependency.name).await?;
                        if installed.is_empty() {
                            tracing::warn!(%dependency, "no source can satisfy dependency");
                            closure.add_missing(dependency);
                        }
                        // Installed but unresolvable: the bootstrapping
                        // case, accepted silently.
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Install the reference when it is not yet cached, then hand back its
    /// manifest for the recursive walk.
    async fn ensure_installed(
        &self,
        reference: &PackageReference,
    ) -> Result<Option<PackageManifest>> {
        if !self.cache.is_installed(reference).await? {
            let bytes = self.fetch(reference).await?;
            self.cache.install(reference, &bytes).await?;
            if let Some(callback) = &self.on_installed {
                callback(reference.clone()).await;
            }
        }
        self.cache.read_manifest(reference).await
    }

    async fn fetch(&self, reference: &PackageReference) -> Result<Vec<u8>> {
        let mut last_error: Option<Error> = None;
        for server in self.servers.iter().filter(|s| s.handles(reference)) {
            match server.get_package(reference).await {
                Ok(bytes) => return Ok(bytes),
                Err(e @ Error::PackageNotFound(_)) => {
                    last_error = Some(e);
                }
                Err(e) if e.is_transport() => {
                    tracing::warn!(server = server.name(), error = %e, "tarball fetch failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::PackageNotFound(reference.moniker())))
    }
}
